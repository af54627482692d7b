//! As-of plan resolution for execution records.
//!
//! Disclosures are sparse: a plan is taken to be in effect from its
//! announcement (or explicit start date, when later) until a newer
//! disclosure supersedes it. Resolution is therefore a last-applicable lookup
//! over the entity's plans ordered by announce date, not an interval test.

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;

use crate::identity::PlanIdentity;
use crate::model::{ExecutionRecord, Plan};

/// The parts of a plan the matcher needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanWindow {
    pub plan_key: String,
    pub announce_date: NaiveDate,
    pub start_date: Option<NaiveDate>,
}

impl PlanWindow {
    fn governs(&self, date: NaiveDate) -> bool {
        self.announce_date <= date && self.start_date.is_none_or(|s| s <= date)
    }
}

/// Immutable view of the plan table, loaded once per run and passed to
/// whatever needs to resolve identities.
///
/// Windows of an entity are ordered by `(announce_date, plan_key)`. When two
/// plans share an announce date the lexically greater key comes later and so
/// wins the backward scan.
#[derive(Debug, Clone, Default)]
pub struct PlanSnapshot {
    by_entity: BTreeMap<String, Vec<PlanWindow>>,
}

impl PlanSnapshot {
    /// Build a snapshot. Plans without an announce date can never govern a
    /// date and are left out; repeated versions of a key collapse to one window.
    pub fn from_plans<'a>(plans: impl IntoIterator<Item = &'a Plan>) -> Self {
        let mut by_entity: BTreeMap<String, Vec<PlanWindow>> = BTreeMap::new();
        let mut seen: HashSet<(&str, &str)> = HashSet::new();
        for plan in plans {
            let Some(announce_date) = plan.announce_date else {
                continue;
            };
            if !seen.insert((plan.entity_code.as_str(), plan.plan_key.as_str())) {
                continue;
            }
            by_entity
                .entry(plan.entity_code.clone())
                .or_default()
                .push(PlanWindow {
                    plan_key: plan.plan_key.clone(),
                    announce_date,
                    start_date: plan.start_date,
                });
        }
        for windows in by_entity.values_mut() {
            windows.sort_by(|a, b| {
                a.announce_date
                    .cmp(&b.announce_date)
                    .then_with(|| a.plan_key.cmp(&b.plan_key))
            });
        }
        Self { by_entity }
    }

    pub fn entity_count(&self) -> usize {
        self.by_entity.len()
    }

    pub fn windows(&self, entity_code: &str) -> &[PlanWindow] {
        self.by_entity
            .get(entity_code)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Plan in effect for `entity_code` on `date`, if any.
    ///
    /// `None` is the normal outcome for dates before any captured disclosure.
    pub fn resolve(&self, entity_code: &str, date: NaiveDate) -> Option<&str> {
        self.windows(entity_code)
            .iter()
            .rev()
            .find(|w| w.governs(date))
            .map(|w| w.plan_key.as_str())
    }

    /// Identity for an execution on `date`: resolved when a plan governs it.
    pub fn identity_for(&self, entity_code: &str, date: NaiveDate) -> PlanIdentity {
        match self.resolve(entity_code, date) {
            Some(key) => PlanIdentity::Resolved(key.to_string()),
            None => PlanIdentity::Unresolved,
        }
    }

    /// Fill in the identity of an unresolved record. Resolved records, including
    /// feed-declared plan codes, are left alone. Returns whether the record is
    /// resolved afterwards.
    pub fn assign(&self, record: &mut ExecutionRecord) -> bool {
        if !record.identity.is_resolved() {
            record.identity = self.identity_for(&record.entity_code, record.date);
        }
        record.identity.is_resolved()
    }
}
