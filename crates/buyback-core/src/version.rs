//! Plan versioning and incremental plan merges.
//!
//! Versions number repeated disclosures of one `(entity_code, plan_key)`:
//! stable-sorted by announce date, `1..=n` with no gaps. Because the announce
//! date is part of the fingerprint, every row in a group shares it and the
//! version simply records arrival order.

use std::collections::HashMap;

use chrono::NaiveDate;
use tracing::debug;

use crate::fingerprint::plan_key;
use crate::model::{Plan, PlanDisclosure};

/// Result of merging a fresh plan batch into the stored plan history.
#[derive(Debug, Clone, Default)]
pub struct PlanMerge {
    /// Full plan history after the merge, versioned.
    pub merged: Vec<Plan>,
    /// Rows of `merged` announced at or after the previous high-water mark.
    pub increment: Vec<Plan>,
    /// High-water mark the incoming batch was filtered against.
    pub since: NaiveDate,
}

/// Announce date used as the high-water mark of an empty store.
pub fn default_high_water() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or(NaiveDate::MIN)
}

/// Latest known announce date, or [`default_high_water`].
pub fn plan_high_water(plans: &[Plan]) -> NaiveDate {
    plans
        .iter()
        .filter_map(|p| p.announce_date)
        .max()
        .unwrap_or_else(default_high_water)
}

/// Fingerprint a normalized batch and assign versions.
pub fn fingerprint_batch(disclosures: Vec<PlanDisclosure>) -> Vec<Plan> {
    let plans = disclosures
        .into_iter()
        .map(|d| {
            let key = plan_key(&d);
            Plan::from_disclosure(d, key)
        })
        .collect();
    sequence_versions(plans)
}

/// Stable-sort by `(entity_code, plan_key, announce_date)` and number each group.
///
/// Unknown announce dates sort after known ones within a group.
pub fn sequence_versions(mut plans: Vec<Plan>) -> Vec<Plan> {
    // `sort_by` is stable: equal keys keep their arrival order.
    plans.sort_by(|a, b| {
        a.entity_code
            .cmp(&b.entity_code)
            .then_with(|| a.plan_key.cmp(&b.plan_key))
            .then_with(|| announce_order(a).cmp(&announce_order(b)))
    });

    let mut prev: Option<(String, String)> = None;
    let mut next_version = 1;
    for plan in &mut plans {
        let same_group = prev
            .as_ref()
            .is_some_and(|(e, k)| *e == plan.entity_code && *k == plan.plan_key);
        if !same_group {
            next_version = 1;
            prev = Some((plan.entity_code.clone(), plan.plan_key.clone()));
        }
        plan.version = next_version;
        next_version += 1;
    }
    plans
}

fn announce_order(p: &Plan) -> (bool, Option<NaiveDate>) {
    (p.announce_date.is_none(), p.announce_date)
}

/// Merge an incoming batch into the stored plan history.
///
/// Incoming rows announced before `since` (or with no announce date) are
/// ignored. The rest are versioned within their batch, then laid over the
/// existing rows by identity key: an incoming row replaces the stored row with
/// the same `(entity_code, plan_key, version)`, refreshing fields such as
/// `latest_price` and `progress_text`. Re-running with the same batch is a
/// no-op.
pub fn merge_incremental(
    existing: Vec<Plan>,
    incoming: Vec<PlanDisclosure>,
    since: NaiveDate,
) -> PlanMerge {
    let fresh: Vec<PlanDisclosure> = incoming
        .into_iter()
        .filter(|d| d.announce_date.is_some_and(|a| a >= since))
        .collect();
    let fresh = fingerprint_batch(fresh);
    debug!(existing = existing.len(), fresh = fresh.len(), %since, "merging plan batch");

    let mut combined: Vec<Plan> = Vec::with_capacity(existing.len() + fresh.len());
    let mut slots: HashMap<(String, String, u32), usize> = HashMap::new();
    for plan in existing.into_iter().chain(fresh) {
        let key = (plan.entity_code.clone(), plan.plan_key.clone(), plan.version);
        match slots.get(&key) {
            Some(&idx) => combined[idx] = plan,
            None => {
                slots.insert(key, combined.len());
                combined.push(plan);
            }
        }
    }

    let merged = sequence_versions(combined);
    let increment = merged
        .iter()
        .filter(|p| p.announce_date.is_some_and(|a| a >= since))
        .cloned()
        .collect();
    PlanMerge {
        merged,
        increment,
        since,
    }
}
