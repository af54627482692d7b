//! Parallel-plan screening.
//!
//! Flags pairs of plans for one entity whose start dates lie within
//! [`START_PROXIMITY_DAYS`] of each other while their announce dates differ by
//! at least [`MIN_ANNOUNCE_GAP_DAYS`]. This is a review hint with tolerated
//! false positives and negatives; nothing downstream is blocked by it.
//!
//! The scan is quadratic per entity. Per-entity plan counts are in the single
//! digits to low tens; past that, switch to a sweep over start dates.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::model::{OverlapHint, Plan};

pub const START_PROXIMITY_DAYS: i64 = 30;
pub const MIN_ANNOUNCE_GAP_DAYS: i64 = 1;

/// Overlap hints for every entity in `plans`, ordered by entity code.
///
/// Each unordered pair of plan keys is reported at most once. Plans missing a
/// start or announce date never take part.
pub fn detect_overlaps(plans: &[Plan]) -> Vec<OverlapHint> {
    let mut by_entity: BTreeMap<&str, Vec<&Plan>> = BTreeMap::new();
    for plan in plans {
        if plan.start_date.is_some() && plan.announce_date.is_some() {
            by_entity.entry(&plan.entity_code).or_default().push(plan);
        }
    }

    let mut hints = Vec::new();
    for (entity, mut group) in by_entity {
        group.sort_by_key(|p| (p.start_date, p.announce_date));
        let before = hints.len();
        let mut seen: BTreeSet<(&str, &str)> = BTreeSet::new();

        for (i, a) in group.iter().enumerate() {
            for b in &group[i + 1..] {
                let (Some(sa), Some(sb), Some(aa), Some(ab)) =
                    (a.start_date, b.start_date, a.announce_date, b.announce_date)
                else {
                    continue;
                };
                let start_gap = (sa - sb).num_days().abs();
                let announce_gap = (aa - ab).num_days().abs();
                if start_gap > START_PROXIMITY_DAYS || announce_gap < MIN_ANNOUNCE_GAP_DAYS {
                    continue;
                }
                let pair = if a.plan_key <= b.plan_key {
                    (a.plan_key.as_str(), b.plan_key.as_str())
                } else {
                    (b.plan_key.as_str(), a.plan_key.as_str())
                };
                if !seen.insert(pair) {
                    continue;
                }
                hints.push(OverlapHint {
                    entity_code: entity.to_string(),
                    plan_key_1: a.plan_key.clone(),
                    plan_key_2: b.plan_key.clone(),
                    start_1: sa,
                    start_2: sb,
                    announce_1: aa,
                    announce_2: ab,
                });
            }
        }
        if hints.len() > before {
            debug!(entity, pairs = hints.len() - before, "overlapping plans flagged");
        }
    }
    hints
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn plan(code: &str, key: &str, version: u32, announce: &str, start: Option<&str>) -> Plan {
        Plan {
            entity_code: code.into(),
            display_name: None,
            plan_key: key.into(),
            version,
            announce_date: Some(d(announce)),
            start_date: start.map(d),
            price_lower: None,
            price_upper: None,
            amount_upper: None,
            volume_upper: None,
            latest_price: None,
            progress_text: None,
        }
    }

    #[test]
    fn close_starts_distinct_announcements_flagged_once() {
        let plans = vec![
            plan("000001", "aaaa", 1, "2024-01-10", Some("2024-02-01")),
            plan("000001", "bbbb", 1, "2024-01-20", Some("2024-02-20")),
        ];
        let hints = detect_overlaps(&plans);
        assert_eq!(hints.len(), 1);
        assert_eq!(hints[0].plan_key_1, "aaaa");
        assert_eq!(hints[0].plan_key_2, "bbbb");
    }

    #[test]
    fn pair_order_does_not_duplicate() {
        let forward = vec![
            plan("000001", "aaaa", 1, "2024-01-10", Some("2024-02-01")),
            plan("000001", "bbbb", 1, "2024-01-20", Some("2024-02-01")),
        ];
        let backward: Vec<Plan> = forward.iter().rev().cloned().collect();
        assert_eq!(detect_overlaps(&forward).len(), 1);
        assert_eq!(detect_overlaps(&backward).len(), 1);
    }

    #[test]
    fn repeated_versions_do_not_multiply_hints() {
        let plans = vec![
            plan("000001", "aaaa", 1, "2024-01-10", Some("2024-02-01")),
            plan("000001", "aaaa", 2, "2024-01-10", Some("2024-02-01")),
            plan("000001", "bbbb", 1, "2024-01-20", Some("2024-02-05")),
        ];
        assert_eq!(detect_overlaps(&plans).len(), 1);
    }

    #[test]
    fn both_conditions_must_hold() {
        // Starts too far apart.
        let far = vec![
            plan("000001", "aaaa", 1, "2024-01-10", Some("2024-02-01")),
            plan("000001", "bbbb", 1, "2024-01-20", Some("2024-03-15")),
        ];
        assert!(detect_overlaps(&far).is_empty());

        // Same announce day.
        let same_day = vec![
            plan("000001", "aaaa", 1, "2024-01-10", Some("2024-02-01")),
            plan("000001", "bbbb", 1, "2024-01-10", Some("2024-02-03")),
        ];
        assert!(detect_overlaps(&same_day).is_empty());

        // Exactly 30 days apart is still close.
        let boundary = vec![
            plan("000001", "aaaa", 1, "2024-01-10", Some("2024-02-01")),
            plan("000001", "bbbb", 1, "2024-01-11", Some("2024-03-02")),
        ];
        assert_eq!(detect_overlaps(&boundary).len(), 1);
    }

    #[test]
    fn entities_are_not_mixed_and_missing_starts_skip() {
        let plans = vec![
            plan("000001", "aaaa", 1, "2024-01-10", Some("2024-02-01")),
            plan("000002", "bbbb", 1, "2024-01-20", Some("2024-02-01")),
            plan("000001", "cccc", 1, "2024-01-25", None),
        ];
        assert!(detect_overlaps(&plans).is_empty());
    }
}
