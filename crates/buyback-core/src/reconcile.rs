//! In-memory half of execution reconciliation.
//!
//! The store owns the transaction and the SQL; this module decides what to
//! write. [`prepare_executions`] resolves identities for a fresh batch and
//! collapses duplicate keys. [`plan_rehydration`] decides, for each stored
//! placeholder row, whether it can now be rewritten or must be discarded.

use std::collections::HashMap;

use chrono::NaiveDate;
use tracing::debug;

use crate::matcher::PlanSnapshot;
use crate::model::ExecutionRecord;

/// A fresh execution batch ready to upsert.
#[derive(Debug, Clone, Default)]
pub struct PreparedBatch {
    /// One record per `(entity_code, plan_key, date)`, in first-seen order.
    pub records: Vec<ExecutionRecord>,
    /// Records that carried a plan code from the feed.
    pub feed_declared: usize,
    /// Records resolved by the as-of matcher.
    pub matched: usize,
    /// Records left on a placeholder identity.
    pub unresolved: usize,
    /// Duplicate copies dropped in favour of a later copy.
    pub collapsed: usize,
}

/// Resolve identities and collapse duplicates within one batch.
///
/// When a key appears more than once, the copy read last wins outright. The
/// fill-forward rule applies only between the batch and the store.
pub fn prepare_executions(records: Vec<ExecutionRecord>, snapshot: &PlanSnapshot) -> PreparedBatch {
    let mut batch = PreparedBatch::default();
    let mut slots: HashMap<(String, String, NaiveDate), usize> = HashMap::new();

    for mut record in records {
        if record.identity.is_resolved() {
            batch.feed_declared += 1;
        } else if snapshot.assign(&mut record) {
            batch.matched += 1;
        } else {
            batch.unresolved += 1;
        }

        let key = (record.entity_code.clone(), record.storage_key(), record.date);
        match slots.get(&key) {
            Some(&idx) => {
                batch.records[idx] = record;
                batch.collapsed += 1;
            }
            None => {
                slots.insert(key, batch.records.len());
                batch.records.push(record);
            }
        }
    }

    debug!(
        rows = batch.records.len(),
        feed_declared = batch.feed_declared,
        matched = batch.matched,
        unresolved = batch.unresolved,
        collapsed = batch.collapsed,
        "prepared execution batch"
    );
    batch
}

/// A stored execution row that still carries a placeholder key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PlaceholderRow {
    pub entity_code: String,
    /// Key exactly as stored; legacy rows may not match `placeholder_key(entity_code)`.
    pub stored_key: String,
    pub date: NaiveDate,
}

/// What to do with one placeholder row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rehydration {
    /// Move the row to its resolved key.
    Rewrite { row: PlaceholderRow, plan_key: String },
    /// A row already exists under the resolved key; drop the placeholder.
    Discard { row: PlaceholderRow, plan_key: String },
}

impl Rehydration {
    pub fn row(&self) -> &PlaceholderRow {
        match self {
            Self::Rewrite { row, .. } | Self::Discard { row, .. } => row,
        }
    }
}

/// Decide the fate of each placeholder row against the current plans.
///
/// `resolved_exists(entity, plan_key, date)` reports whether a row is already
/// stored under a real key. Rows that still resolve to nothing produce no
/// action, so running this repeatedly converges and never grows the table.
pub fn plan_rehydration<F, E>(
    rows: &[PlaceholderRow],
    snapshot: &PlanSnapshot,
    mut resolved_exists: F,
) -> Result<Vec<Rehydration>, E>
where
    F: FnMut(&str, &str, NaiveDate) -> Result<bool, E>,
{
    let mut actions = Vec::new();
    for row in rows {
        let Some(plan_key) = snapshot.resolve(&row.entity_code, row.date) else {
            continue;
        };
        let plan_key = plan_key.to_string();
        let row = row.clone();
        if resolved_exists(&row.entity_code, &plan_key, row.date)? {
            actions.push(Rehydration::Discard { row, plan_key });
        } else {
            actions.push(Rehydration::Rewrite { row, plan_key });
        }
    }
    Ok(actions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::PlanIdentity;
    use crate::model::Plan;
    use std::collections::HashSet;
    use std::convert::Infallible;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn snapshot() -> PlanSnapshot {
        let plan = Plan {
            entity_code: "000001".into(),
            display_name: None,
            plan_key: "aaaaaaaaaaaaaaaa".into(),
            version: 1,
            announce_date: Some(d("2024-01-10")),
            start_date: None,
            price_lower: None,
            price_upper: None,
            amount_upper: None,
            volume_upper: None,
            latest_price: None,
            progress_text: None,
        };
        PlanSnapshot::from_plans(&[plan])
    }

    fn exec(code: &str, date: &str, amount: Option<f64>) -> ExecutionRecord {
        ExecutionRecord {
            entity_code: code.into(),
            identity: PlanIdentity::Unresolved,
            display_name: None,
            date: d(date),
            amount,
            volume: None,
            avg_price: None,
            progress_text: None,
            start_date: None,
            end_date: None,
        }
    }

    #[test]
    fn batch_resolves_and_counts() {
        let mut declared = exec("000001", "2024-02-02", None);
        declared.identity = PlanIdentity::Resolved("778".into());
        let batch = prepare_executions(
            vec![
                exec("000001", "2024-02-01", Some(1.0)),
                exec("000001", "2023-12-01", Some(2.0)),
                declared,
            ],
            &snapshot(),
        );
        assert_eq!(batch.records.len(), 3);
        assert_eq!(batch.matched, 1);
        assert_eq!(batch.unresolved, 1);
        assert_eq!(batch.feed_declared, 1);
        assert_eq!(batch.records[1].storage_key(), "__DEFAULT__:000001");
    }

    #[test]
    fn last_copy_wins_within_batch() {
        let batch = prepare_executions(
            vec![
                exec("000001", "2024-02-01", Some(1.0)),
                exec("000002", "2024-02-01", Some(5.0)),
                exec("000001", "2024-02-01", None),
            ],
            &snapshot(),
        );
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.collapsed, 1);
        // Position of the first copy, content of the last.
        assert_eq!(batch.records[0].entity_code, "000001");
        assert_eq!(batch.records[0].amount, None);
    }

    fn placeholder(date: &str) -> PlaceholderRow {
        PlaceholderRow {
            entity_code: "000001".into(),
            stored_key: "__DEFAULT__:000001".into(),
            date: d(date),
        }
    }

    #[test]
    fn rehydration_rewrites_or_discards() {
        let rows = vec![
            placeholder("2024-02-01"),
            placeholder("2024-02-02"),
            placeholder("2023-12-01"),
        ];
        let existing: HashSet<(String, String, NaiveDate)> = [(
            "000001".to_string(),
            "aaaaaaaaaaaaaaaa".to_string(),
            d("2024-02-02"),
        )]
        .into_iter()
        .collect();

        let actions = plan_rehydration(&rows, &snapshot(), |e, k, date| {
            Ok::<_, Infallible>(existing.contains(&(e.to_string(), k.to_string(), date)))
        })
        .unwrap();
        assert_eq!(
            actions,
            vec![
                Rehydration::Rewrite {
                    row: placeholder("2024-02-01"),
                    plan_key: "aaaaaaaaaaaaaaaa".into(),
                },
                Rehydration::Discard {
                    row: placeholder("2024-02-02"),
                    plan_key: "aaaaaaaaaaaaaaaa".into(),
                },
            ]
        );
    }

    #[test]
    fn rehydration_without_plans_is_a_no_op() {
        let rows = vec![placeholder("2024-02-01")];
        let actions =
            plan_rehydration(&rows, &PlanSnapshot::default(), |_, _, _| Ok::<_, Infallible>(true))
                .unwrap();
        assert!(actions.is_empty());
    }

    #[test]
    fn rehydration_propagates_lookup_errors() {
        let rows = vec![placeholder("2024-02-01")];
        let result = plan_rehydration(&rows, &snapshot(), |_, _, _| Err("store unavailable"));
        assert_eq!(result, Err("store unavailable"));
    }
}
