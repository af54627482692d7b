//! Canonical record shapes shared by the normalizer, the matcher and the store.

use chrono::NaiveDate;
use serde::Serialize;

use crate::identity::PlanIdentity;

/// One normalized plan disclosure, before it has been fingerprinted.
///
/// Every numeric or date field is optional: malformed source values are
/// coerced to `None` by the normalizer instead of rejecting the row.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanDisclosure {
    pub entity_code: String,
    pub display_name: Option<String>,
    pub announce_date: Option<NaiveDate>,
    pub start_date: Option<NaiveDate>,
    pub price_lower: Option<f64>,
    pub price_upper: Option<f64>,
    pub amount_upper: Option<f64>,
    pub volume_upper: Option<f64>,
    pub latest_price: Option<f64>,
    pub progress_text: Option<String>,
}

/// A fingerprinted and versioned plan row, as persisted in `plans`.
///
/// Identity is `(entity_code, plan_key, version)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    pub entity_code: String,
    pub display_name: Option<String>,
    pub plan_key: String,
    pub version: u32,
    pub announce_date: Option<NaiveDate>,
    pub start_date: Option<NaiveDate>,
    pub price_lower: Option<f64>,
    pub price_upper: Option<f64>,
    pub amount_upper: Option<f64>,
    pub volume_upper: Option<f64>,
    pub latest_price: Option<f64>,
    pub progress_text: Option<String>,
}

impl Plan {
    /// Attach an identity to a disclosure. `version` is assigned later by the sequencer.
    pub fn from_disclosure(d: PlanDisclosure, plan_key: String) -> Self {
        Self {
            entity_code: d.entity_code,
            display_name: d.display_name,
            plan_key,
            version: 0,
            announce_date: d.announce_date,
            start_date: d.start_date,
            price_lower: d.price_lower,
            price_upper: d.price_upper,
            amount_upper: d.amount_upper,
            volume_upper: d.volume_upper,
            latest_price: d.latest_price,
            progress_text: d.progress_text,
        }
    }
}

/// One day of reported buyback activity for an entity.
///
/// `identity` is `Unresolved` until a plan can be matched; it is turned into
/// the reserved-prefix string only when the row is written to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRecord {
    pub entity_code: String,
    pub identity: PlanIdentity,
    pub display_name: Option<String>,
    pub date: NaiveDate,
    pub amount: Option<f64>,
    pub volume: Option<f64>,
    pub avg_price: Option<f64>,
    pub progress_text: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl ExecutionRecord {
    /// Plan key as written to storage.
    pub fn storage_key(&self) -> String {
        self.identity.storage_key(&self.entity_code)
    }
}

/// Pair of plans for one entity whose start dates are suspiciously close.
///
/// Advisory only: exported for manual review, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverlapHint {
    pub entity_code: String,
    pub plan_key_1: String,
    pub plan_key_2: String,
    pub start_1: NaiveDate,
    pub start_2: NaiveDate,
    pub announce_1: NaiveDate,
    pub announce_2: NaiveDate,
}
