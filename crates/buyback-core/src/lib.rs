//! Plan identity and reconciliation rules for buyback disclosures.
//!
//! Pure engine crate: no I/O. The store crate persists what this crate decides.

pub mod fingerprint;
pub mod identity;
pub mod matcher;
pub mod model;
pub mod normalize;
pub mod overlap;
pub mod reconcile;
pub mod version;

pub use fingerprint::plan_key;
pub use identity::{PLACEHOLDER_PREFIX, PlanIdentity, is_placeholder_key, placeholder_key, plan_label};
pub use matcher::PlanSnapshot;
pub use model::{ExecutionRecord, OverlapHint, Plan, PlanDisclosure};
pub use normalize::{NormalizeReport, RawRecord, normalize_executions, normalize_plans};
pub use overlap::detect_overlaps;
pub use reconcile::{PlaceholderRow, PreparedBatch, Rehydration, plan_rehydration, prepare_executions};
pub use version::{PlanMerge, default_high_water, fingerprint_batch, merge_incremental, plan_high_water};
