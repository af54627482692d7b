//! Storage layer: DuckDB tables for plan history and buyback executions,
//! schema migration, and the transactional reconciliation run.

mod error;
pub use error::StoreError;

pub mod schema;

#[cfg(feature = "duckdb")]
mod columns;
#[cfg(feature = "duckdb")]
mod duck;
#[cfg(feature = "duckdb")]
mod executions;
#[cfg(feature = "duckdb")]
pub mod migrate;
#[cfg(feature = "duckdb")]
mod plans;
#[cfg(feature = "duckdb")]
mod reconcile;

#[cfg(feature = "duckdb")]
pub use duck::DuckStore;
#[cfg(feature = "duckdb")]
pub use executions::StoredExecution;
#[cfg(feature = "duckdb")]
pub use migrate::MigrationReport;
#[cfg(feature = "duckdb")]
pub use reconcile::{IngestBatch, PlanMode, RehydrateReport, RunReport};
