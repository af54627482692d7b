//! DuckDB storage for plan history and buyback executions.

use std::path::Path;

use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;
use duckdb::Connection;
use tracing::info;

use buyback_core::identity::PLACEHOLDER_PREFIX;
use buyback_core::{OverlapHint, Plan, default_high_water, detect_overlaps, plan_high_water};

use crate::StoreError;
use crate::executions::{self, StoredExecution};
use crate::migrate::{self, MigrationReport};
use crate::plans;
use crate::schema::{EXECUTIONS, PLANS};

/// DuckDB store holding the `plans` history and the `buyback_executions` table.
///
/// Supports both in-memory (ephemeral) and persistent (file-backed) modes.
/// Use [`open`](Self::open) for in-memory and [`open_persistent`](Self::open_persistent)
/// for a file that survives across runs. Neither migrates on open; call
/// [`migrate`](Self::migrate) first, or let [`reconcile`](Self::reconcile) do it.
pub struct DuckStore {
    pub(crate) conn: Connection,
}

impl DuckStore {
    /// Open an in-memory DuckDB database.
    pub fn open() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    /// Open or create a persistent DuckDB database at the given path.
    pub fn open_persistent(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "opened store");
        Ok(Self { conn })
    }

    /// Bring the store to the current schema in one transaction.
    ///
    /// A failed step rolls the whole migration back and leaves the store as it was.
    pub fn migrate(&mut self) -> Result<MigrationReport, StoreError> {
        let tx = self.conn.transaction()?;
        let report = migrate::run(&tx)?;
        tx.commit()?;
        Ok(report)
    }

    /// Schema version recorded in the store, read without migrating.
    ///
    /// Returns 0 for a fresh or pre-ledger store.
    pub fn schema_version(&self) -> Result<i64, StoreError> {
        migrate::recorded_version(&self.conn)
    }

    // ── Counts ──

    /// Number of rows in the `plans` table.
    pub fn plan_count(&self) -> Result<usize, StoreError> {
        self.count_where(PLANS, "TRUE")
    }

    /// Number of rows in the `buyback_executions` table.
    pub fn execution_count(&self) -> Result<usize, StoreError> {
        self.count_where(EXECUTIONS, "TRUE")
    }

    /// Execution rows still waiting for a plan.
    pub fn placeholder_count(&self) -> Result<usize, StoreError> {
        self.count_where(
            EXECUTIONS,
            &format!("starts_with(plan_key, '{PLACEHOLDER_PREFIX}')"),
        )
    }

    fn count_where(&self, table: &str, predicate: &str) -> Result<usize, StoreError> {
        let sql = format!("SELECT count(*)::BIGINT AS cnt FROM {table} WHERE {predicate}");
        let mut stmt = self.conn.prepare(&sql)?;
        let batches: Vec<RecordBatch> = stmt.query_arrow([])?.collect();
        let batch = batches.first().ok_or(StoreError::NoResults)?;
        let col = batch
            .column(0)
            .as_any()
            .downcast_ref::<arrow::array::Int64Array>()
            .ok_or_else(|| StoreError::Other("count column not i64".into()))?;
        Ok(col.value(0) as usize)
    }

    // ── Plans ──

    /// Full plan history, ordered by `(entity_code, plan_key, version)`.
    pub fn plans(&self) -> Result<Vec<Plan>, StoreError> {
        plans::load_plans(&self.conn)
    }

    /// Plans announced on or after `since`.
    pub fn plans_since(&self, since: NaiveDate) -> Result<Vec<Plan>, StoreError> {
        let mut all = self.plans()?;
        all.retain(|p| p.announce_date.is_some_and(|a| a >= since));
        Ok(all)
    }

    /// Latest stored announce date, or the default mark for an empty store.
    pub fn plan_high_water(&self) -> Result<NaiveDate, StoreError> {
        Ok(plan_high_water(&self.plans()?))
    }

    /// Overlap hints over the whole plan table. Regenerated on every call.
    pub fn overlap_hints(&self) -> Result<Vec<OverlapHint>, StoreError> {
        Ok(detect_overlaps(&self.plans()?))
    }

    // ── Executions ──

    /// Stored executions dated on or after `since`, or all of them.
    pub fn executions(&self, since: Option<NaiveDate>) -> Result<Vec<StoredExecution>, StoreError> {
        executions::load_executions(&self.conn, since)
    }

    /// Latest stored execution date, or the default mark for an empty store.
    pub fn execution_high_water(&self) -> Result<NaiveDate, StoreError> {
        Ok(executions::execution_high_water(&self.conn)?.unwrap_or_else(default_high_water))
    }

    // ── Escape hatch ──

    /// Execute arbitrary SQL and return Arrow RecordBatches.
    pub fn query_arrow(&self, sql: &str) -> Result<Vec<RecordBatch>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let batches: Vec<RecordBatch> = stmt.query_arrow([])?.collect();
        Ok(batches)
    }

    /// Access the underlying DuckDB connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}
