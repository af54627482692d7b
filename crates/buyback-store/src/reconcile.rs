//! One ingestion run: plans, then executions, then rehydration, in a single transaction.

use chrono::NaiveDate;
use duckdb::Connection;
use tracing::{debug, info};

use buyback_core::{
    ExecutionRecord, Plan, PlanDisclosure, PlanSnapshot, fingerprint_batch, merge_incremental,
    plan_high_water, plan_rehydration, prepare_executions,
};

use crate::StoreError;
use crate::duck::DuckStore;
use crate::executions::{
    apply_rehydration, execution_high_water, placeholder_rows, row_exists, sweep_shadowed,
    upsert_executions,
};
use crate::migrate::MigrationReport;
use crate::plans::{load_plans, upsert_plans};

/// How a plan batch is applied to the stored history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlanMode {
    /// Merge rows announced at or after the stored high-water mark.
    #[default]
    Incremental,
    /// Replace the stored plan table with this batch.
    Rebuild,
}

/// Normalized input of one run. Either half may be empty.
#[derive(Debug, Clone, Default)]
pub struct IngestBatch {
    pub plans: Vec<PlanDisclosure>,
    pub plan_mode: PlanMode,
    pub executions: Vec<ExecutionRecord>,
}

/// Outcome of rehydrating placeholder rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RehydrateReport {
    /// Placeholder rows moved to their resolved key.
    pub rewritten: usize,
    /// Placeholder rows dropped because the resolved row already existed.
    pub discarded: usize,
    /// Placeholder rows dropped because a real-keyed row shared their entity and date.
    pub swept: usize,
}

impl RehydrateReport {
    pub fn removed(&self) -> usize {
        self.discarded + self.swept
    }
}

/// What one [`DuckStore::reconcile`] run did.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub migration: MigrationReport,
    pub plan_mode: PlanMode,
    /// Plan high-water mark observed before the run.
    pub plan_since: Option<NaiveDate>,
    /// Plan rows written this run, announced at or after `plan_since`.
    pub plan_increment: Vec<Plan>,
    /// Execution high-water mark observed before the run.
    pub execution_since: Option<NaiveDate>,
    pub executions_written: usize,
    pub feed_declared: usize,
    pub matched: usize,
    pub unresolved: usize,
    pub collapsed: usize,
    pub rehydration: RehydrateReport,
}

impl RunReport {
    /// Nothing arrived and nothing was rewritten.
    pub fn is_idle(&self) -> bool {
        self.plan_increment.is_empty()
            && self.executions_written == 0
            && self.rehydration == RehydrateReport::default()
    }
}

impl DuckStore {
    /// Ingest one batch of plans and executions.
    ///
    /// The store is migrated first. Every write of the run (plan upsert,
    /// execution upsert, rehydration and the shadowed-placeholder sweep) then
    /// happens in one transaction: an error anywhere leaves the store exactly
    /// as it was.
    pub fn reconcile(&mut self, batch: IngestBatch) -> Result<RunReport, StoreError> {
        let migration = self.migrate()?;
        let IngestBatch {
            plans,
            plan_mode,
            executions,
        } = batch;

        let tx = self.conn.transaction()?;
        let mut report = RunReport {
            migration,
            plan_mode,
            execution_since: execution_high_water(&tx)?,
            ..Default::default()
        };

        let all_plans = write_plans(&tx, plans, plan_mode, &mut report)?;
        let snapshot = PlanSnapshot::from_plans(&all_plans);
        debug!(entities = snapshot.entity_count(), "plan snapshot built");

        let prepared = prepare_executions(executions, &snapshot);
        report.executions_written = upsert_executions(&tx, &prepared.records)?;
        report.feed_declared = prepared.feed_declared;
        report.matched = prepared.matched;
        report.unresolved = prepared.unresolved;
        report.collapsed = prepared.collapsed;

        report.rehydration = rehydrate_with(&tx, &snapshot)?;
        tx.commit()?;

        if report.is_idle() {
            info!("no new data");
        } else {
            info!(
                plans = report.plan_increment.len(),
                executions = report.executions_written,
                matched = report.matched,
                unresolved = report.unresolved,
                rehydrated = report.rehydration.rewritten,
                removed = report.rehydration.removed(),
                "run committed"
            );
        }
        Ok(report)
    }

    /// Re-resolve stored placeholder rows against the stored plans.
    ///
    /// Converges: a second call with unchanged plans does nothing.
    pub fn rehydrate(&mut self) -> Result<RehydrateReport, StoreError> {
        self.migrate()?;
        let tx = self.conn.transaction()?;
        let snapshot = PlanSnapshot::from_plans(&load_plans(&tx)?);
        let report = rehydrate_with(&tx, &snapshot)?;
        tx.commit()?;
        info!(
            rewritten = report.rewritten,
            discarded = report.discarded,
            swept = report.swept,
            "rehydration committed"
        );
        Ok(report)
    }
}

/// Apply the plan batch and return the full plan history the executions resolve against.
fn write_plans(
    conn: &Connection,
    incoming: Vec<PlanDisclosure>,
    mode: PlanMode,
    report: &mut RunReport,
) -> Result<Vec<Plan>, StoreError> {
    match mode {
        PlanMode::Incremental => {
            let existing = load_plans(conn)?;
            if incoming.is_empty() {
                return Ok(existing);
            }
            let since = plan_high_water(&existing);
            let merge = merge_incremental(existing, incoming, since);
            upsert_plans(conn, &merge.increment)?;
            info!(
                %since,
                written = merge.increment.len(),
                total = merge.merged.len(),
                "plans merged"
            );
            report.plan_since = Some(merge.since);
            report.plan_increment = merge.increment;
            Ok(merge.merged)
        }
        PlanMode::Rebuild => {
            let plans = fingerprint_batch(incoming);
            let cleared = conn.execute("DELETE FROM plans", [])?;
            upsert_plans(conn, &plans)?;
            info!(cleared, written = plans.len(), "plan table rebuilt");
            report.plan_increment = plans.clone();
            Ok(plans)
        }
    }
}

fn rehydrate_with(conn: &Connection, snapshot: &PlanSnapshot) -> Result<RehydrateReport, StoreError> {
    let rows = placeholder_rows(conn)?;
    let actions = plan_rehydration(&rows, snapshot, |entity, key, date| {
        row_exists(conn, entity, key, date)
    })?;
    let (rewritten, discarded) = apply_rehydration(conn, &actions)?;
    let swept = sweep_shadowed(conn)?;
    debug!(
        placeholders = rows.len(),
        rewritten, discarded, swept, "placeholder rows rehydrated"
    );
    Ok(RehydrateReport {
        rewritten,
        discarded,
        swept,
    })
}
