mod export;
mod input;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use buyback_core::{NormalizeReport, normalize_executions, normalize_plans};
use buyback_store::schema::CURRENT_SCHEMA_VERSION;
use buyback_store::{DuckStore, IngestBatch, PlanMode};

use crate::export::Exporter;

/// Buyback plan ledger: plan identities, execution reconciliation and reports.
#[derive(Parser, Debug)]
#[command(name = "buyback", version)]
struct Cli {
    /// DuckDB store file
    #[arg(long, env = "BUYBACK_DB", default_value = "buyback.duckdb", global = true)]
    db: PathBuf,

    /// Directory for CSV reports
    #[arg(long, env = "BUYBACK_OUT_DIR", default_value = "result", global = true)]
    out_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bring the store to the current schema
    Migrate,

    /// Ingest plan and/or execution feeds in one transaction
    Ingest {
        /// Plan disclosure feed (CSV)
        #[arg(long)]
        plans: Option<PathBuf>,

        /// Execution feed (CSV)
        #[arg(long)]
        executions: Option<PathBuf>,

        /// Replace the stored plan table instead of merging
        #[arg(long)]
        rebuild: bool,
    },

    /// Re-resolve placeholder execution rows against the stored plans
    Rehydrate,

    /// Write plan, overlap and increment reports from the store
    Export {
        /// Lower bound for the plan increment (defaults to the plan high-water mark)
        #[arg(long)]
        plans_since: Option<NaiveDate>,

        /// Lower bound for the execution increment (defaults to the execution high-water mark)
        #[arg(long)]
        executions_since: Option<NaiveDate>,
    },

    /// Show row counts and high-water marks (read-only; never migrates)
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Serialize)]
struct Status {
    schema_version: i64,
    plans: usize,
    executions: usize,
    placeholders: usize,
    plan_high_water: NaiveDate,
    execution_high_water: NaiveDate,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    info!("buyback v{}", env!("CARGO_PKG_VERSION"));

    let mut store = DuckStore::open_persistent(&cli.db)
        .with_context(|| format!("opening store {}", cli.db.display()))?;

    match cli.command {
        Command::Migrate => {
            let report = store.migrate().context("schema migration")?;
            if report.changed() {
                println!(
                    "migrated schema {} -> {} ({} legacy rows carried forward)",
                    report.from_version, report.to_version, report.rows_migrated
                );
            } else {
                println!("schema is current (version {})", report.to_version);
            }
        }
        Command::Ingest {
            plans,
            executions,
            rebuild,
        } => ingest(&mut store, &cli.out_dir, plans.as_deref(), executions.as_deref(), rebuild)?,
        Command::Rehydrate => {
            let report = store.rehydrate().context("rehydration")?;
            println!(
                "rewritten {}, discarded {}, swept {}",
                report.rewritten, report.discarded, report.swept
            );
        }
        Command::Export {
            plans_since,
            executions_since,
        } => export_all(&mut store, &cli.out_dir, plans_since, executions_since)?,
        Command::Status { json } => {
            let status = read_status(&store)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("schema version        {}", status.schema_version);
                println!("plans                 {}", status.plans);
                println!("executions            {}", status.executions);
                println!("  on placeholder      {}", status.placeholders);
                println!("plan high-water       {}", status.plan_high_water);
                println!("execution high-water  {}", status.execution_high_water);
            }
        }
    }
    Ok(())
}

/// Gather status without migrating; an outdated store is reported, not upgraded.
fn read_status(store: &DuckStore) -> Result<Status> {
    let schema_version = store.schema_version().context("reading schema version")?;
    if schema_version < CURRENT_SCHEMA_VERSION {
        bail!(
            "store schema version {schema_version} is behind {CURRENT_SCHEMA_VERSION}; \
             run `buyback migrate` first"
        );
    }
    Ok(Status {
        schema_version,
        plans: store.plan_count()?,
        executions: store.execution_count()?,
        placeholders: store.placeholder_count()?,
        plan_high_water: store.plan_high_water()?,
        execution_high_water: store.execution_high_water()?,
    })
}

fn ingest(
    store: &mut DuckStore,
    out_dir: &Path,
    plans: Option<&Path>,
    executions: Option<&Path>,
    rebuild: bool,
) -> Result<()> {
    let mut batch = IngestBatch {
        plan_mode: if rebuild {
            PlanMode::Rebuild
        } else {
            PlanMode::Incremental
        },
        ..Default::default()
    };

    if let Some(path) = plans {
        let (disclosures, report) = normalize_plans(&input::read_records(path)?);
        log_normalize("plans", path, &report);
        batch.plans = disclosures;
    }
    if let Some(path) = executions {
        let (records, report) = normalize_executions(&input::read_records(path)?);
        log_normalize("executions", path, &report);
        batch.executions = records;
    }
    if batch.plans.is_empty() && batch.executions.is_empty() {
        info!("no upstream rows; rehydrating only");
    }

    let run = store.reconcile(batch).context("reconciliation run")?;
    if let Some(mark) = run.execution_since {
        info!(%mark, "execution increment starts at previous high-water mark");
    }

    let exporter = Exporter::new(out_dir)?;
    exporter.plans_increment(&run.plan_increment)?;
    exporter.executions_increment(&store.executions(run.execution_since)?)?;
    exporter.plans_all(&store.plans()?)?;
    exporter.overlap_hints(&store.overlap_hints()?)?;

    println!(
        "plans +{}, executions {} (matched {}, declared {}, placeholder {}), rehydrated {}, removed {}",
        run.plan_increment.len(),
        run.executions_written,
        run.matched,
        run.feed_declared,
        run.unresolved,
        run.rehydration.rewritten,
        run.rehydration.removed(),
    );
    Ok(())
}

fn log_normalize(feed: &str, path: &Path, report: &NormalizeReport) {
    info!(feed, path = %path.display(), accepted = report.accepted, "feed normalized");
    if report.dropped() > 0 {
        warn!(
            feed,
            missing_code = report.missing_code,
            missing_date = report.missing_date,
            "rows dropped during normalization"
        );
    }
}

fn export_all(
    store: &mut DuckStore,
    out_dir: &Path,
    plans_since: Option<NaiveDate>,
    executions_since: Option<NaiveDate>,
) -> Result<()> {
    store.migrate().context("schema migration")?;
    let plans_since = match plans_since {
        Some(d) => d,
        None => store.plan_high_water()?,
    };
    let executions_since = match executions_since {
        Some(d) => d,
        None => store.execution_high_water()?,
    };

    let exporter = Exporter::new(out_dir)?;
    exporter.plans_all(&store.plans()?)?;
    exporter.overlap_hints(&store.overlap_hints()?)?;
    exporter.plans_increment(&store.plans_since(plans_since)?)?;
    exporter.executions_increment(&store.executions(Some(executions_since))?)?;
    println!("reports written to {}", out_dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn ingest_flags_parse() {
        let cli = Cli::try_parse_from([
            "buyback",
            "--db",
            "/tmp/x.duckdb",
            "ingest",
            "--plans",
            "plans.csv",
            "--rebuild",
        ])
        .unwrap();
        assert_eq!(cli.db, PathBuf::from("/tmp/x.duckdb"));
        match cli.command {
            Command::Ingest {
                plans,
                executions,
                rebuild,
            } => {
                assert_eq!(plans, Some(PathBuf::from("plans.csv")));
                assert!(executions.is_none());
                assert!(rebuild);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn status_leaves_unmigrated_store_alone() {
        let store = DuckStore::open().unwrap();
        let err = read_status(&store).unwrap_err();
        assert!(err.to_string().contains("buyback migrate"));

        let tables: i64 = store
            .connection()
            .query_row(
                "SELECT count(*) FROM information_schema.tables WHERE table_schema = 'main'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 0);
    }

    #[test]
    fn status_reads_migrated_store() {
        let mut store = DuckStore::open().unwrap();
        store.migrate().unwrap();
        let status = read_status(&store).unwrap();
        assert_eq!(status.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(status.plans, 0);
    }

    #[test]
    fn export_since_parses_iso_date() {
        let cli =
            Cli::try_parse_from(["buyback", "export", "--plans-since", "2024-01-10"]).unwrap();
        match cli.command {
            Command::Export { plans_since, .. } => {
                assert_eq!(plans_since, NaiveDate::from_ymd_opt(2024, 1, 10));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
