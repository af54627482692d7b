//! Schema migration.
//!
//! Brings a store to the current shape before anything else touches it:
//!
//! 1. `schema_version` and `plans` are created if absent.
//! 2. `buyback_executions` is checked for a `plan_key` column. A table without
//!    one is renamed to `buyback_executions_legacy`, the current shape is
//!    created, and every legacy row is copied across. A legacy `buyback` table
//!    from older tooling is adopted the same way.
//! 3. Rows with no usable plan identity get the placeholder key of their
//!    entity. Legacy column names (`code`, `name`, `progress`, `plan_code`)
//!    map onto the current ones.
//!
//! Row counts are compared before the legacy table is dropped; any
//! difference aborts the migration. Legacy rows without a date cannot be keyed
//! and abort it too, naming how many need repair. Rows without an entity code
//! are carried with an empty code. A current store is left untouched.

use chrono::Utc;
use duckdb::{Connection, params};
use tracing::{info, warn};

use buyback_core::identity::PLACEHOLDER_PREFIX;

use crate::StoreError;
use crate::schema::{
    CREATE_EXECUTIONS, CREATE_PLANS, CREATE_SCHEMA_VERSION, CURRENT_SCHEMA_VERSION, EXECUTIONS,
    EXECUTIONS_LEGACY, LEGACY_BUYBACK, LEGACY_EXECUTION_ALIASES, LEGACY_PLAN_ALIASES, SCHEMA_VERSION,
};

/// What a migration run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Schema version found before the run (0 for a fresh or untracked store).
    pub from_version: i64,
    pub to_version: i64,
    /// Legacy table whose rows were carried forward, if any.
    pub legacy_table: Option<String>,
    pub rows_migrated: usize,
    /// Rows that received a placeholder identity during the copy.
    pub placeholders_synthesized: usize,
}

impl MigrationReport {
    pub fn changed(&self) -> bool {
        self.from_version != self.to_version || self.legacy_table.is_some()
    }
}

/// Run every pending step on `conn`. The caller owns the transaction.
pub fn run(conn: &Connection) -> Result<MigrationReport, StoreError> {
    step(conn, SCHEMA_VERSION, |c| c.execute_batch(CREATE_SCHEMA_VERSION))?;
    let from_version = schema_version(conn)?;
    let mut report = MigrationReport {
        from_version,
        to_version: from_version,
        ..Default::default()
    };

    step(conn, "plans", |c| c.execute_batch(CREATE_PLANS))?;

    match table_columns(conn, EXECUTIONS)? {
        Some(cols) if cols.iter().any(|c| c == "plan_key") => {}
        Some(cols) => {
            warn!(table = EXECUTIONS, "execution table lacks plan_key; migrating legacy rows");
            step(conn, EXECUTIONS, |c| {
                c.execute_batch(&format!("ALTER TABLE {EXECUTIONS} RENAME TO {EXECUTIONS_LEGACY}"))
            })?;
            copy_legacy(conn, EXECUTIONS_LEGACY, &cols, &mut report)?;
        }
        None => match table_columns(conn, LEGACY_BUYBACK)? {
            Some(cols) => {
                warn!(table = LEGACY_BUYBACK, "adopting legacy buyback table");
                copy_legacy(conn, LEGACY_BUYBACK, &cols, &mut report)?;
            }
            None => step(conn, EXECUTIONS, |c| c.execute_batch(CREATE_EXECUTIONS))?,
        },
    }

    if from_version < CURRENT_SCHEMA_VERSION {
        let applied_at = Utc::now().to_rfc3339();
        step(conn, SCHEMA_VERSION, |c| {
            c.execute(
                "INSERT INTO schema_version (version, applied_at) VALUES (?, ?)",
                params![CURRENT_SCHEMA_VERSION, applied_at],
            )
            .map(|_| ())
        })?;
        report.to_version = CURRENT_SCHEMA_VERSION;
    } else if from_version > CURRENT_SCHEMA_VERSION {
        warn!(
            found = from_version,
            known = CURRENT_SCHEMA_VERSION,
            "store schema is newer than this build"
        );
    }

    if report.changed() {
        info!(
            from = report.from_version,
            to = report.to_version,
            rows_migrated = report.rows_migrated,
            "schema migrated"
        );
    }
    Ok(report)
}

/// Tag DuckDB failures with the table being migrated.
fn step<F>(conn: &Connection, table: &str, f: F) -> Result<(), StoreError>
where
    F: FnOnce(&Connection) -> duckdb::Result<()>,
{
    f(conn).map_err(|source| StoreError::Migration {
        table: table.to_string(),
        source,
    })
}

/// Recorded schema version without touching the store; 0 when untracked.
pub(crate) fn recorded_version(conn: &Connection) -> Result<i64, StoreError> {
    match table_columns(conn, SCHEMA_VERSION)? {
        Some(_) => schema_version(conn),
        None => Ok(0),
    }
}

fn schema_version(conn: &Connection) -> Result<i64, StoreError> {
    let version: Option<i64> = conn
        .query_row("SELECT max(version) FROM schema_version", [], |row| row.get(0))
        .map_err(|source| StoreError::Migration {
            table: SCHEMA_VERSION.to_string(),
            source,
        })?;
    Ok(version.unwrap_or(0))
}

/// Column names of `table` in the main schema, or `None` when it does not exist.
pub(crate) fn table_columns(
    conn: &Connection,
    table: &str,
) -> Result<Option<Vec<String>>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT column_name FROM information_schema.columns
         WHERE table_schema = 'main' AND table_name = ?
         ORDER BY ordinal_position",
    )?;
    let cols = stmt
        .query_map([table], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok((!cols.is_empty()).then_some(cols))
}

fn count_rows(conn: &Connection, table: &str) -> Result<usize, StoreError> {
    let n: i64 = conn.query_row(&format!("SELECT count(*) FROM {table}"), [], |row| row.get(0))?;
    Ok(n as usize)
}

/// Create the current execution table and copy `source` into it, then drop `source`.
fn copy_legacy(
    conn: &Connection,
    source: &str,
    source_cols: &[String],
    report: &mut MigrationReport,
) -> Result<(), StoreError> {
    let copy = LegacyCopy::new(source, source_cols);

    // A row without a date has no key in the current shape and cannot be carried.
    let undated = count_matching(conn, source, &copy.missing_date)?;
    if undated > 0 {
        return Err(StoreError::MigrationUndatedRows {
            table: source.to_string(),
            rows: undated,
        });
    }
    let no_entity = count_matching(conn, source, &copy.missing_entity)?;
    if no_entity > 0 {
        warn!(
            table = source,
            rows = no_entity,
            "legacy rows without an entity code carried under the UNKNOWN placeholder"
        );
    }

    let before = count_rows(conn, source)?;
    step(conn, EXECUTIONS, |c| c.execute_batch(CREATE_EXECUTIONS))?;

    let placeholders = count_matching(conn, source, &copy.placeholder)?;
    step(conn, EXECUTIONS, |c| {
        c.execute(&copy.insert, params![PLACEHOLDER_PREFIX]).map(|_| ())
    })?;

    let after = count_rows(conn, EXECUTIONS)?;
    if after != before {
        return Err(StoreError::MigrationRowLoss {
            table: source.to_string(),
            before,
            after,
        });
    }
    step(conn, source, |c| c.execute_batch(&format!("DROP TABLE {source}")))?;

    info!(from = source, rows = after, placeholders, "legacy execution rows carried forward");
    report.legacy_table = Some(source.to_string());
    report.rows_migrated = after;
    report.placeholders_synthesized = placeholders;
    Ok(())
}

fn count_matching(conn: &Connection, table: &str, predicate: &str) -> Result<usize, StoreError> {
    let n: i64 = conn.query_row(
        &format!("SELECT count(*) FROM {table} WHERE {predicate}"),
        [],
        |row| row.get(0),
    )?;
    Ok(n as usize)
}

/// SQL for carrying one legacy table onto the current shape.
struct LegacyCopy {
    /// `INSERT … SELECT`; the placeholder prefix is its single parameter.
    insert: String,
    /// Rows that will receive a placeholder key.
    placeholder: String,
    missing_entity: String,
    missing_date: String,
}

impl LegacyCopy {
    fn new(source: &str, source_cols: &[String]) -> Self {
        let entity_col = first_present(source_cols, &["entity_code", "code"]);
        let entity_expr = match entity_col {
            Some(col) => format!("COALESCE(CAST(\"{col}\" AS VARCHAR), '')"),
            None => "''".to_string(),
        };

        let plan_text = first_present(source_cols, LEGACY_PLAN_ALIASES)
            .map(|col| format!("NULLIF(trim(CAST(\"{col}\" AS VARCHAR)), '')"));
        let fallback =
            format!("CAST(? AS VARCHAR) || COALESCE(NULLIF({entity_expr}, ''), 'UNKNOWN')");
        let plan_expr = match &plan_text {
            Some(text) => format!("COALESCE({text}, {fallback})"),
            None => fallback,
        };
        let placeholder = match &plan_text {
            Some(text) => format!("{text} IS NULL"),
            None => "TRUE".to_string(),
        };

        let mut targets = vec!["plan_key".to_string()];
        let mut exprs = vec![plan_expr];
        for (target, aliases) in LEGACY_EXECUTION_ALIASES {
            let expr = match (*target, first_present(source_cols, aliases)) {
                ("entity_code", _) => entity_expr.clone(),
                ("amount" | "volume" | "avg_price", Some(col)) => {
                    format!("TRY_CAST(\"{col}\" AS DOUBLE)")
                }
                ("date" | "start_date" | "end_date", Some(col)) => iso_date_expr(col),
                (_, Some(col)) => format!("CAST(\"{col}\" AS VARCHAR)"),
                (_, None) => "NULL".to_string(),
            };
            targets.push((*target).to_string());
            exprs.push(expr);
        }

        let insert = format!(
            "INSERT INTO {EXECUTIONS} ({}) SELECT {} FROM {source}",
            targets.join(", "),
            exprs.join(", ")
        );
        let missing_entity = match entity_col {
            Some(col) => format!("\"{col}\" IS NULL"),
            None => "TRUE".to_string(),
        };
        let missing_date = match first_present(source_cols, &["date"]) {
            Some(col) => format!("\"{col}\" IS NULL"),
            None => "TRUE".to_string(),
        };
        Self {
            insert,
            placeholder,
            missing_entity,
            missing_date,
        }
    }
}

/// Rewrite a legacy date column to `YYYY-MM-DD` text.
///
/// Timestamps and the slash, dot and compact forms are recognised; anything
/// else is carried over verbatim so that no row is lost.
fn iso_date_expr(col: &str) -> String {
    let text = format!("trim(CAST(\"{col}\" AS VARCHAR))");
    format!(
        "COALESCE(\
            strftime(TRY_CAST({text} AS TIMESTAMP), '%Y-%m-%d'), \
            strftime(try_strptime({text}, '%Y/%m/%d'), '%Y-%m-%d'), \
            strftime(try_strptime({text}, '%Y.%m.%d'), '%Y-%m-%d'), \
            strftime(try_strptime({text}, '%Y%m%d'), '%Y-%m-%d'), \
            {text})"
    )
}

/// First alias that names an existing column.
fn first_present<'a>(cols: &[String], aliases: &[&'a str]) -> Option<&'a str> {
    aliases
        .iter()
        .copied()
        .find(|alias| cols.iter().any(|c| c.eq_ignore_ascii_case(alias)))
}
