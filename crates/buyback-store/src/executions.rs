//! Reads and writes of the `buyback_executions` table.

use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;
use duckdb::{Connection, params};
use tracing::{debug, warn};

use buyback_core::identity::PLACEHOLDER_PREFIX;
use buyback_core::{ExecutionRecord, PlaceholderRow, PlanIdentity, Rehydration};

use crate::StoreError;
use crate::columns::{Columns, date_text};
use crate::schema::{EXECUTION_COLUMNS, EXECUTIONS};

/// A stored execution row with its key exactly as written.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredExecution {
    pub plan_key: String,
    pub record: ExecutionRecord,
}

/// Upsert a prepared batch by `(entity_code, plan_key, date)`.
///
/// On conflict each nullable column keeps its stored value when one exists
/// and takes the incoming value only when the stored one is null.
pub(crate) fn upsert_executions(
    conn: &Connection,
    records: &[ExecutionRecord],
) -> Result<usize, StoreError> {
    let mut stmt = conn.prepare(
        "INSERT INTO buyback_executions (entity_code, plan_key, display_name, date, amount,
                                         volume, avg_price, progress_text, start_date, end_date)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT (entity_code, plan_key, date) DO UPDATE SET
            display_name  = COALESCE(display_name, excluded.display_name),
            amount        = COALESCE(amount, excluded.amount),
            volume        = COALESCE(volume, excluded.volume),
            avg_price     = COALESCE(avg_price, excluded.avg_price),
            progress_text = COALESCE(progress_text, excluded.progress_text),
            start_date    = COALESCE(start_date, excluded.start_date),
            end_date      = COALESCE(end_date, excluded.end_date)",
    )?;

    for r in records {
        stmt.execute(params![
            r.entity_code,
            r.storage_key(),
            r.display_name,
            date_text(Some(r.date)),
            r.amount,
            r.volume,
            r.avg_price,
            r.progress_text,
            date_text(r.start_date),
            date_text(r.end_date),
        ])?;
    }
    debug!(count = records.len(), "upserted executions");
    Ok(records.len())
}

/// Every row whose key carries the placeholder prefix.
pub(crate) fn placeholder_rows(conn: &Connection) -> Result<Vec<PlaceholderRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT entity_code, plan_key, date FROM buyback_executions
         WHERE starts_with(plan_key, ?)
         ORDER BY entity_code, date",
    )?;
    let raw = stmt
        .query_map([PLACEHOLDER_PREFIX], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut rows = Vec::with_capacity(raw.len());
    for (entity_code, stored_key, date) in raw {
        match buyback_core::normalize::parse_date(&date) {
            Some(date) => rows.push(PlaceholderRow {
                entity_code,
                stored_key,
                date,
            }),
            None => warn!(entity = %entity_code, date = %date, "placeholder row with unreadable date left as is"),
        }
    }
    Ok(rows)
}

pub(crate) fn row_exists(
    conn: &Connection,
    entity_code: &str,
    plan_key: &str,
    date: NaiveDate,
) -> Result<bool, StoreError> {
    let n: i64 = conn.query_row(
        "SELECT count(*) FROM buyback_executions
         WHERE entity_code = ? AND plan_key = ? AND date = ?",
        params![entity_code, plan_key, date_text(Some(date))],
        |row| row.get(0),
    )?;
    Ok(n > 0)
}

/// Apply rehydration decisions. Returns `(rewritten, discarded)`.
pub(crate) fn apply_rehydration(
    conn: &Connection,
    actions: &[Rehydration],
) -> Result<(usize, usize), StoreError> {
    let mut rewritten = 0;
    let mut discarded = 0;
    for action in actions {
        let row = action.row();
        let date = date_text(Some(row.date));
        match action {
            Rehydration::Rewrite { plan_key, .. } => {
                // plan_key is part of the primary key: move the row by copy and delete.
                // Nothing is copied when another placeholder spelling got there first.
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO buyback_executions (entity_code, plan_key, display_name, date,
                                                     amount, volume, avg_price, progress_text,
                                                     start_date, end_date)
                     SELECT entity_code, ?, display_name, date, amount, volume, avg_price,
                            progress_text, start_date, end_date
                     FROM buyback_executions
                     WHERE entity_code = ? AND plan_key = ? AND date = ?",
                    params![plan_key, row.entity_code, row.stored_key, date],
                )?;
                delete_row(conn, &row.entity_code, &row.stored_key, &date)?;
                if inserted > 0 {
                    rewritten += 1;
                } else {
                    discarded += 1;
                }
            }
            Rehydration::Discard { .. } => {
                delete_row(conn, &row.entity_code, &row.stored_key, &date)?;
                discarded += 1;
            }
        }
    }
    Ok((rewritten, discarded))
}

fn delete_row(
    conn: &Connection,
    entity_code: &str,
    plan_key: &str,
    date: &Option<String>,
) -> Result<(), StoreError> {
    conn.execute(
        "DELETE FROM buyback_executions WHERE entity_code = ? AND plan_key = ? AND date = ?",
        params![entity_code, plan_key, date],
    )?;
    Ok(())
}

/// Delete placeholder rows shadowed by a real-keyed row for the same entity and date.
pub(crate) fn sweep_shadowed(conn: &Connection) -> Result<usize, StoreError> {
    let n = conn.execute(
        "DELETE FROM buyback_executions
         WHERE starts_with(plan_key, $1)
           AND EXISTS (
               SELECT 1 FROM buyback_executions AS other
               WHERE other.entity_code = buyback_executions.entity_code
                 AND other.date = buyback_executions.date
                 AND NOT starts_with(other.plan_key, $1)
           )",
        params![PLACEHOLDER_PREFIX],
    )?;
    if n > 0 {
        debug!(count = n, "shadowed placeholder rows removed");
    }
    Ok(n)
}

/// Rows dated on or after `since` (all rows when `None`), ordered by entity, key and date.
pub(crate) fn load_executions(
    conn: &Connection,
    since: Option<NaiveDate>,
) -> Result<Vec<StoredExecution>, StoreError> {
    let mut sql = format!("SELECT {} FROM {EXECUTIONS}", EXECUTION_COLUMNS.join(", "));
    if since.is_some() {
        sql.push_str(" WHERE date >= ?");
    }
    sql.push_str(" ORDER BY entity_code, plan_key, date");

    let mut stmt = conn.prepare(&sql)?;
    let batches: Vec<RecordBatch> = match date_text(since) {
        Some(since) => stmt.query_arrow([since])?.collect(),
        None => stmt.query_arrow([])?.collect(),
    };

    let mut out = Vec::new();
    for batch in &batches {
        decode_executions(&Columns::new(batch, EXECUTIONS), &mut out)?;
    }
    Ok(out)
}

fn decode_executions(cols: &Columns<'_>, out: &mut Vec<StoredExecution>) -> Result<(), StoreError> {
    let entity_code = cols.strings("entity_code")?;
    let plan_key = cols.strings("plan_key")?;
    let display_name = cols.strings("display_name")?;
    let date = cols.strings("date")?;
    let amount = cols.floats("amount")?;
    let volume = cols.floats("volume")?;
    let avg_price = cols.floats("avg_price")?;
    let progress_text = cols.strings("progress_text")?;
    let start_date = cols.strings("start_date")?;
    let end_date = cols.strings("end_date")?;

    for i in 0..cols.num_rows() {
        let (Some(code), Some(key), Some(day)) = (entity_code.get(i), plan_key.get(i), date.date(i))
        else {
            warn!(row = i, "execution row with unreadable key skipped");
            continue;
        };
        out.push(StoredExecution {
            record: ExecutionRecord {
                entity_code: code,
                identity: PlanIdentity::from_storage_key(&key),
                display_name: display_name.get(i),
                date: day,
                amount: amount.get(i),
                volume: volume.get(i),
                avg_price: avg_price.get(i),
                progress_text: progress_text.get(i),
                start_date: start_date.date(i),
                end_date: end_date.date(i),
            },
            plan_key: key,
        });
    }
    Ok(())
}

/// Latest stored execution date.
pub(crate) fn execution_high_water(conn: &Connection) -> Result<Option<NaiveDate>, StoreError> {
    let max: Option<String> =
        conn.query_row("SELECT max(date) FROM buyback_executions", [], |row| row.get(0))?;
    Ok(max.as_deref().and_then(buyback_core::normalize::parse_date))
}
