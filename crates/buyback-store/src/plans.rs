//! Reads and writes of the `plans` table.

use arrow::record_batch::RecordBatch;
use duckdb::{Connection, params};
use tracing::{debug, warn};

use buyback_core::Plan;

use crate::StoreError;
use crate::columns::{Columns, date_text};
use crate::schema::{PLAN_COLUMNS, PLANS};

/// Every stored plan, ordered by `(entity_code, plan_key, version)`.
pub(crate) fn load_plans(conn: &Connection) -> Result<Vec<Plan>, StoreError> {
    let sql = format!(
        "SELECT {} FROM {PLANS} ORDER BY entity_code, plan_key, version",
        PLAN_COLUMNS.join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let batches: Vec<RecordBatch> = stmt.query_arrow([])?.collect();

    let mut plans = Vec::new();
    for batch in &batches {
        decode_plans(&Columns::new(batch, PLANS), &mut plans)?;
    }
    debug!(count = plans.len(), "loaded plans");
    Ok(plans)
}

fn decode_plans(cols: &Columns<'_>, out: &mut Vec<Plan>) -> Result<(), StoreError> {
    let entity_code = cols.strings("entity_code")?;
    let display_name = cols.strings("display_name")?;
    let plan_key = cols.strings("plan_key")?;
    let version = cols.ints("version")?;
    let announce_date = cols.strings("announce_date")?;
    let start_date = cols.strings("start_date")?;
    let price_lower = cols.floats("price_lower")?;
    let price_upper = cols.floats("price_upper")?;
    let amount_upper = cols.floats("amount_upper")?;
    let volume_upper = cols.floats("volume_upper")?;
    let latest_price = cols.floats("latest_price")?;
    let progress_text = cols.strings("progress_text")?;

    for i in 0..cols.num_rows() {
        let (Some(code), Some(key)) = (entity_code.get(i), plan_key.get(i)) else {
            warn!(row = i, "plan row without identity skipped");
            continue;
        };
        let version = version
            .get(i)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(1);
        out.push(Plan {
            entity_code: code,
            display_name: display_name.get(i),
            plan_key: key,
            version,
            announce_date: announce_date.date(i),
            start_date: start_date.date(i),
            price_lower: price_lower.get(i),
            price_upper: price_upper.get(i),
            amount_upper: amount_upper.get(i),
            volume_upper: volume_upper.get(i),
            latest_price: latest_price.get(i),
            progress_text: progress_text.get(i),
        });
    }
    Ok(())
}

/// Upsert plan rows by `(entity_code, plan_key, version)`.
///
/// A re-disclosed row replaces the stored one field by field; plan history
/// rows are never deleted here.
pub(crate) fn upsert_plans(conn: &Connection, plans: &[Plan]) -> Result<usize, StoreError> {
    let mut stmt = conn.prepare(
        "INSERT INTO plans (entity_code, display_name, plan_key, version, announce_date,
                            start_date, price_lower, price_upper, amount_upper, volume_upper,
                            latest_price, progress_text)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT (entity_code, plan_key, version) DO UPDATE SET
            display_name  = excluded.display_name,
            announce_date = excluded.announce_date,
            start_date    = excluded.start_date,
            price_lower   = excluded.price_lower,
            price_upper   = excluded.price_upper,
            amount_upper  = excluded.amount_upper,
            volume_upper  = excluded.volume_upper,
            latest_price  = excluded.latest_price,
            progress_text = excluded.progress_text",
    )?;

    for plan in plans {
        stmt.execute(params![
            plan.entity_code,
            plan.display_name,
            plan.plan_key,
            i64::from(plan.version),
            date_text(plan.announce_date),
            date_text(plan.start_date),
            plan.price_lower,
            plan.price_upper,
            plan.amount_upper,
            plan.volume_upper,
            plan.latest_price,
            plan.progress_text,
        ])?;
    }
    debug!(count = plans.len(), "upserted plans");
    Ok(plans.len())
}
