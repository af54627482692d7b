//! Typed access to DuckDB query results returned as Arrow batches.
//!
//! DuckDB may hand back `Utf8` or `LargeUtf8`, `Int32` or `Int64` depending on
//! the expression, so every column is cast to one canonical type first.

use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;

use crate::StoreError;

/// One result batch with columns looked up by name.
pub(crate) struct Columns<'a> {
    batch: &'a RecordBatch,
    table: &'a str,
}

impl<'a> Columns<'a> {
    pub(crate) fn new(batch: &'a RecordBatch, table: &'a str) -> Self {
        Self { batch, table }
    }

    pub(crate) fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    fn column(&self, name: &str, to: &DataType) -> Result<ArrayRef, StoreError> {
        let col = self
            .batch
            .column_by_name(name)
            .ok_or_else(|| StoreError::MissingColumn {
                table: self.table.to_string(),
                column: name.to_string(),
            })?;
        Ok(cast(col, to)?)
    }

    pub(crate) fn strings(&self, name: &str) -> Result<TextColumn, StoreError> {
        let arr = self.column(name, &DataType::Utf8)?;
        let arr = arr
            .as_any()
            .downcast_ref::<StringArray>()
            .cloned()
            .ok_or_else(|| StoreError::Other(format!("{name}: not castable to utf8")))?;
        Ok(TextColumn(arr))
    }

    pub(crate) fn floats(&self, name: &str) -> Result<FloatColumn, StoreError> {
        let arr = self.column(name, &DataType::Float64)?;
        let arr = arr
            .as_any()
            .downcast_ref::<Float64Array>()
            .cloned()
            .ok_or_else(|| StoreError::Other(format!("{name}: not castable to f64")))?;
        Ok(FloatColumn(arr))
    }

    pub(crate) fn ints(&self, name: &str) -> Result<IntColumn, StoreError> {
        let arr = self.column(name, &DataType::Int64)?;
        let arr = arr
            .as_any()
            .downcast_ref::<Int64Array>()
            .cloned()
            .ok_or_else(|| StoreError::Other(format!("{name}: not castable to i64")))?;
        Ok(IntColumn(arr))
    }
}

pub(crate) struct TextColumn(StringArray);

impl TextColumn {
    pub(crate) fn get(&self, i: usize) -> Option<String> {
        (!self.0.is_null(i)).then(|| self.0.value(i).to_string())
    }

    /// Lenient date read; legacy rows may carry a time suffix.
    pub(crate) fn date(&self, i: usize) -> Option<NaiveDate> {
        if self.0.is_null(i) {
            return None;
        }
        buyback_core::normalize::parse_date(self.0.value(i))
    }
}

pub(crate) struct FloatColumn(Float64Array);

impl FloatColumn {
    pub(crate) fn get(&self, i: usize) -> Option<f64> {
        (!self.0.is_null(i)).then(|| self.0.value(i))
    }
}

pub(crate) struct IntColumn(Int64Array);

impl IntColumn {
    pub(crate) fn get(&self, i: usize) -> Option<i64> {
        (!self.0.is_null(i)).then(|| self.0.value(i))
    }
}

/// ISO text form used for every stored date.
pub(crate) fn date_text(d: Option<NaiveDate>) -> Option<String> {
    d.map(|d| d.format("%Y-%m-%d").to_string())
}
