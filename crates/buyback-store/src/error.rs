use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no results for query")]
    NoResults,

    #[cfg(feature = "duckdb")]
    #[error("duckdb error: {0}")]
    DuckDb(#[from] ::duckdb::Error),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[cfg(feature = "duckdb")]
    #[error("schema migration of `{table}` failed: {source}")]
    Migration {
        table: String,
        #[source]
        source: ::duckdb::Error,
    },

    #[error("schema migration of `{table}` would lose rows: {before} before, {after} after")]
    MigrationRowLoss {
        table: String,
        before: usize,
        after: usize,
    },

    #[error("schema migration of `{table}` blocked: {rows} legacy rows have no date")]
    MigrationUndatedRows { table: String, rows: usize },

    #[error("column `{column}` missing from result of `{table}`")]
    MissingColumn { table: String, column: String },

    #[error("{0}")]
    Other(String),
}
