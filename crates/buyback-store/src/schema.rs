//! Table shapes of the persistent store.
//!
//! Dates are stored as ISO-8601 `VARCHAR` (`YYYY-MM-DD`) so that legacy text
//! columns copy across unchanged and lexical order is date order.

pub const PLANS: &str = "plans";
pub const EXECUTIONS: &str = "buyback_executions";
pub const EXECUTIONS_LEGACY: &str = "buyback_executions_legacy";
/// Table name used by stores written before plan identities existed.
pub const LEGACY_BUYBACK: &str = "buyback";
pub const SCHEMA_VERSION: &str = "schema_version";

/// Highest schema step this build knows how to produce.
pub const CURRENT_SCHEMA_VERSION: i64 = 2;

pub const CREATE_SCHEMA_VERSION: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version    BIGINT  NOT NULL,
    applied_at VARCHAR NOT NULL
)";

pub const CREATE_PLANS: &str = "
CREATE TABLE IF NOT EXISTS plans (
    entity_code   VARCHAR NOT NULL,
    display_name  VARCHAR,
    plan_key      VARCHAR NOT NULL,
    version       BIGINT  NOT NULL,
    announce_date VARCHAR,
    start_date    VARCHAR,
    price_lower   DOUBLE,
    price_upper   DOUBLE,
    amount_upper  DOUBLE,
    volume_upper  DOUBLE,
    latest_price  DOUBLE,
    progress_text VARCHAR,
    PRIMARY KEY (entity_code, plan_key, version)
)";

pub const CREATE_EXECUTIONS: &str = "
CREATE TABLE IF NOT EXISTS buyback_executions (
    entity_code   VARCHAR NOT NULL,
    plan_key      VARCHAR NOT NULL,
    display_name  VARCHAR,
    date          VARCHAR NOT NULL,
    amount        DOUBLE,
    volume        DOUBLE,
    avg_price     DOUBLE,
    progress_text VARCHAR,
    start_date    VARCHAR,
    end_date      VARCHAR,
    PRIMARY KEY (entity_code, plan_key, date)
)";

/// Column list of `plans`, in DDL order.
pub const PLAN_COLUMNS: &[&str] = &[
    "entity_code",
    "display_name",
    "plan_key",
    "version",
    "announce_date",
    "start_date",
    "price_lower",
    "price_upper",
    "amount_upper",
    "volume_upper",
    "latest_price",
    "progress_text",
];

/// Column list of `buyback_executions`, in DDL order.
pub const EXECUTION_COLUMNS: &[&str] = &[
    "entity_code",
    "plan_key",
    "display_name",
    "date",
    "amount",
    "volume",
    "avg_price",
    "progress_text",
    "start_date",
    "end_date",
];

/// Legacy column names accepted for each current execution column, first match wins.
///
/// `plan_key` is handled separately because it needs a placeholder fallback.
pub const LEGACY_EXECUTION_ALIASES: &[(&str, &[&str])] = &[
    ("entity_code", &["entity_code", "code"]),
    ("display_name", &["display_name", "name"]),
    ("date", &["date"]),
    ("amount", &["amount"]),
    ("volume", &["volume"]),
    ("avg_price", &["avg_price"]),
    ("progress_text", &["progress_text", "progress"]),
    ("start_date", &["start_date"]),
    ("end_date", &["end_date"]),
];

/// Legacy columns that may already hold a plan identity.
pub const LEGACY_PLAN_ALIASES: &[&str] = &["plan_key", "plan_code"];
