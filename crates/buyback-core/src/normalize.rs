//! Field normalization for plan-disclosure and execution feeds.
//!
//! Upstream feeds have renamed their columns several times (Chinese display
//! headers, upper-snake API fields, short pinyin codes). Each canonical field
//! carries an ordered alias list; the first alias with a non-blank value in the
//! row wins.
//!
//! Nothing here fails: malformed numbers and dates become `None`. Rows that
//! cannot be keyed at all (no entity code, or an execution without a date) are
//! dropped and counted in the returned [`NormalizeReport`].

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use tracing::{debug, warn};

use crate::identity::PlanIdentity;
use crate::model::{ExecutionRecord, PlanDisclosure};

/// One source row: column name → raw text value.
pub type RawRecord = HashMap<String, String>;

// ── Plan-disclosure feed aliases ──

const PLAN_CODE: &[&str] = &["股票代码", "代码", "SECURITY_CODE", "SCODE", "entity_code", "code"];
const PLAN_NAME: &[&str] = &[
    "股票简称",
    "名称",
    "SECURITY_NAME_ABBR",
    "SNAME",
    "display_name",
    "sec_name",
    "name",
];
const PLAN_LATEST_PRICE: &[&str] = &["最新价", "latest_price"];
const PLAN_PRICE_RANGE: &[&str] = &["计划回购价格区间", "price_range"];
const PLAN_PRICE_LOWER: &[&str] = &["price_lower"];
const PLAN_PRICE_UPPER: &[&str] = &["price_upper"];
const PLAN_VOLUME_UPPER: &[&str] = &["计划回购数量区间-上限", "volume_upper"];
const PLAN_AMOUNT_UPPER: &[&str] = &["计划回购金额区间-上限", "amount_upper"];
const PLAN_START: &[&str] = &["回购起始时间", "start_date"];
const PLAN_PROGRESS: &[&str] = &["实施进度", "progress_text"];
const PLAN_ANNOUNCE: &[&str] = &["最新公告日期", "announce_date"];

// ── Execution feed aliases ──

const EXEC_CODE: &[&str] = &["股票代码", "SECURITY_CODE", "SCODE", "entity_code", "code"];
const EXEC_NAME: &[&str] = &["股票简称", "SECURITY_NAME_ABBR", "SNAME", "display_name", "name"];
const EXEC_DATE: &[&str] = &[
    "披露日期",
    "记录日期",
    "公告日期",
    "TDATE",
    "JLRQ",
    "NOTICE_DATE",
    "ANNOUNCE_DATE",
    "date",
];
const EXEC_AMOUNT: &[&str] = &["已回购金额", "BUYBACK_AMT", "HGJE", "amount"];
const EXEC_VOLUME: &[&str] = &["已回购数量", "BUYBACK_VOL", "HGSL", "volume"];
const EXEC_AVG_PRICE: &[&str] = &["已回购均价", "HGZDJ", "avg_price"];
const EXEC_PROGRESS: &[&str] = &["回购进度", "REPURCHASE_PROGRESS", "progress_text", "progress"];
const EXEC_START: &[&str] = &["回购开始日期", "START_DATE", "start_date"];
const EXEC_END: &[&str] = &["回购截止日期", "END_DATE", "end_date"];
const EXEC_PLAN_REF: &[&str] = &[
    "HKCODE",
    "计划编号",
    "PLAN_CODE",
    "PLAN_ID",
    "REPURCHASE_PLAN_ID",
    "REPURCHASE_ID",
    "BUYBACK_PLAN_CODE",
    "plan_key",
    "plan_code",
];

/// Tokens that upstream feeds use for "no value".
const MISSING: &[&str] = &["", "nan", "none", "null", "nat", "-", "--", "—", "——"];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d", "%Y.%m.%d"];

/// Row accounting for one normalization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    pub accepted: usize,
    pub missing_code: usize,
    pub missing_date: usize,
}

impl NormalizeReport {
    pub fn dropped(&self) -> usize {
        self.missing_code + self.missing_date
    }
}

/// Normalize a plan-disclosure batch.
///
/// Rows without an entity code are dropped; a missing announce date is kept
/// as `None` and fingerprints with the empty token.
pub fn normalize_plans(rows: &[RawRecord]) -> (Vec<PlanDisclosure>, NormalizeReport) {
    let mut report = NormalizeReport::default();
    let mut out = Vec::with_capacity(rows.len());

    for row in rows {
        let Some(entity_code) = pick(row, PLAN_CODE).and_then(parse_entity_code) else {
            report.missing_code += 1;
            continue;
        };

        let (price_lower, price_upper) = match pick(row, PLAN_PRICE_RANGE) {
            Some(range) => parse_price_range(range),
            None => (
                pick(row, PLAN_PRICE_LOWER).and_then(parse_number),
                pick(row, PLAN_PRICE_UPPER).and_then(parse_number),
            ),
        };

        out.push(PlanDisclosure {
            entity_code,
            display_name: pick(row, PLAN_NAME).map(str::to_string),
            announce_date: pick(row, PLAN_ANNOUNCE).and_then(parse_date),
            start_date: pick(row, PLAN_START).and_then(parse_date),
            price_lower,
            price_upper,
            amount_upper: pick(row, PLAN_AMOUNT_UPPER).and_then(parse_number),
            volume_upper: pick(row, PLAN_VOLUME_UPPER).and_then(parse_number),
            latest_price: pick(row, PLAN_LATEST_PRICE).and_then(parse_number),
            progress_text: pick(row, PLAN_PROGRESS).map(str::to_string),
        });
        report.accepted += 1;
    }

    if report.dropped() > 0 {
        warn!(dropped = report.dropped(), "plan rows without an entity code were dropped");
    }
    debug!(accepted = report.accepted, "normalized plan disclosures");
    (out, report)
}

/// Normalize an execution batch.
///
/// A feed-declared plan code becomes a resolved identity; everything else
/// starts unresolved and is left for the plan matcher.
pub fn normalize_executions(rows: &[RawRecord]) -> (Vec<ExecutionRecord>, NormalizeReport) {
    let mut report = NormalizeReport::default();
    let mut out = Vec::with_capacity(rows.len());

    for row in rows {
        let Some(entity_code) = pick(row, EXEC_CODE).and_then(parse_entity_code) else {
            report.missing_code += 1;
            continue;
        };
        let Some(date) = pick(row, EXEC_DATE).and_then(parse_date) else {
            report.missing_date += 1;
            continue;
        };

        let identity = pick(row, EXEC_PLAN_REF)
            .and_then(parse_plan_ref)
            .map(|r| PlanIdentity::from_storage_key(&r))
            .unwrap_or(PlanIdentity::Unresolved);

        out.push(ExecutionRecord {
            entity_code,
            identity,
            display_name: pick(row, EXEC_NAME).map(str::to_string),
            date,
            amount: pick(row, EXEC_AMOUNT).and_then(parse_number),
            volume: pick(row, EXEC_VOLUME).and_then(parse_number),
            avg_price: pick(row, EXEC_AVG_PRICE).and_then(parse_number),
            progress_text: pick(row, EXEC_PROGRESS).map(str::to_string),
            start_date: pick(row, EXEC_START).and_then(parse_date),
            end_date: pick(row, EXEC_END).and_then(parse_date),
        });
        report.accepted += 1;
    }

    if report.dropped() > 0 {
        warn!(
            missing_code = report.missing_code,
            missing_date = report.missing_date,
            "execution rows dropped during normalization"
        );
    }
    debug!(accepted = report.accepted, "normalized execution records");
    (out, report)
}

/// First alias with a present, non-blank value.
fn pick<'a>(row: &'a RawRecord, aliases: &[&str]) -> Option<&'a str> {
    aliases
        .iter()
        .filter_map(|alias| row.get(*alias))
        .map(|v| v.trim())
        .find(|v| !is_missing(v))
}

fn is_missing(value: &str) -> bool {
    let v = value.trim();
    MISSING.iter().any(|m| v.eq_ignore_ascii_case(m))
}

/// Canonical entity code: numeric codes zero-padded to 6 digits, others uppercased.
///
/// Float-looking codes (`"2352.0"`) are what spreadsheet round-trips produce
/// for `002352`.
pub fn parse_entity_code(raw: &str) -> Option<String> {
    let value = raw.trim();
    if is_missing(value) {
        return None;
    }
    if let Some(n) = integral_value(value) {
        if n >= 0 {
            return Some(format!("{n:06}"));
        }
    }
    Some(value.to_uppercase())
}

/// Feed-declared plan code; float-looking integers lose their fraction.
pub fn parse_plan_ref(raw: &str) -> Option<String> {
    let value = raw.trim();
    if is_missing(value) {
        return None;
    }
    match integral_value(value) {
        Some(n) => Some(n.to_string()),
        None => Some(value.to_string()),
    }
}

/// `Some(n)` when `value` parses as a number with no fractional part.
fn integral_value(value: &str) -> Option<i64> {
    if let Ok(n) = value.parse::<i64>() {
        return Some(n);
    }
    let f = value.parse::<f64>().ok()?;
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

/// Lenient number parsing: thousands separators stripped, blanks and junk → `None`.
pub fn parse_number(raw: &str) -> Option<f64> {
    let value = raw.trim();
    if is_missing(value) {
        return None;
    }
    let cleaned: String = value.chars().filter(|c| *c != ',').collect();
    cleaned.parse::<f64>().ok().filter(|f| f.is_finite())
}

/// Lenient date parsing. A trailing time component is ignored.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let value = raw.trim();
    if is_missing(value) {
        return None;
    }
    let day = value
        .split(|c| c == ' ' || c == 'T')
        .next()
        .unwrap_or(value);
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(day, fmt).ok())
}

/// Parse a price range such as `"10.00-12.00元"` into `(lower, upper)`.
///
/// One number means lower = upper; reversed bounds are swapped.
pub fn parse_price_range(raw: &str) -> (Option<f64>, Option<f64>) {
    let stripped = raw.trim_matches(|c: char| c == '—' || c == '-' || c == ' ');
    if is_missing(stripped) {
        return (None, None);
    }
    let nums = extract_numbers(raw);
    match nums.as_slice() {
        [] => (None, None),
        [x] => (Some(*x), Some(*x)),
        [lo, hi, ..] if lo > hi => (Some(*hi), Some(*lo)),
        [lo, hi, ..] => (Some(*lo), Some(*hi)),
    }
}

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]+(?:\.[0-9]+)?").expect("static pattern"));

/// Unsigned decimal numbers in order of appearance.
fn extract_numbers(text: &str) -> Vec<f64> {
    NUMBER
        .find_iter(text)
        .filter_map(|m| m.as_str().parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> RawRecord {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn entity_codes_are_canonical() {
        assert_eq!(parse_entity_code("1").as_deref(), Some("000001"));
        assert_eq!(parse_entity_code("2352.0").as_deref(), Some("002352"));
        assert_eq!(parse_entity_code("600519").as_deref(), Some("600519"));
        assert_eq!(parse_entity_code(" hk0700 ").as_deref(), Some("HK0700"));
        assert_eq!(parse_entity_code("nan"), None);
        assert_eq!(parse_entity_code(""), None);
    }

    #[test]
    fn numbers_coerce_to_unknown() {
        assert_eq!(parse_number("1,234.5"), Some(1234.5));
        assert_eq!(parse_number(" 12 "), Some(12.0));
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number("—"), None);
        assert_eq!(parse_number("NaN"), None);
        assert_eq!(parse_number("inf"), None);
    }

    #[test]
    fn dates_accept_feed_formats() {
        assert_eq!(parse_date("2024-01-10"), Some(date("2024-01-10")));
        assert_eq!(parse_date("2024/01/10"), Some(date("2024-01-10")));
        assert_eq!(parse_date("20240110"), Some(date("2024-01-10")));
        assert_eq!(parse_date("2024-01-10 00:00:00"), Some(date("2024-01-10")));
        assert_eq!(parse_date("2024-01-10T09:30:00"), Some(date("2024-01-10")));
        assert_eq!(parse_date("2024-13-40"), None);
        assert_eq!(parse_date("soon"), None);
    }

    #[test]
    fn numbers_pulled_from_free_text() {
        assert_eq!(extract_numbers("每股10.00元至12.5元"), vec![10.0, 12.5]);
        assert_eq!(extract_numbers("3. 和 .5"), vec![3.0, 5.0]);
        assert!(extract_numbers("待定").is_empty());
    }

    #[test]
    fn price_ranges() {
        assert_eq!(parse_price_range("10.00-12.00元"), (Some(10.0), Some(12.0)));
        assert_eq!(parse_price_range("不超过15.5元/股"), (Some(15.5), Some(15.5)));
        assert_eq!(parse_price_range("12-10"), (Some(10.0), Some(12.0)));
        assert_eq!(parse_price_range("—"), (None, None));
        assert_eq!(parse_price_range("待定"), (None, None));
    }

    #[test]
    fn plan_refs_lose_float_suffix() {
        assert_eq!(parse_plan_ref("12345.0").as_deref(), Some("12345"));
        assert_eq!(parse_plan_ref("RP-2024-01").as_deref(), Some("RP-2024-01"));
        assert_eq!(parse_plan_ref("  "), None);
    }

    #[test]
    fn first_present_alias_wins_per_row() {
        // Two feeds concatenated: the first header is present but blank in
        // the second feed's row.
        let rows = vec![
            row(&[("股票代码", "1"), ("TDATE", "2024-02-01"), ("HGJE", "100")]),
            row(&[
                ("股票代码", ""),
                ("SECURITY_CODE", "600519"),
                ("TDATE", "2024-02-02"),
                ("BUYBACK_AMT", "250"),
            ]),
        ];
        let (records, report) = normalize_executions(&rows);
        assert_eq!(report.accepted, 2);
        assert_eq!(records[0].entity_code, "000001");
        assert_eq!(records[0].amount, Some(100.0));
        assert_eq!(records[1].entity_code, "600519");
        assert_eq!(records[1].amount, Some(250.0));
    }

    #[test]
    fn executions_without_code_or_date_are_dropped() {
        let rows = vec![
            row(&[("股票代码", ""), ("TDATE", "2024-02-01")]),
            row(&[("股票代码", "000001"), ("TDATE", "not a date")]),
            row(&[("股票代码", "000001"), ("TDATE", "2024-02-01"), ("HGJE", "oops")]),
        ];
        let (records, report) = normalize_executions(&rows);
        assert_eq!(records.len(), 1);
        assert_eq!(report.missing_code, 1);
        assert_eq!(report.missing_date, 1);
        // Malformed amount does not block the row.
        assert_eq!(records[0].amount, None);
    }

    #[test]
    fn execution_plan_reference_becomes_identity() {
        let rows = vec![
            row(&[("SECURITY_CODE", "1"), ("NOTICE_DATE", "2024-02-01"), ("PLAN_CODE", "778.0")]),
            row(&[("SECURITY_CODE", "1"), ("NOTICE_DATE", "2024-02-02"), ("plan_key", "__DEFAULT__:000001")]),
            row(&[("SECURITY_CODE", "1"), ("NOTICE_DATE", "2024-02-03")]),
        ];
        let (records, _) = normalize_executions(&rows);
        assert_eq!(records[0].identity, PlanIdentity::Resolved("778".into()));
        assert_eq!(records[1].identity, PlanIdentity::Unresolved);
        assert_eq!(records[2].identity, PlanIdentity::Unresolved);
    }

    #[test]
    fn plan_rows_map_display_headers() {
        let rows = vec![row(&[
            ("股票代码", "333"),
            ("股票简称", "美的集团"),
            ("最新价", "60.1"),
            ("计划回购价格区间", "40.00-75.00"),
            ("计划回购数量区间-上限", "1e7"),
            ("计划回购金额区间-上限", "6000000000"),
            ("回购起始时间", "2024-03-01"),
            ("实施进度", "实施中"),
            ("最新公告日期", "2024-02-20"),
        ])];
        let (plans, report) = normalize_plans(&rows);
        assert_eq!(report.accepted, 1);
        let p = &plans[0];
        assert_eq!(p.entity_code, "000333");
        assert_eq!(p.display_name.as_deref(), Some("美的集团"));
        assert_eq!(p.price_lower, Some(40.0));
        assert_eq!(p.price_upper, Some(75.0));
        assert_eq!(p.volume_upper, Some(1e7));
        assert_eq!(p.amount_upper, Some(6e9));
        assert_eq!(p.start_date, Some(date("2024-03-01")));
        assert_eq!(p.announce_date, Some(date("2024-02-20")));
    }

    #[test]
    fn plan_rows_accept_canonical_headers() {
        let rows = vec![row(&[
            ("code", "000001"),
            ("announce_date", "2024-01-10"),
            ("price_lower", "9.5"),
            ("price_upper", "11"),
        ])];
        let (plans, _) = normalize_plans(&rows);
        assert_eq!(plans[0].price_lower, Some(9.5));
        assert_eq!(plans[0].price_upper, Some(11.0));
        assert_eq!(plans[0].start_date, None);
    }
}
