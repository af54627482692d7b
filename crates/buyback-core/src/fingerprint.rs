//! Deterministic plan fingerprints.
//!
//! A plan is identified by the tuple
//! `(entity_code, announce_date, price_upper, amount_upper, volume_upper, start_date)`.
//! Each field is rendered to a canonical token (missing → empty), the tokens
//! are joined with `|`, hashed with SHA-256, and the first 8 bytes are
//! rendered as 16 lowercase hex characters.
//!
//! Identical tuples always collapse to the same key. Any difference, such as
//! a revised price ceiling, gives a new plan identity rather than a version.

use std::fmt::Write as _;

use chrono::NaiveDate;
use ring::digest::{SHA256, digest};

use crate::model::PlanDisclosure;

/// Length of a plan key in hex characters.
pub const PLAN_KEY_LEN: usize = 16;

const SEPARATOR: char = '|';

/// Fingerprint a normalized disclosure.
pub fn plan_key(d: &PlanDisclosure) -> String {
    let input = fingerprint_input(d);
    let hash = digest(&SHA256, input.as_bytes());
    let mut key = String::with_capacity(PLAN_KEY_LEN);
    for byte in &hash.as_ref()[..PLAN_KEY_LEN / 2] {
        // Writing into a String cannot fail.
        let _ = write!(key, "{byte:02x}");
    }
    key
}

/// The canonical text that gets hashed. Exposed for diagnostics.
pub fn fingerprint_input(d: &PlanDisclosure) -> String {
    let tokens = [
        d.entity_code.clone(),
        date_token(d.announce_date),
        number_token(d.price_upper),
        number_token(d.amount_upper),
        number_token(d.volume_upper),
        date_token(d.start_date),
    ];
    let mut out = String::new();
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 {
            out.push(SEPARATOR);
        }
        out.push_str(token);
    }
    out
}

/// Whether `key` has the shape of a generated fingerprint.
pub fn is_plan_key(key: &str) -> bool {
    key.len() == PLAN_KEY_LEN && key.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn date_token(d: Option<NaiveDate>) -> String {
    d.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default()
}

/// Shortest round-trip decimal form; `12.0` renders as `12`.
fn number_token(n: Option<f64>) -> String {
    match n {
        // Fold -0.0 into 0.0 so both render identically.
        Some(x) if x == 0.0 => "0".to_string(),
        Some(x) => format!("{x}"),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disclosure() -> PlanDisclosure {
        PlanDisclosure {
            entity_code: "000001".into(),
            display_name: Some("Ping An Bank".into()),
            announce_date: NaiveDate::from_ymd_opt(2024, 1, 10),
            start_date: NaiveDate::from_ymd_opt(2024, 1, 15),
            price_lower: Some(10.0),
            price_upper: Some(12.0),
            amount_upper: Some(5.0e8),
            volume_upper: None,
            latest_price: Some(11.2),
            progress_text: Some("in progress".into()),
        }
    }

    #[test]
    fn key_is_sixteen_lowercase_hex() {
        let key = plan_key(&disclosure());
        assert_eq!(key.len(), PLAN_KEY_LEN);
        assert!(is_plan_key(&key), "bad key shape: {key}");
    }

    #[test]
    fn same_tuple_same_key() {
        let a = disclosure();
        let mut b = disclosure();
        // Fields outside the tuple do not participate.
        b.display_name = Some("renamed".into());
        b.price_lower = Some(1.0);
        b.latest_price = None;
        b.progress_text = None;
        assert_eq!(plan_key(&a), plan_key(&b));
        for _ in 0..10 {
            assert_eq!(plan_key(&a), plan_key(&a));
        }
    }

    #[test]
    fn any_tuple_change_gives_new_identity() {
        let base = plan_key(&disclosure());

        let mut revised = disclosure();
        revised.price_upper = Some(13.0);
        assert_ne!(plan_key(&revised), base);

        let mut restarted = disclosure();
        restarted.start_date = None;
        assert_ne!(plan_key(&restarted), base);

        let mut other_entity = disclosure();
        other_entity.entity_code = "000002".into();
        assert_ne!(plan_key(&other_entity), base);
    }

    #[test]
    fn canonical_input_text() {
        assert_eq!(
            fingerprint_input(&disclosure()),
            "000001|2024-01-10|12|500000000||2024-01-15"
        );
    }

    #[test]
    fn known_digest_is_stable() {
        // SHA-256("000001|2024-01-10|12|500000000||2024-01-15"), first 8 bytes.
        // Pinned so a formatting change cannot silently re-key a store.
        assert_eq!(plan_key(&disclosure()), "acdfd0745292af37");
    }

    #[test]
    fn missing_fields_use_empty_token() {
        let d = PlanDisclosure {
            entity_code: "600519".into(),
            display_name: None,
            announce_date: None,
            start_date: None,
            price_lower: None,
            price_upper: None,
            amount_upper: None,
            volume_upper: None,
            latest_price: None,
            progress_text: None,
        };
        assert_eq!(fingerprint_input(&d), "600519|||||");
    }

    #[test]
    fn rejects_placeholder_shapes() {
        assert!(!is_plan_key("__DEFAULT__:000001"));
        assert!(!is_plan_key("ABCDEF0123456789"));
    }
}
