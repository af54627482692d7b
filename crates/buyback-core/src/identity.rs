//! Plan identity of an execution record.
//!
//! Execution rows that cannot be tied to a disclosed plan are stored under a
//! placeholder key: the reserved prefix followed by the entity code. Inside the
//! crate that state is `PlanIdentity::Unresolved`; the prefixed string only
//! exists at the storage boundary.

use std::fmt;

/// Reserved prefix of placeholder plan keys.
pub const PLACEHOLDER_PREFIX: &str = "__DEFAULT__:";

/// Entity token used in a placeholder key when the entity code is empty.
const UNKNOWN_ENTITY: &str = "UNKNOWN";

/// Label shown for placeholder-keyed rows on the read side.
pub const DEFAULT_PLAN_LABEL: &str = "default plan";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PlanIdentity {
    /// A real plan key, either a fingerprint or a feed-declared plan code.
    Resolved(String),
    /// No plan could be matched yet.
    Unresolved,
}

impl PlanIdentity {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    /// Serialize for storage. Unresolved identities become `"__DEFAULT__:<entity>"`.
    pub fn storage_key(&self, entity_code: &str) -> String {
        match self {
            Self::Resolved(key) => key.clone(),
            Self::Unresolved => placeholder_key(entity_code),
        }
    }

    /// Parse a stored plan key. Blank keys and any prefixed key are unresolved.
    pub fn from_storage_key(raw: &str) -> Self {
        let key = raw.trim();
        if key.is_empty() || is_placeholder_key(key) {
            Self::Unresolved
        } else {
            Self::Resolved(key.to_string())
        }
    }
}

impl fmt::Display for PlanIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolved(key) => write!(f, "{key}"),
            Self::Unresolved => write!(f, "<unresolved>"),
        }
    }
}

/// Placeholder key for an entity.
pub fn placeholder_key(entity_code: &str) -> String {
    let entity = entity_code.trim();
    let entity = if entity.is_empty() { UNKNOWN_ENTITY } else { entity };
    format!("{PLACEHOLDER_PREFIX}{entity}")
}

pub fn is_placeholder_key(key: &str) -> bool {
    key.starts_with(PLACEHOLDER_PREFIX)
}

/// Human-facing label for a stored plan key.
pub fn plan_label(key: &str) -> String {
    if key.is_empty() {
        String::new()
    } else if is_placeholder_key(key) {
        DEFAULT_PLAN_LABEL.to_string()
    } else {
        key.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_serializes_with_prefix() {
        assert_eq!(
            PlanIdentity::Unresolved.storage_key("000001"),
            "__DEFAULT__:000001"
        );
        assert_eq!(PlanIdentity::Unresolved.storage_key("  "), "__DEFAULT__:UNKNOWN");
    }

    #[test]
    fn resolved_serializes_verbatim() {
        let id = PlanIdentity::Resolved("a1b2c3d4e5f60718".into());
        assert_eq!(id.storage_key("000001"), "a1b2c3d4e5f60718");
    }

    #[test]
    fn placeholder_is_never_read_back_as_real() {
        assert_eq!(
            PlanIdentity::from_storage_key("__DEFAULT__:600519"),
            PlanIdentity::Unresolved
        );
        // A placeholder of another entity is still a placeholder.
        assert!(!PlanIdentity::from_storage_key("__DEFAULT__:000333").is_resolved());
        assert_eq!(PlanIdentity::from_storage_key(""), PlanIdentity::Unresolved);
        assert_eq!(
            PlanIdentity::from_storage_key("12345"),
            PlanIdentity::Resolved("12345".into())
        );
    }

    #[test]
    fn labels() {
        assert_eq!(plan_label("__DEFAULT__:000001"), DEFAULT_PLAN_LABEL);
        assert_eq!(plan_label("abc"), "abc");
        assert_eq!(plan_label(""), "");
    }
}
