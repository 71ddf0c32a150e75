use std::fmt;

use thiserror::Error;

/// Die beiden Ressourcen, die einen Plan begrenzen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Budget,
    Effort,
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::Budget => f.write_str("budget"),
            Bound::Effort => f.write_str("max_effort"),
        }
    }
}

/// Fehlerhafte Katalogeinträge oder ungültige Schranken.
///
/// Wird vor jedem Lösungsversuch gemeldet und nie automatisch wiederholt.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("catalog contains no actions")]
    EmptyCatalog,
    #[error("action id must not be empty")]
    EmptyId,
    #[error("duplicate action id '{0}'")]
    DuplicateId(String),
    #[error("action '{action_id}': '{field}' must be a non-negative {expected}, got {value}")]
    InvalidField {
        action_id: String,
        field: &'static str,
        expected: &'static str,
        value: f64,
    },
    #[error("bound '{bound}' must be finite and non-negative, got {value}")]
    InvalidBound { bound: Bound, value: f64 },
    #[error("malformed catalog: {0}")]
    Malformed(#[from] serde_json::Error),
}
