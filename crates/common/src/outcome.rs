//! Tagged results for best-effort processing
//!
//! Every repair tier either produces a new value or falls back to the value
//! it started from. `Outcome` records which one happened and why, without
//! affecting control flow.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome<T> {
    /// Processing succeeded and produced `value`
    Ok { value: T },
    /// Processing failed; `original` is passed through unchanged
    Degraded { original: T, reason: String },
}

impl<T> Outcome<T> {
    pub fn ok(value: T) -> Self {
        Outcome::Ok { value }
    }

    pub fn degraded(original: T, reason: impl Into<String>) -> Self {
        Outcome::Degraded {
            original,
            reason: reason.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok { .. })
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Outcome::Degraded { .. })
    }

    /// Diagnostic reason for a degraded outcome
    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Ok { .. } => None,
            Outcome::Degraded { reason, .. } => Some(reason),
        }
    }

    pub fn value(&self) -> &T {
        match self {
            Outcome::Ok { value } => value,
            Outcome::Degraded { original, .. } => original,
        }
    }

    /// The value to carry forward, whichever way processing went
    pub fn into_value(self) -> T {
        match self {
            Outcome::Ok { value } => value,
            Outcome::Degraded { original, .. } => original,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U> {
        match self {
            Outcome::Ok { value } => Outcome::Ok { value: f(value) },
            Outcome::Degraded { original, reason } => Outcome::Degraded {
                original: f(original),
                reason,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degraded_yields_original() {
        let outcome = Outcome::degraded("#login".to_string(), "selector not found");
        assert!(outcome.is_degraded());
        assert_eq!(outcome.reason(), Some("selector not found"));
        assert_eq!(outcome.into_value(), "#login");
    }

    #[test]
    fn test_map_preserves_tag() {
        let outcome = Outcome::ok(2).map(|v| v * 10);
        assert_eq!(outcome, Outcome::ok(20));

        let outcome = Outcome::degraded(2, "boom").map(|v| v * 10);
        assert_eq!(outcome.value(), &20);
        assert_eq!(outcome.reason(), Some("boom"));
    }
}
