//! Error types for GDCI.
//!
//! All errors in GDCI are strongly typed using thiserror.
//! Observation failures never surface here: an observable masks them as a
//! non-operating state. Everything else is returned to the caller.

use thiserror::Error;

use crate::observable::ObservableId;
use crate::state::PrimaryState;

/// Boxed error returned by user code (sensors and actions).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Misuse of the framework API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UsageError {
    #[error("a single state is required but the collection holds {len} states")]
    NotSingular {
        len: usize,
    },

    #[error("loop thread '{name}' was already started")]
    AlreadyStarted {
        name: String,
    },

    #[error("loop thread '{name}' cannot wait for its own termination")]
    SelfJoin {
        name: String,
    },
}

/// Disassociation of something that was never associated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("no actions registered for {observable} on {initial} -> {final_state}")]
    TransitionNotRegistered {
        observable: ObservableId,
        initial: PrimaryState,
        final_state: PrimaryState,
    },

    #[error("none of [{actions}] registered for {observable} on {initial} -> {final_state}")]
    ActionNotRegistered {
        observable: ObservableId,
        initial: PrimaryState,
        final_state: PrimaryState,
        actions: String,
    },
}

/// Lock mode named in `LockBusy` errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Shared access.
    Read,
    /// Exclusive access.
    Write,
}

impl std::fmt::Display for LockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}

/// Top-level error type for GDCI.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum GdciError {
    #[error("Usage error: {0}")]
    Usage(#[from] UsageError),

    #[error("get_observation() in '{observable}' must return true, false, null or [value, {{attributes}}]; returned {returned}")]
    Shape {
        observable: String,
        returned: String,
    },

    #[error("Could not acquire {mode} lock without waiting")]
    LockBusy {
        mode: LockMode,
    },

    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    #[error("Invariant violation: {message}")]
    InvariantViolation {
        message: String,
    },

    #[error("poisoned lock: {context}")]
    Poisoned {
        context: &'static str,
    },

    #[error("failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("thread '{name}' panicked")]
    Panicked {
        name: String,
    },
}

impl GdciError {
    /// Creates an invariant violation error.
    #[must_use]
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    /// Returns true if this is a usage error.
    #[must_use]
    pub const fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_))
    }

    /// Returns true if this is a shape error.
    #[must_use]
    pub const fn is_shape(&self) -> bool {
        matches!(self, Self::Shape { .. })
    }

    /// Returns true if a non-blocking lock acquisition failed.
    #[must_use]
    pub const fn is_lock_busy(&self) -> bool {
        matches!(self, Self::LockBusy { .. })
    }

    /// Returns true if this is a lookup error.
    #[must_use]
    pub const fn is_lookup(&self) -> bool {
        matches!(self, Self::Lookup(_))
    }

    /// Returns true if this is an invariant violation.
    #[must_use]
    pub const fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::InvariantViolation { .. })
    }
}

/// Result type alias for GDCI operations.
pub type GdciResult<T> = Result<T, GdciError>;

#[cfg(test)]
mod tests {
    use super::*;

    use crate::state::Ternary;

    #[test]
    fn test_usage_error_not_singular() {
        let err = UsageError::NotSingular { len: 3 };
        let msg = format!("{err}");
        assert!(msg.contains("3 states"));
    }

    #[test]
    fn test_gdci_error_from_usage() {
        let err: GdciError = UsageError::AlreadyStarted {
            name: "observer".to_string(),
        }
        .into();
        assert!(err.is_usage());
        assert!(!err.is_lookup());
        assert!(format!("{err}").contains("observer"));
    }

    #[test]
    fn test_lookup_error_display() {
        let err = LookupError::TransitionNotRegistered {
            observable: ObservableId::new(),
            initial: PrimaryState::new(Ternary::True, Ternary::False),
            final_state: PrimaryState::new(Ternary::False, Ternary::False),
        };
        let msg = format!("{err}");
        assert!(msg.contains("(true,false) -> (false,false)"));

        let err: GdciError = err.into();
        assert!(err.is_lookup());
    }

    #[test]
    fn test_lock_busy_names_mode() {
        let err = GdciError::LockBusy { mode: LockMode::Write };
        assert!(err.is_lock_busy());
        assert_eq!(format!("{err}"), "Could not acquire write lock without waiting");
    }

    #[test]
    fn test_shape_error() {
        let err = GdciError::Shape {
            observable: "thermo".to_string(),
            returned: "[true,null,null]".to_string(),
        };
        assert!(err.is_shape());
        let msg = format!("{err}");
        assert!(msg.contains("thermo"));
        assert!(msg.contains("[true,null,null]"));
    }

    #[test]
    fn test_invariant_violation() {
        let err = GdciError::invariant("untracked action");
        assert!(err.is_invariant_violation());
        assert!(format!("{err}").contains("untracked action"));
    }
}
