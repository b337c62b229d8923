//! Core error types for GRANARY.

use std::fmt;

/// Core result type.
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A step address failed to parse.
    MalformedAddress {
        /// The offending input.
        input: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Invalid hash or fingerprint format.
    InvalidHash {
        /// Why it was rejected.
        reason: String,
    },

    /// Invalid encoding of a serialized document.
    InvalidEncoding,

    /// Validation error.
    Validation {
        /// The field that failed validation.
        field: String,
        /// Why it failed.
        reason: String,
    },

    /// Not found.
    NotFound {
        /// Entity kind.
        kind: String,
        /// Entity identifier.
        id: String,
    },

    /// Internal error (for unexpected conditions).
    Internal {
        /// Error message.
        message: String,
    },
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedAddress { input, reason } => {
                write!(f, "Malformed step address `{}`: {}", input, reason)
            }
            Self::InvalidHash { reason } => write!(f, "Invalid hash: {}", reason),
            Self::InvalidEncoding => write!(f, "Invalid encoding"),
            Self::Validation { field, reason } => {
                write!(f, "Validation failed for {}: {}", field, reason)
            }
            Self::NotFound { kind, id } => write!(f, "{} not found: {}", kind, id),
            Self::Internal { message } => write!(f, "Internal error: {}", message),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<serde_json::Error> for CoreError {
    fn from(_err: serde_json::Error) -> Self {
        Self::InvalidEncoding
    }
}

impl From<crate::hash::HashError> for CoreError {
    fn from(err: crate::hash::HashError) -> Self {
        Self::InvalidHash {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::MalformedAddress {
            input: "bogus".to_string(),
            reason: "missing `://` separator".to_string(),
        };
        let s = err.to_string();
        assert!(s.contains("bogus"));
        assert!(s.contains("separator"));
    }

    #[test]
    fn test_not_found_display() {
        let err = CoreError::NotFound {
            kind: "Step".to_string(),
            id: "data://garden/energy".to_string(),
        };
        assert_eq!(err.to_string(), "Step not found: data://garden/energy");
    }

    #[test]
    fn test_from_hash_error() {
        let err: CoreError = crate::hash::HashError::InvalidHex.into();
        assert!(matches!(err, CoreError::InvalidHash { .. }));
    }
}
