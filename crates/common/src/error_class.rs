//! Error taxonomy shared by every fulfillment component.

use serde::{Deserialize, Serialize};

/// How an error should be treated by whoever receives it.
///
/// The broker consumer turns this into an acknowledgement decision and the
/// HTTP layer turns it into a status code, so every error type in the
/// workspace exposes its class instead of leaving callers to guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Malformed request or payload. Retrying cannot help.
    Validation,
    /// A business outcome such as insufficient stock. Answered with an outcome
    /// event, never by retrying.
    Conflict,
    /// Connection loss, timeout or a dependency that is not visible yet.
    Transient,
    /// Unrecoverable startup condition. Stops the process.
    Fatal,
}

impl ErrorClass {
    /// Returns true if the operation may succeed when attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorClass::Transient)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Validation => "validation",
            ErrorClass::Conflict => "conflict",
            ErrorClass::Transient => "transient",
            ErrorClass::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Implemented by error types that know their [`ErrorClass`].
pub trait Classify {
    fn class(&self) -> ErrorClass;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        assert!(ErrorClass::Transient.is_retryable());
        assert!(!ErrorClass::Validation.is_retryable());
        assert!(!ErrorClass::Conflict.is_retryable());
        assert!(!ErrorClass::Fatal.is_retryable());
    }

    #[test]
    fn display_uses_snake_case() {
        assert_eq!(ErrorClass::Validation.to_string(), "validation");
        assert_eq!(
            serde_json::to_string(&ErrorClass::Transient).unwrap(),
            "\"transient\""
        );
    }
}
