//! Broker and codec error types.

use std::time::Duration;

use common::{Classify, ErrorClass};
use thiserror::Error;

/// Failure to turn bytes into a [`FulfillmentEvent`](crate::FulfillmentEvent) or back.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Malformed event payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl Classify for CodecError {
    fn class(&self) -> ErrorClass {
        ErrorClass::Validation
    }
}

/// Errors raised by broker adapters.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The connection or channel is gone.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// A publish did not complete within the configured timeout.
    #[error("Publish to '{routing_key}' timed out after {timeout:?}")]
    PublishTimeout {
        routing_key: String,
        timeout: Duration,
    },

    /// Connecting kept failing until the retry budget ran out.
    #[error("Could not connect to broker after {attempts} attempts: {last_error}")]
    ConnectExhausted { attempts: u32, last_error: String },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl BrokerError {
    /// Returns true if the failure may clear up on its own.
    pub fn is_transient(&self) -> bool {
        self.class().is_retryable()
    }
}

impl Classify for BrokerError {
    fn class(&self) -> ErrorClass {
        match self {
            BrokerError::Unavailable(_) | BrokerError::PublishTimeout { .. } => {
                ErrorClass::Transient
            }
            BrokerError::ConnectExhausted { .. } => ErrorClass::Fatal,
            BrokerError::Codec(e) => e.class(),
        }
    }
}

/// Convenience type alias for broker results.
pub type Result<T> = std::result::Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_errors_are_classified() {
        assert_eq!(
            BrokerError::Unavailable("reset".into()).class(),
            ErrorClass::Transient
        );
        assert_eq!(
            BrokerError::PublishTimeout {
                routing_key: "order.created".into(),
                timeout: Duration::from_secs(5),
            }
            .class(),
            ErrorClass::Transient
        );
        assert_eq!(
            BrokerError::ConnectExhausted {
                attempts: 5,
                last_error: "refused".into(),
            }
            .class(),
            ErrorClass::Fatal
        );

        let malformed = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = BrokerError::from(CodecError::from(malformed));
        assert_eq!(err.class(), ErrorClass::Validation);
        assert!(!err.is_transient());
    }
}
