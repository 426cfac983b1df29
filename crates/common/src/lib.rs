//! Shared building blocks for the order fulfillment services.

pub mod error_class;
pub mod retry;
pub mod telemetry;
pub mod types;

pub use error_class::{Classify, ErrorClass};
pub use retry::{RetryError, RetryStrategy, retry};
pub use telemetry::Telemetry;
pub use types::{Money, OrderId, PaymentId, ProductId, ReservationFailureReason, UserId};
