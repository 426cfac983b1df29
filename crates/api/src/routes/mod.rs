//! HTTP route handlers.

pub mod health;
pub mod inventory;
pub mod metrics;
pub mod orders;
pub mod payments;

use crate::error::ApiError;

/// Parses a path segment, answering 400 when it does not parse.
pub(crate) fn parse_path<T>(raw: &str, what: &str) -> Result<T, ApiError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid {what}: {e}")))
}
