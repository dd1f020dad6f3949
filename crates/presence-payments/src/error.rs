//! Payment Error Types

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Errors produced by the entitlement and payment core.
///
/// The variants follow the service's error taxonomy: caller mistakes
/// (`Validation`), unverifiable webhook deliveries (`Authentication`),
/// processor-side failures (`Upstream`), and entitlement-store faults
/// (`Storage`). `Config` only occurs during startup wiring.
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Malformed caller input (bad amount, missing phone).
    #[error("invalid request: {0}")]
    Validation(String),

    /// Webhook signature missing, garbled, or mismatched.
    #[error("webhook signature rejected: {0}")]
    Authentication(String),

    /// Payment processor call failed (network, timeout, API error).
    #[error("payment processor error: {0}")]
    Upstream(String),

    /// Entitlement store unreadable or unwritable.
    #[error("entitlement storage error: {0}")]
    Storage(String),

    /// Missing or unusable configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl PaymentError {
    pub fn validation(msg: impl Into<String>) -> Self {
        PaymentError::Validation(msg.into())
    }

    /// True when no request state was mutated and the caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PaymentError::Upstream(_) | PaymentError::Storage(_))
    }
}
