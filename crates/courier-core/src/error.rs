//! Error taxonomy shared by the registries and the service.
//!
//! Variants are semantic, not transport-specific: the API layer maps them to
//! HTTP statuses, the retry policy consults `is_retryable`, and the breaker
//! counts any `Err` as one failure sample. The type is `Clone` because
//! single-flight refreshes hand the same failure to every awaiter.
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// Missing or blank tenant id, malformed notification, invalid config.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Tenant not known to the config store.
    #[error("tenant not found: {0}")]
    NotFound(String),

    /// Call refused by the tenant's circuit breaker. Never retried.
    #[error("circuit breaker open for tenant {0}")]
    BreakerOpen(String),

    /// Submission to a pool that is draining.
    #[error("pool shutting down for tenant {0}")]
    ShuttingDown(String),

    /// Connect error, 5xx/408/429, or timeout. Retryable per the tenant's
    /// retry policy.
    #[error("transient failure: {0}")]
    Transient(String),

    /// 401/403 from the tenant endpoint. Invalidates the cached credential
    /// and grants one uncounted retry.
    #[error("authentication failure: {0}")]
    Auth(String),

    /// Anything unexpected. Surfaces to the exception sink.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable kind tag recorded in outcome documents.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidRequest(_) => "INVALID_REQUEST",
            Error::NotFound(_) => "NOT_FOUND",
            Error::BreakerOpen(_) => "BREAKER_OPEN",
            Error::ShuttingDown(_) => "SHUTTING_DOWN",
            Error::Transient(_) => "TRANSIENT",
            Error::Auth(_) => "AUTH",
            Error::Internal(_) => "INTERNAL",
        }
    }

    /// Only transient failures are eligible for the forward retry loop.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}
