//! Error taxonomy shared by the invocation engine and its collaborators.

use thiserror::Error;

/// Result type used across the ETS crates.
pub type EtsResult<T> = Result<T, EtsError>;

/// Maximum number of characters of a payload kept on a validation error.
pub const PAYLOAD_PREVIEW_LIMIT: usize = 256;

/// ETS error.
///
/// Errors that terminate an invocation are turned into exactly one
/// `InvocationFailed` event by the caller; everything raised before an
/// invocation exists is returned synchronously.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EtsError {
    /// Schema or shape mismatch. Never retried automatically.
    #[error("validation failed for schema '{schema_id}': {reason}")]
    Validation {
        schema_id: String,
        reason: String,
        /// Truncated payload for diagnostics.
        payload: String,
    },

    /// Unknown trigger, subscription or invocation.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The breaker for the destination rejected the call; nothing was sent.
    #[error("circuit open for destination '{destination}'")]
    CircuitOpen { destination: String },

    /// An attempted delivery failed (network/destination failure).
    #[error("delivery to '{destination}' failed: {reason}")]
    Delivery { destination: String, reason: String },

    /// Produced only by the deadline sweeper.
    #[error("invocation {invocation_id} expired")]
    Expired { invocation_id: String },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Duplicate subscription, immutable field change, etc.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Malformed request that is not a schema violation (bad filter, missing config).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Infrastructure failure (store poisoning, bus unavailable).
    #[error("store error: {0}")]
    Store(String),
}

impl EtsError {
    pub fn validation(
        schema_id: impl Into<String>,
        reason: impl Into<String>,
        payload: impl AsRef<str>,
    ) -> Self {
        Self::Validation {
            schema_id: schema_id.into(),
            reason: reason.into(),
            payload: truncate_payload(payload.as_ref()),
        }
    }

    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn circuit_open(destination: impl Into<String>) -> Self {
        Self::CircuitOpen {
            destination: destination.into(),
        }
    }

    pub fn delivery(destination: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Delivery {
            destination: destination.into(),
            reason: reason.into(),
        }
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn limit(msg: impl Into<String>) -> Self {
        Self::LimitExceeded(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Short machine-readable code, used in logs and HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::NotFound { .. } => "not_found",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Delivery { .. } => "delivery_error",
            Self::Expired { .. } => "expired",
            Self::Unauthorized(_) => "unauthorized",
            Self::Conflict(_) => "conflict",
            Self::LimitExceeded(_) => "limit_exceeded",
            Self::Unsupported(_) => "unsupported",
            Self::InvalidId(_) => "invalid_id",
            Self::BadRequest(_) => "bad_request",
            Self::Store(_) => "store_error",
        }
    }
}

/// Truncate a payload preview on a char boundary.
pub fn truncate_payload(payload: &str) -> String {
    match payload.char_indices().nth(PAYLOAD_PREVIEW_LIMIT) {
        Some((idx, _)) => format!("{}...", &payload[..idx]),
        None => payload.to_string(),
    }
}
