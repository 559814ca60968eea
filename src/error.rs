//! Error taxonomy shared by the reconciler, credential store, grant resolver
//! and request authorizer.
//!
//! Authentication and authorization errors carry no detail on purpose: the
//! caller must not learn whether an identity exists or which check failed.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or incomplete input. Names the entity and field at fault.
    #[error("invalid {entity}: {field} {message}")]
    Validation {
        entity: String,
        field: String,
        message: String,
    },

    /// Missing, malformed, expired or non-matching credential.
    #[error("authentication failed")]
    Authentication,

    /// Valid identity without the privilege the operation requires.
    #[error("forbidden")]
    Authorization,

    #[error("{0}")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(String),

    /// External provider answered with an error or could not be reached.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// External provider did not answer within the configured bound.
    #[error("upstream timeout: {0}")]
    Timeout(String),

    /// Uniqueness constraint violated in persistence.
    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    pub fn validation(entity: impl Into<String>, field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            entity: entity.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    /// Only upstream failures are worth retrying; the core never retries them itself.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Upstream(_) | Error::Timeout(_))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref code, ref msg)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Error::Integrity(msg.clone().unwrap_or_else(|| "constraint violation".to_string()))
            }
            other => Error::Internal(anyhow::Error::new(other).context("storage failure")),
        }
    }
}
