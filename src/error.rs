//! Store error taxonomy.
//!
//! Every failure coming back from the backing store is classified here so the
//! retry policy and the fail-soft listing paths can decide what to do with it
//! without inspecting backend-specific error codes themselves.

use thiserror::Error;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Row-level-security or policy rejection. Retrying will not resolve it.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Session/auth failure. Must be resolved by re-authentication upstream.
    #[error("authentication required: {0}")]
    Unauthenticated(String),

    /// Rejected before any store call was made.
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness violation, e.g. a concurrent insert of the same team
    /// conversation. Callers treat this as "already exists, re-fetch".
    #[error("conflict: {0}")]
    Conflict(String),

    /// Network or backend failure that may resolve on its own.
    #[error("transient store failure: {0}")]
    Transient(#[source] anyhow::Error),
}

impl StoreError {
    pub fn transient(err: impl Into<anyhow::Error>) -> Self {
        Self::Transient(err.into())
    }

    /// Permission, auth, validation and conflict outcomes are terminal;
    /// everything else is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Transient(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("row not found".to_string()),
            sqlx::Error::Database(db) => {
                let code = db.code().map(|c| c.into_owned());
                match code.as_deref() {
                    // insufficient_privilege: RLS policy rejection
                    Some("42501") => Self::PermissionDenied(db.message().to_string()),
                    // invalid_authorization_specification / invalid_password
                    Some("28000") | Some("28P01") => {
                        Self::Unauthenticated(db.message().to_string())
                    }
                    // unique_violation
                    Some("23505") => Self::Conflict(db.message().to_string()),
                    _ => Self::Transient(anyhow::anyhow!(
                        "database error {}: {}",
                        code.as_deref().unwrap_or("unknown"),
                        db.message()
                    )),
                }
            }
            other => Self::Transient(other.into()),
        }
    }
}
