//! Error taxonomy shared by the reconcilers, adapters and stores.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PortalError {
    /// Transport or auth failure talking to GitHub or AWS. Safe to retry.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("credential not found: {0}")]
    CredentialNotFound(String),

    #[error("provisioning failed: {0}")]
    Provision(String),

    #[error("already exists: {0}")]
    Conflict(String),

    #[error("{0}")]
    Validation(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("crypto error: {0}")]
    Crypto(String),
}

impl PortalError {
    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }
}

impl From<diesel::result::Error> for PortalError {
    fn from(e: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error};
        match e {
            Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                Self::Conflict(info.message().to_string())
            }
            other => Self::Store(other.to_string()),
        }
    }
}

impl From<diesel_async::pooled_connection::deadpool::PoolError> for PortalError {
    fn from(e: diesel_async::pooled_connection::deadpool::PoolError) -> Self {
        Self::Store(format!("connection pool: {e}"))
    }
}

pub type PortalResult<T> = Result<T, PortalError>;
