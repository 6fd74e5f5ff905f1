use service_core::error::AppError;
use thiserror::Error;

use super::store::StoreError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("invite code is invalid, expired or exhausted")]
    InviteUnavailable,

    /// A collaborator (CA, controller) failed or could not be reached.
    #[error("Dependency error: {0}")]
    Dependency(String),

    /// The outcome of a non-idempotent upstream call is unknown.
    #[error("Retry later: {0}")]
    RetryLater(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InviteUnavailable => ServiceError::InviteUnavailable,
            e @ StoreError::DuplicateActive { .. } => ServiceError::Conflict(e.to_string()),
            e @ StoreError::Duplicate(_) => ServiceError::Conflict(e.to_string()),
            e @ StoreError::InUse(_) => ServiceError::Conflict(e.to_string()),
            StoreError::Backend(e) => ServiceError::Internal(e),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(e) => AppError::BadRequest(anyhow::anyhow!(e)),
            ServiceError::Conflict(e) => AppError::Conflict(anyhow::anyhow!(e)),
            ServiceError::NotFound(e) => AppError::NotFound(anyhow::anyhow!("{} not found", e)),
            ServiceError::InvalidState(e) => AppError::InvalidState(anyhow::anyhow!(e)),
            e @ ServiceError::InviteUnavailable => AppError::BadRequest(anyhow::anyhow!(e.to_string())),
            ServiceError::Dependency(e) => AppError::BadGateway(e),
            ServiceError::RetryLater(e) => AppError::RetryLater(e, Some(5)),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}
