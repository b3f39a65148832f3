use service_core::error::AppError;
use thiserror::Error;

use crate::services::remote::RemoteError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("User already exists")]
    AlreadyExists,

    #[error("User not found")]
    NotFound,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Insufficient points")]
    InsufficientPoints,

    #[error("Loyalty ledger unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Loyalty ledger rejected the operation: {0}")]
    RemoteRejected(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<RemoteError> for ServiceError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Unavailable(msg) => ServiceError::RemoteUnavailable(msg),
            RemoteError::Rejected(msg) => ServiceError::RemoteRejected(msg),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidInput(e) => AppError::BadRequest(anyhow::anyhow!(e)),
            ServiceError::AlreadyExists => {
                AppError::Conflict(anyhow::anyhow!("User already exists"))
            }
            ServiceError::NotFound => AppError::NotFound(anyhow::anyhow!("User not found")),
            ServiceError::InvalidCredentials => {
                AppError::AuthError(anyhow::anyhow!("Invalid credentials"))
            }
            ServiceError::InvalidToken => {
                AppError::Unauthorized(anyhow::anyhow!("Invalid or expired token"))
            }
            ServiceError::InsufficientPoints => {
                AppError::BadRequest(anyhow::anyhow!("Insufficient points"))
            }
            ServiceError::RemoteUnavailable(_) => AppError::ServiceUnavailable,
            ServiceError::RemoteRejected(e) => AppError::BadGateway(e),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}
