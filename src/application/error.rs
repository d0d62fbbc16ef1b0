use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use crate::cache::CacheError;
use crate::domain::error::DomainError;
use crate::infra::error::InfraError;
use crate::infra::store::StoreError;

use super::repos::RepoError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("malformed queue message: {0}")]
    Malformed(String),
    #[error("{0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// True for failures worth retrying by the caller: the collaborator was
    /// unreachable, not wrong.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Repo(RepoError::Timeout)
                | Self::Store(StoreError::Unavailable(_))
                | Self::Cache(CacheError::Store(StoreError::Unavailable(_)))
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, public_message) = match &self {
            AppError::Domain(DomainError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, "Not found")
            }
            AppError::Domain(DomainError::Validation { .. }) => {
                (StatusCode::BAD_REQUEST, "Invalid request")
            }
            _ if self.is_transient() => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Temporarily unavailable, retry shortly",
            ),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        };

        if status.is_server_error() {
            error!(error = %self, status = %status, "request failed");
        }

        (status, public_message).into_response()
    }
}
