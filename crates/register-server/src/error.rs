use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use register_shared::CryptoError;
use register_store::StoreError;
use register_sync::{SyncError, WorkerError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Tag length, packed format or verification failure.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// A worker vetoed the mutation before commit.
    #[error("Rejected: {0}")]
    Rejected(#[source] WorkerError),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Store(StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ServerError::NotFound("Resource".into()),
            other => ServerError::Store(other),
        }
    }
}

impl From<SyncError> for ServerError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::WorkerValidation(veto) => ServerError::Rejected(veto),
            SyncError::AlreadyReindexing(_) => ServerError::Conflict(e.to_string()),
            SyncError::Store(store) => store.into(),
            SyncError::ReindexWorker { .. } => ServerError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Crypto(
                CryptoError::InvalidTagLength { .. }
                | CryptoError::Format(_)
                | CryptoError::AuthenticationFailed,
            ) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Crypto(_) => {
                tracing::error!(error = %self, "Encryption engine failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            ServerError::Rejected(_) => (StatusCode::UNPROCESSABLE_ENTITY, self.to_string()),
            ServerError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            ServerError::Store(_) | ServerError::Internal(_) => {
                tracing::error!(error = %self, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
