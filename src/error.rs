use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Failures of the profile/catalog store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The store could not be reached or refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Failures of the session provider.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("auth service unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    /// The provider understood the request and said no (bad credentials, duplicate email...).
    #[error("{0}")]
    Rejected(String),

    #[error("auth service unavailable: {0}")]
    Unavailable(String),

    #[error("operation requires the service role key")]
    MissingServiceKey,
}

/// AppError
///
/// The HTTP-facing error type. Every handler returns `Result<_, AppError>`; the
/// `IntoResponse` impl maps each variant to a status code and a `{ "error": ... }` body.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("authentication required")]
    Unauthorized,

    #[error("not found")]
    NotFound,

    /// Sign-up could not be completed; the message is safe to show to the user.
    #[error("{0}")]
    Registration(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::Registration(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Auth(AuthError::Rejected(_)) => StatusCode::UNAUTHORIZED,
            AppError::Auth(_) => StatusCode::BAD_GATEWAY,
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            // Internal details stay in the logs.
            AppError::Store(e) => {
                tracing::error!(error = %e, "store failure while handling request");
                "internal error".to_string()
            }
            AppError::Auth(e @ (AuthError::Transport(_) | AuthError::Unavailable(_))) => {
                tracing::error!(error = %e, "auth provider failure while handling request");
                "authentication service unavailable".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
