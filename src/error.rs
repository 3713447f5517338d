use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Duplicate(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Validation(_) | AppError::MalformedPayload(_) => {
                (StatusCode::BAD_REQUEST, self.to_string()).into_response()
            }
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()).into_response(),
            AppError::Duplicate(_) | AppError::Conflict(_) => {
                (StatusCode::CONFLICT, self.to_string()).into_response()
            }
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Basic realm=\"admin\"")],
                self.to_string(),
            )
                .into_response(),
            AppError::Database(_) | AppError::Io(_) => {
                error!("{self}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string()).into_response()
            }
        }
    }
}

/// Converts a unique-constraint violation into [`AppError::Duplicate`].
///
/// The database constraint is the final arbiter for uniqueness; pre-checks
/// only exist for nicer messages and can race.
pub fn map_unique(err: sqlx::Error, message: &str) -> AppError {
    if let sqlx::Error::Database(ref db) = err {
        if matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation) {
            return AppError::Duplicate(message.to_string());
        }
    }
    AppError::Database(err)
}
