use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("a server named {0:?} already exists")]
    DuplicateName(String),
    #[error("server {0} not found")]
    ServerNotFound(i64),
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0} out of range")]
    UnprocessableEntity(String),
    #[error("server {0} not found")]
    NotFound(i64),
    #[error("a server named {0:?} already exists")]
    Conflict(String),
    #[error("agent unreachable: {detail}")]
    BadGateway { detail: String },
    #[error("internal error")]
    Internal(#[from] DbError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::BadGateway { .. } => StatusCode::BAD_GATEWAY,
            ApiError::Internal(DbError::DuplicateName(_)) => StatusCode::CONFLICT,
            ApiError::Internal(DbError::ServerNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Internal(DbError::Sqlx(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
