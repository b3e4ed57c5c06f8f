use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing or invalid authorization")]
    Unauthorized,
    #[error("proxy config missing")]
    ProxyConfigMissing,
    #[error("proxy is disabled in config")]
    ProxyDisabled,
}

#[derive(Serialize)]
struct ApiErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::ProxyConfigMissing | ApiError::ProxyDisabled => StatusCode::BAD_REQUEST,
        };
        let body = ApiErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
