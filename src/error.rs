use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("model is not loaded; check that a checkpoint exists in the models directory")]
    ModelNotLoaded,
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error("failed to decode image: {0}")]
    ImageDecode(String),
    #[error("generation failed: {0}")]
    Inference(String),
    #[error("failed to encode image: {0}")]
    ImageEncode(String),
    #[error("failed to list models: {0}")]
    Scan(String),
    #[error("upload too large: {0}")]
    PayloadTooLarge(String),
    #[error("remote api error: {0}")]
    Upstream(String),
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::ModelNotLoaded => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ServiceError::ImageDecode(_)
            | ServiceError::Inference(_)
            | ServiceError::ImageEncode(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Scan(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = serde_json::json!({
            "detail": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}
