use crate::error::{
    ClassificationError, DetectionError, HubError, SessionError, SortyxError,
};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, warn};

/// A crate error on its way out as an HTTP response
#[derive(Debug)]
pub struct ApiError(pub SortyxError);

impl<E> From<E> for ApiError
where
    E: Into<SortyxError>,
{
    fn from(e: E) -> Self {
        ApiError(e.into())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            SortyxError::Frame(_) => StatusCode::BAD_REQUEST,
            SortyxError::Detection(e) => match e {
                DetectionError::ModelUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                DetectionError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                DetectionError::Inference { .. } => StatusCode::BAD_GATEWAY,
            },
            SortyxError::Region(_) | SortyxError::Sensor(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SortyxError::Classification(e) => match e {
                ClassificationError::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                ClassificationError::ClassificationTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::BAD_GATEWAY,
            },
            SortyxError::Session(e) => match e {
                SessionError::NotFound { .. } => StatusCode::NOT_FOUND,
                SessionError::InvalidTransition { .. } | SessionError::Cancelled { .. } => {
                    StatusCode::CONFLICT
                }
            },
            SortyxError::Hub(HubError::Closed) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Request rejected: {}", self.0);
        }

        let body = serde_json::json!({
            "error": status.canonical_reason().unwrap_or("error"),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
