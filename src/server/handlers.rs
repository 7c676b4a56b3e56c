use crate::classification::{ClassificationRecord, Strategy};
use crate::detector::PresenceResult;
use crate::error::SortyxError;
use crate::hub::{BinStatus, SensorPayload, StatsSnapshot};
use crate::models::{InferenceImage, ModelAvailability};
use crate::session::{ScanOutcome, SessionState};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::error::ApiError;
use super::api::ServerState;

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Body shared by the image endpoints
#[derive(Debug, Deserialize)]
pub struct ImageRequest {
    #[serde(alias = "image")]
    pub image_base64: String,
    #[serde(default, alias = "classification_method")]
    pub strategy: Option<Strategy>,
    #[serde(default)]
    pub fallback: Option<bool>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DetectResponse {
    #[serde(flatten)]
    pub presence: PresenceResult,
    /// The crop as a JPEG data URL when an object was found
    pub cropped_image: Option<String>,
}

/// Run a frame through a session, or through a one-off pass without one
pub async fn scan_handler(
    State(state): State<ServerState>,
    Json(request): Json<ImageRequest>,
) -> ApiResult<Json<ScanOutcome>> {
    let pipeline = state.sessions.pipeline();

    let outcome = match request.session_id.as_deref() {
        Some(session_id) => {
            state
                .sessions
                .submit_payload(
                    session_id,
                    request.image_base64,
                    request.strategy,
                    request.fallback,
                )
                .await?
        }
        None => {
            let frame = pipeline.decode_frame(request.image_base64).await?;
            pipeline
                .scan_once(&frame, request.strategy, request.fallback)
                .await?
        }
    };

    Ok(Json(outcome))
}

pub async fn create_session_handler(
    State(state): State<ServerState>,
    body: Option<Json<CreateSessionRequest>>,
) -> (StatusCode, Json<SessionState>) {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let session = state.sessions.start(request.session_id);
    (StatusCode::CREATED, Json(session))
}

pub async fn session_state_handler(
    State(state): State<ServerState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SessionState>> {
    Ok(Json(state.sessions.state(&session_id)?))
}

pub async fn delete_session_handler(
    State(state): State<ServerState>,
    Path(session_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.sessions.end(&session_id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Stateless presence check
pub async fn detect_handler(
    State(state): State<ServerState>,
    Json(request): Json<ImageRequest>,
) -> ApiResult<Json<DetectResponse>> {
    let pipeline = state.sessions.pipeline();
    let frame = pipeline.decode_frame(request.image_base64).await?;
    let inspection = pipeline.inspect(&frame).await?;

    debug!("Presence check: {}", inspection.presence.message);
    Ok(Json(DetectResponse {
        presence: inspection.presence,
        cropped_image: inspection.crop.map(|crop| crop.data_url()),
    }))
}

/// Classify an image that is already cropped to the item
pub async fn classify_handler(
    State(state): State<ServerState>,
    Json(request): Json<ImageRequest>,
) -> ApiResult<Json<ClassificationRecord>> {
    let pipeline = state.sessions.pipeline();
    let frame = pipeline.decode_frame(request.image_base64).await?;

    let quality = state.jpeg_quality;
    let image = tokio::task::spawn_blocking(move || InferenceImage::encode(&frame.image, quality))
        .await
        .map_err(|e| SortyxError::System {
            message: format!("Encoding task failed: {}", e),
        })??;

    let record = pipeline
        .classify_crop(&image, request.strategy, request.fallback)
        .await;
    pipeline.publish(request.session_id, &record).await;
    Ok(Json(record))
}

/// Handler for health check endpoint
pub async fn health_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let pipeline = state.sessions.pipeline();
    let models = pipeline.registry().availability();
    let router = pipeline.router();
    let scans_accepted = models.scans_ready();

    let health_info = serde_json::json!({
        "status": if scans_accepted { "healthy" } else { "degraded" },
        "timestamp": Utc::now(),
        "models": models,
        "reasoning": {
            "service": router.reasoning_service_name(),
            "configured": router.reasoning_configured(),
        },
        "scans_accepted": scans_accepted,
        "active_sessions": state.sessions.session_count(),
        "observers": pipeline.hub().observer_count(),
        "connections": state.connections.snapshot(),
    });

    Json(health_info)
}

pub async fn reload_models_handler(State(state): State<ServerState>) -> Json<ModelAvailability> {
    info!("Model reload requested");
    Json(state.sessions.pipeline().registry().reload().await)
}

pub async fn stats_handler(State(state): State<ServerState>) -> ApiResult<Json<StatsSnapshot>> {
    Ok(Json(state.sessions.pipeline().hub().stats().await?))
}

pub async fn bins_status_handler(
    State(state): State<ServerState>,
) -> ApiResult<Json<Vec<BinStatus>>> {
    Ok(Json(state.sessions.pipeline().hub().bins().await?))
}

/// Sensor ingestion; malformed readings are refused with 422
pub async fn sensors_handler(
    State(state): State<ServerState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<BinStatus>)> {
    let reading = SensorPayload::from_slice(&body).and_then(SensorPayload::into_reading)?;
    let status = state
        .sessions
        .pipeline()
        .hub()
        .ingest_sensor(reading)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(status)))
}
