//! HTTP front door.

use crate::enroll::{EnrollError, Enroller, LabelHint};
use crate::processor::{FrameProcessor, ProcessError, ResultRecord};
use crate::roster::decode_photo;
use crate::state::StateReader;
use crate::store::EmbeddingStore;
use crate::verifier::{AuthorityClient, VerificationStatus};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use chrono::Utc;
use facegate_core::{Embedding, FaceBox};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub const SERVICE_NAME: &str = "facegate";

#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<FrameProcessor>,
    pub enroller: Arc<Enroller>,
    pub store: Arc<EmbeddingStore>,
    pub reader: StateReader,
    /// Set only when verification is enabled.
    pub authority: Option<Arc<AuthorityClient>>,
    pub model_name: String,
}

pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/hardware/video-stream", post(video_stream))
        .route("/api/hardware/person-detected", post(person_detected))
        .route("/api/frames/latest", get(latest_frame))
        .route("/enroll", post(enroll))
        .route("/load-face", post(load_face))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Internal(m) => {
                tracing::error!(error = %m, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, m)
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<ProcessError> for ApiError {
    fn from(e: ProcessError) -> Self {
        match e {
            ProcessError::Decode(_) => ApiError::BadRequest(format!("Failed to decode image: {e}")),
            ProcessError::Analyzer(_) | ProcessError::Internal(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<EnrollError> for ApiError {
    fn from(e: EnrollError) -> Self {
        match e {
            EnrollError::NoFaceFound => ApiError::BadRequest("No face detected in image".into()),
            EnrollError::MultipleFacesFound(_) => ApiError::BadRequest(
                "Multiple faces detected. Please provide an image with a single face.".into(),
            ),
            EnrollError::Decode(_) | EnrollError::Store(_) => ApiError::BadRequest(e.to_string()),
            EnrollError::Analyzer(_) | EnrollError::Internal(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

/// Per-face entry in frame responses.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FaceSummary {
    face_id: Option<String>,
    /// Best similarity found, even when below threshold.
    confidence: f32,
    detection_confidence: f32,
    verified: bool,
    eligible: bool,
    user: Value,
    message: String,
    bounding_box: FaceBox,
}

impl From<&ResultRecord> for FaceSummary {
    fn from(r: &ResultRecord) -> Self {
        let message = match (&r.verification, r.label()) {
            (_, None) => String::new(),
            (VerificationStatus::Skipped, Some(_)) => "Face recognized".to_string(),
            (status, Some(_)) => status.reason().to_string(),
        };
        Self {
            face_id: r.label().map(str::to_string),
            confidence: r.matched.similarity,
            detection_confidence: r.detection_confidence,
            verified: r.verification.verified(),
            eligible: r.verification.eligible(),
            user: r.verification.attributes().cloned().unwrap_or_else(|| json!({})),
            message,
            bounding_box: r.bbox,
        }
    }
}

fn summaries(results: &[ResultRecord]) -> Vec<FaceSummary> {
    results.iter().map(FaceSummary::from).collect()
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "model": state.model_name,
        "model_loaded": true,
        "known_faces": state.store.len(),
        "verification_enabled": state.authority.is_some(),
        "timestamp": now(),
    }))
}

async fn video_stream(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("No image data provided".into()));
    }

    let report = state.processor.process(body).await?;
    let message = if report.results.is_empty() {
        "Frame received - no faces detected"
    } else {
        "Frame processed successfully"
    };

    Ok(Json(json!({
        "success": true,
        "message": message,
        "sequence": report.sequence,
        "faces_detected": report.faces_detected(),
        "faces_recognized": report.faces_recognized(),
        "results": summaries(&report.results),
        "timestamp": now(),
    })))
}

#[derive(Debug, Default, Deserialize)]
struct PersonDetected {
    count: Option<u32>,
    timestamp: Option<String>,
}

/// Presence notification from the camera's motion sensor. Acknowledged only.
async fn person_detected(body: Bytes) -> Result<Json<Value>, ApiError> {
    let event = if body.iter().all(u8::is_ascii_whitespace) {
        PersonDetected::default()
    } else {
        serde_json::from_slice::<PersonDetected>(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {e}")))?
    };
    let count = event.count.unwrap_or(1);
    tracing::info!(count, sensor_timestamp = event.timestamp.as_deref(), "person detected");

    Ok(Json(json!({
        "success": true,
        "message": format!("Person detection received: {count} person(s)"),
        "count": count,
        "timestamp": now(),
    })))
}

async fn latest_frame(State(state): State<AppState>) -> Json<Value> {
    let latest = state.reader.read();
    let Some(frame) = latest.frame.as_ref() else {
        return Json(json!({
            "frame": null,
            "detections": [],
            "message": "No frames received yet",
        }));
    };

    Json(json!({
        "frame": STANDARD.encode(frame),
        "sequence": latest.sequence,
        "detections": summaries(&latest.results),
        "timestamp": latest.published_at.map(|t| t.to_rfc3339()),
    }))
}

#[derive(Debug, Deserialize)]
struct EnrollRequest {
    image: Option<String>,
    #[serde(rename = "faceId")]
    face_id: Option<String>,
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

async fn enroll(
    State(state): State<AppState>,
    payload: Result<Json<EnrollRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = payload?;
    let image = req
        .image
        .as_deref()
        .filter(|i| !i.is_empty())
        .ok_or_else(|| ApiError::BadRequest("image is required".into()))?;
    let bytes = decode_photo(image).map_err(|e| ApiError::BadRequest(format!("Invalid base64 image: {e}")))?;

    let hint = LabelHint {
        face_id: req.face_id,
        user_id: req.user_id,
    };
    let label = state.enroller.enroll(Bytes::from(bytes), &hint).await?;

    if let (Some(authority), Some(user_id)) = (state.authority.as_ref(), hint.user_id()) {
        if let Err(e) = authority.link_face_id(user_id, &label).await {
            tracing::warn!(user_id, label = %label, error = %e, "could not record face id");
        }
    }

    Ok(Json(json!({
        "success": true,
        "faceId": label,
        "message": "Face enrolled successfully",
    })))
}

#[derive(Debug, Deserialize)]
struct LoadFaceRequest {
    #[serde(rename = "faceId")]
    face_id: Option<String>,
    embedding: Option<Vec<f32>>,
}

async fn load_face(
    State(state): State<AppState>,
    payload: Result<Json<LoadFaceRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = payload?;
    let (Some(face_id), Some(values)) = (req.face_id.filter(|f| !f.is_empty()), req.embedding) else {
        return Err(ApiError::BadRequest("faceId and embedding are required".into()));
    };

    state
        .store
        .put(&face_id, Embedding::new(values))
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    tracing::info!(label = %face_id, known_faces = state.store.len(), "embedding loaded");

    Ok(Json(json!({
        "success": true,
        "message": "Face loaded successfully",
    })))
}
