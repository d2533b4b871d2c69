//! # HTTP Surface
//!
//! axum router exposing the coordinator under `/api`. Handlers are thin:
//! extract, call the orchestrator, wrap the result. Every failure is a
//! [`CoordError`] and renders as `{"error": "..."}` with its mapped status.
//!
//! | Path | Caller |
//! |---|---|
//! | `POST /api/register`, `POST /api/heartbeat` | devices |
//! | `POST /api/rotation_complete`, `POST /api/scan_complete` | actuator |
//! | `POST /api/capture_complete`, `POST /api/upload` | capture |
//! | `GET /api/status`, `POST /api/{start,abort,lcd,capture_single,motor}` | operator |

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, DefaultBodyLimit, FromRequestParts, Multipart, State},
    http::{header, request::Parts},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures::StreamExt;
use log::{info, warn};
use std::io;
use std::path::Path;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

use crate::common::error::{CoordError, CoordResult};
use crate::common::messages::{
    AbortResponse, LcdRequest, MessageResponse, MotorRequest, MotorResponse, OkResponse,
    RegisterRequest, RegisterResponse, StatusResponse, StepRequest, UploadResponse,
};
use crate::devices::DeviceRole;
use crate::server::orchestrator::ScanOrchestrator;
use crate::server::photos::PhotoPayload;

type AppState = Arc<ScanOrchestrator>;

/// Build the coordinator router.
///
/// # Arguments
/// - `orchestrator`: shared scan state machine
/// - `max_body_bytes`: upper bound on any request body (photo uploads)
///
/// # Example
/// ```ignore
/// let app = router(Arc::new(orchestrator), config.server.max_upload_bytes);
/// axum::serve(listener, app).await?;
/// ```
pub fn router(orchestrator: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/api/register", post(register))
        .route("/api/heartbeat", post(heartbeat))
        .route("/api/status", get(status))
        .route("/api/start", post(start))
        .route("/api/rotation_complete", post(rotation_complete))
        .route("/api/capture_complete", post(capture_complete))
        .route("/api/scan_complete", post(scan_complete))
        .route("/api/abort", post(abort))
        .route("/api/upload", post(upload))
        .route("/api/lcd", post(lcd))
        .route("/api/capture_single", post(capture_single))
        .route("/api/motor", post(motor))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .with_state(orchestrator)
}

// ============================================================================
// EXTRACTORS
// ============================================================================

/// Token from `Authorization: Bearer <token>`. Absent or malformed
/// headers reject with `Unauthorized` before the handler runs.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = CoordError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| BearerToken(token.to_string()))
            .ok_or(CoordError::Unauthorized)
    }
}

/// Malformed JSON is a validation failure, not axum's default 422.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> CoordResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| CoordError::Validation(rejection.body_text()))
}

// ============================================================================
// DEVICE ENDPOINTS
// ============================================================================

async fn register(
    State(orchestrator): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> CoordResult<Json<RegisterResponse>> {
    let request = json_body(payload)?;
    Ok(Json(orchestrator.register(request).await?))
}

async fn heartbeat(
    State(orchestrator): State<AppState>,
    BearerToken(token): BearerToken,
) -> CoordResult<Json<OkResponse>> {
    orchestrator.heartbeat(&token).await?;
    Ok(Json(OkResponse::default()))
}

async fn rotation_complete(
    State(orchestrator): State<AppState>,
    BearerToken(token): BearerToken,
    payload: Result<Json<StepRequest>, JsonRejection>,
) -> CoordResult<Json<OkResponse>> {
    let StepRequest { step } = json_body(payload)?;
    let stored = orchestrator.rotation_complete(&token, step).await?;
    Ok(Json(OkResponse::stored(stored)))
}

async fn capture_complete(
    State(orchestrator): State<AppState>,
    BearerToken(token): BearerToken,
    payload: Result<Json<StepRequest>, JsonRejection>,
) -> CoordResult<Json<OkResponse>> {
    let StepRequest { step } = json_body(payload)?;
    orchestrator.capture_complete(&token, step).await?;
    Ok(Json(OkResponse::default()))
}

async fn scan_complete(
    State(orchestrator): State<AppState>,
    BearerToken(token): BearerToken,
) -> CoordResult<Json<OkResponse>> {
    // Reconstruction keeps running after the response; its handle is not needed here
    let _reconstruction = orchestrator.scan_complete(&token).await?;
    Ok(Json(OkResponse::default()))
}

/// Step for an upload that carried no `step` field, taken from the first
/// number in the file name (`photo_3.jpg`, `photo_3_1700000000.jpg`).
fn step_from_filename(filename: &str) -> Option<i64> {
    let stem = Path::new(filename).file_stem()?.to_str()?;
    stem.split(|c: char| !c.is_ascii_digit())
        .find(|digits| !digits.is_empty())?
        .parse()
        .ok()
}

/// Multipart upload with an `image` file field and an optional `step`
/// text field.
///
/// When `step` arrives first the image is streamed straight to disk.
/// Otherwise the image is held in memory (bounded by the body limit) until
/// the form ends; the step then comes from a later `step` field, the file
/// name, or defaults to 0.
async fn upload(
    State(orchestrator): State<AppState>,
    BearerToken(token): BearerToken,
    mut multipart: Multipart,
) -> CoordResult<Json<UploadResponse>> {
    orchestrator.authorize(&token, DeviceRole::Capture).await?;

    let bad_multipart =
        |e: axum::extract::multipart::MultipartError| CoordError::Validation(e.body_text());
    let mut step: Option<i64> = None;
    let mut pending: Option<(String, Bytes)> = None;

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "step" => {
                let text = field.text().await.map_err(bad_multipart)?;
                step = Some(text.trim().parse().map_err(|_| {
                    CoordError::Validation(format!("Invalid step: {}", text.trim()))
                })?);
            }
            "image" => {
                let filename = field.file_name().unwrap_or("image.jpg").to_string();

                let Some(step) = step else {
                    let image = field.bytes().await.map_err(bad_multipart)?;
                    pending = Some((filename, image));
                    continue;
                };

                let chunks =
                    field.map(|chunk| chunk.map_err(|e| io::Error::new(io::ErrorKind::Other, e)));
                let stored_as = orchestrator
                    .upload(&token, step, PhotoPayload::stream(chunks))
                    .await?;
                return Ok(Json(stored(filename, step, stored_as)));
            }
            other => warn!("Ignoring unexpected upload field '{}'", other),
        }
    }

    let (filename, image) =
        pending.ok_or_else(|| CoordError::Validation("No image file provided".to_string()))?;
    let step = step
        .or_else(|| step_from_filename(&filename))
        .unwrap_or(0);

    let stored_as = orchestrator
        .upload(&token, step, PhotoPayload::from(image))
        .await?;
    Ok(Json(stored(filename, step, stored_as)))
}

fn stored(filename: String, step: i64, stored_as: String) -> UploadResponse {
    info!("📤 Upload {} for step {} stored as {}", filename, step, stored_as);
    UploadResponse {
        message: format!("Image {} uploaded successfully", filename),
        stored_as,
    }
}

// ============================================================================
// OPERATOR ENDPOINTS
// ============================================================================

async fn status(State(orchestrator): State<AppState>) -> Json<StatusResponse> {
    Json(orchestrator.status().await)
}

async fn start(State(orchestrator): State<AppState>) -> CoordResult<Json<MessageResponse>> {
    orchestrator.start().await?;
    Ok(Json(MessageResponse::new("Scan started")))
}

async fn abort(State(orchestrator): State<AppState>) -> CoordResult<Json<AbortResponse>> {
    let errors = orchestrator.abort().await?;
    let message = if errors.is_empty() {
        "Scan aborted successfully"
    } else {
        "Scan aborted with errors"
    };
    Ok(Json(AbortResponse {
        message: message.to_string(),
        errors,
    }))
}

async fn lcd(
    State(orchestrator): State<AppState>,
    payload: Result<Json<LcdRequest>, JsonRejection>,
) -> CoordResult<Json<MessageResponse>> {
    orchestrator.lcd(json_body(payload)?).await?;
    Ok(Json(MessageResponse::new("Display updated")))
}

async fn capture_single(State(orchestrator): State<AppState>) -> CoordResult<impl IntoResponse> {
    let image = orchestrator.capture_single().await?;
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], image))
}

async fn motor(
    State(orchestrator): State<AppState>,
    payload: Result<Json<MotorRequest>, JsonRejection>,
) -> CoordResult<Json<MotorResponse>> {
    Ok(Json(orchestrator.motor(json_body(payload)?).await?))
}
