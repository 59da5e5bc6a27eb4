//! Route handlers for the control plane.
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `GET /ping` | liveness |
//! | `GET /health` | counters |
//! | `GET /metrics` | Prometheus text |
//! | `GET /connections` | registry snapshot |
//! | `POST /offer` | signaling |
//! | `POST /infer` | start a session on a connection |
//! | `POST /cancel` | cancel a connection's session |
//! | `POST /initmodel` | select model and language |
//! | `POST /upload` | store an audio file |

use std::path::{Component, Path};

use axum::Json;
use axum::extract::{Multipart, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use metrics::counter;
use rtscribe_core::{ConnectionId, SessionId};
use rtscribe_rtc::{ConnectionInfo, SessionDescription, SessionHandle, StartRequest, TranscriptionSession};
use rtscribe_transcription::AudioSource;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, instrument};

use crate::errors::ApiError;
use crate::health::{self, HealthResponse};
use crate::metrics::{HTTP_INFER_REQUESTS_TOTAL, HTTP_UPLOAD_BYTES_TOTAL, render};
use crate::server::AppState;
use crate::state::ModelSelection;

// ── Bodies ──────────────────────────────────────────────────────────

/// `POST /offer` response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferResponse {
    /// Answer SDP.
    pub sdp: String,
    /// Always `answer`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Id of the new connection.
    pub connection_id: ConnectionId,
}

/// `POST /infer` request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferRequest {
    /// File under the data directory.
    pub filename: String,
    /// Caller language hint.
    #[serde(default)]
    pub language: Option<String>,
    /// Target connection; defaults to the most recently connected one.
    #[serde(default)]
    pub connection_id: Option<ConnectionId>,
}

/// `POST /cancel` request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    /// Connection whose session to cancel.
    pub connection_id: ConnectionId,
}

/// `POST /cancel` response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    /// Whether an active session was cancelled.
    pub cancelled: bool,
    /// The cancelled session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

/// `POST /initmodel` request.
#[derive(Debug, Deserialize)]
pub struct InitModelRequest {
    /// Model identifier.
    pub model: String,
    /// Preferred language; unchanged when absent.
    #[serde(default)]
    pub language: Option<String>,
}

/// `POST /upload` response.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    /// Stored file name.
    pub filename: String,
}

// ── Handlers ────────────────────────────────────────────────────────

pub(crate) async fn ping() -> Json<Value> {
    Json(json!({ "ping": "pong" }))
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = state.channels.registry();
    Json(health::health_check(
        state.start_time,
        registry.len(),
        registry.active_session_count(),
    ))
}

pub(crate) async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            render(handle),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub(crate) async fn connections(State(state): State<AppState>) -> Json<Vec<ConnectionInfo>> {
    Json(state.channels.registry().list_active())
}

pub(crate) async fn offer(
    State(state): State<AppState>,
    Json(offer): Json<SessionDescription>,
) -> Result<Json<OfferResponse>, ApiError> {
    let negotiated = state.negotiator.negotiate(offer).await?;
    Ok(Json(OfferResponse {
        sdp: negotiated.answer.sdp,
        kind: negotiated.answer.kind,
        connection_id: negotiated.connection_id,
    }))
}

/// Starts the session and returns immediately; results travel over the
/// data channel.
pub(crate) async fn infer(
    State(state): State<AppState>,
    Json(request): Json<InferRequest>,
) -> Result<Json<Value>, ApiError> {
    let outcome = start_session(&state, request).await;
    let label = match &outcome {
        Ok(_) => "started",
        Err(e) => e.code(),
    };
    counter!(HTTP_INFER_REQUESTS_TOTAL, "outcome" => label).increment(1);
    let _ = outcome?;
    Ok(Json(json!([])))
}

#[instrument(skip_all, fields(filename = %request.filename))]
async fn start_session(state: &AppState, request: InferRequest) -> Result<SessionHandle, ApiError> {
    let filename = validate_filename(&request.filename)?;
    let connection_id = match request.connection_id {
        Some(id) => id,
        None => {
            let registry = state.channels.registry();
            registry
                .latest_connected()
                .or_else(|| registry.latest_connecting())
                .ok_or(ApiError::NoConnection)?
        }
    };

    state
        .channels
        .wait_open(&connection_id, state.config.channel_ready_timeout)
        .await?;

    let selection = state.service.snapshot();
    let handle = TranscriptionSession::start(
        &state.sessions,
        StartRequest {
            connection_id,
            source: AudioSource::File(state.config.data_dir.join(filename)),
            language_hint: request.language,
            model: selection.model,
            preferred_language: selection.language,
        },
    )
    .await?;
    Ok(handle)
}

pub(crate) async fn cancel(
    State(state): State<AppState>,
    Json(request): Json<CancelRequest>,
) -> Result<Json<CancelResponse>, ApiError> {
    let registry = state.channels.registry();
    if !registry.contains(&request.connection_id) {
        return Err(rtscribe_rtc::RtcError::ConnectionNotFound(request.connection_id).into());
    }
    let active = registry
        .session(&request.connection_id)
        .filter(|s| !s.is_terminal());
    let Some(session) = active else {
        return Ok(Json(CancelResponse {
            cancelled: false,
            session_id: None,
        }));
    };
    session.cancel();
    info!(connection_id = %request.connection_id, session_id = %session.id(), "session cancel requested");
    Ok(Json(CancelResponse {
        cancelled: true,
        session_id: Some(session.id().clone()),
    }))
}

pub(crate) async fn init_model(
    State(state): State<AppState>,
    Json(request): Json<InitModelRequest>,
) -> Result<Json<ModelSelection>, ApiError> {
    let model = request.model.trim();
    if model.is_empty() {
        return Err(ApiError::BadRequest("model must not be empty".into()));
    }
    let _switch = state.service.lock_switch().await;
    let current = state.service.snapshot();
    if model != current.model {
        state.sessions.transcriber.load_model(model).await?;
    }
    let next = ModelSelection {
        model: model.to_owned(),
        language: request
            .language
            .filter(|l| !l.trim().is_empty())
            .unwrap_or(current.language),
    };
    let _ = state.service.update(next.clone());
    info!(model = %next.model, language = %next.language, "model selected");
    Ok(Json(next))
}

pub(crate) async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_owned)
            .ok_or_else(|| ApiError::BadRequest("file part has no filename".into()))?;
        let filename = validate_filename(&filename)?.to_owned();
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;

        tokio::fs::create_dir_all(&state.config.data_dir).await?;
        tokio::fs::write(state.config.data_dir.join(&filename), &data).await?;
        counter!(HTTP_UPLOAD_BYTES_TOTAL).increment(data.len() as u64);
        info!(filename, bytes = data.len(), "upload stored");
        return Ok(Json(UploadResponse { filename }));
    }
    Err(ApiError::BadRequest("missing multipart field 'file'".into()))
}

/// Accept a bare file name only: no separators, no `..`, not empty.
fn validate_filename(name: &str) -> Result<&str, ApiError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !name.contains(['/', '\\']) => Ok(name),
        _ => Err(ApiError::BadRequest(format!("invalid filename '{name}'"))),
    }
}
