//! HTTP error mapping.
//!
//! Every failure is rendered as `{"error":{"code":..,"message":..}}` with a
//! status derived from the engine error kind.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rtscribe_rtc::{NegotiationError, RtcError};
use rtscribe_transcription::TranscriptionError;
use serde_json::json;
use tracing::{error, warn};

/// Request was malformed.
pub const BAD_REQUEST: &str = "BAD_REQUEST";
/// The transcriber refused to load a model.
pub const MODEL_LOAD_FAILED: &str = "MODEL_LOAD_FAILED";
/// Unexpected server-side failure.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

/// Errors returned by route handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Engine error.
    #[error(transparent)]
    Rtc(#[from] RtcError),

    /// Malformed request body or parameter.
    #[error("{0}")]
    BadRequest(String),

    /// `/infer` without a connection id and no connection to fall back to.
    #[error("no connection available")]
    NoConnection,

    /// Model load rejected by the transcriber.
    #[error("model load failed: {0}")]
    ModelLoad(#[from] TranscriptionError),

    /// Filesystem failure while storing an upload.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Rtc(e) => e.code(),
            Self::BadRequest(_) => BAD_REQUEST,
            Self::NoConnection => rtscribe_rtc::errors::CONNECTION_NOT_FOUND,
            Self::ModelLoad(_) => MODEL_LOAD_FAILED,
            Self::Io(_) => INTERNAL_ERROR,
        }
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Rtc(e) => rtc_status(e),
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NoConnection => StatusCode::NOT_FOUND,
            Self::ModelLoad(TranscriptionError::ModelNotAvailable(_)) => StatusCode::NOT_FOUND,
            Self::ModelLoad(_) => StatusCode::BAD_GATEWAY,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn rtc_status(e: &RtcError) -> StatusCode {
    match e {
        RtcError::Negotiation(NegotiationError::InvalidOffer(_)) => StatusCode::BAD_REQUEST,
        RtcError::Negotiation(NegotiationError::Transport(_)) => StatusCode::BAD_GATEWAY,
        RtcError::Negotiation(NegotiationError::TimedOut(_)) | RtcError::Timeout { .. } => {
            StatusCode::GATEWAY_TIMEOUT
        }
        RtcError::SessionConflict { .. }
        | RtcError::ChannelNotReady(_)
        | RtcError::ChannelClosed { .. } => StatusCode::CONFLICT,
        RtcError::ConnectionNotFound(_) => StatusCode::NOT_FOUND,
        RtcError::Transcription(_) => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.code(), error = %self, "request failed");
        } else {
            warn!(code = self.code(), error = %self, "request rejected");
        }
        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}
