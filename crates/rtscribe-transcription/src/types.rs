//! Core types for transcription backends.

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;

/// One unit of transcription output as produced by a backend.
///
/// Backends do not number segments; the consuming session assigns
/// sequence numbers in the order segments are pulled.
#[derive(Clone, Debug, PartialEq)]
pub struct TranscribedSegment {
    /// Transcribed text.
    pub text: String,
    /// Whether the backend considers this text final.
    pub is_final: bool,
    /// Start offset into the audio, in seconds.
    pub start: Option<f64>,
    /// End offset into the audio, in seconds.
    pub end: Option<f64>,
}

impl TranscribedSegment {
    /// Segment without timing information.
    pub fn new(text: impl Into<String>, is_final: bool) -> Self {
        Self {
            text: text.into(),
            is_final,
            start: None,
            end: None,
        }
    }

    /// Attach start/end offsets in seconds.
    #[must_use]
    pub fn with_timing(mut self, start: f64, end: f64) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }
}

/// Where the audio for a request comes from.
#[derive(Clone, Debug)]
pub enum AudioSource {
    /// A file on local disk (typically an upload under the data dir).
    File(PathBuf),
    /// An in-memory buffer.
    Buffer {
        /// Name reported to the backend (drives container detection).
        name: String,
        /// Raw audio bytes.
        data: Bytes,
    },
}

impl AudioSource {
    /// Short human-readable reference for logs.
    pub fn describe(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Buffer { name, data } => format!("{name} ({} bytes)", data.len()),
        }
    }
}

/// A single transcription job.
#[derive(Clone, Debug)]
pub struct TranscriptionRequest {
    /// Audio to transcribe.
    pub source: AudioSource,
    /// Language code resolved for this job (e.g. `"en"`).
    pub language: String,
    /// Model identifier active when the job started.
    pub model: String,
}

/// Errors that can occur during transcription.
#[derive(Debug, thiserror::Error)]
pub enum TranscriptionError {
    /// The audio source could not be read.
    #[error("audio source unavailable: {0}")]
    SourceUnavailable(String),

    /// The requested model is not available on the backend.
    #[error("model not available: {0}")]
    ModelNotAvailable(String),

    /// The backend reported a failure.
    #[error("backend error ({status}): {message}")]
    Backend {
        /// HTTP status, or 0 for in-stream errors.
        status: u16,
        /// Error description.
        message: String,
    },

    /// Transport failure talking to the backend.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A streamed line could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The backend produced nothing for longer than the segment timeout.
    #[error("no segment received for {0:?}")]
    Stalled(Duration),

    /// Local I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TranscriptionError {
    /// Error category string for logs and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::SourceUnavailable(_) | Self::Io(_) => "source",
            Self::ModelNotAvailable(_) => "model",
            Self::Backend { .. } => "backend",
            Self::Http(_) => "network",
            Self::Decode(_) => "decode",
            Self::Stalled(_) => "stalled",
        }
    }
}
