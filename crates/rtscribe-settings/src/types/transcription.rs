//! Transcription backend settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Transcription backend settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TranscriptionSettings {
    /// Base URL of the streaming transcription sidecar.
    pub base_url: String,
    /// Model loaded at startup.
    pub default_model: String,
    /// Language used when a request carries no hint.
    pub preferred_language: String,
    /// Connect timeout towards the sidecar, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Maximum silence between two streamed segments, in milliseconds.
    pub segment_timeout_ms: u64,
    /// How long the sidecar may take to accept a job, in milliseconds.
    pub start_timeout_ms: u64,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8787".to_string(),
            default_model: "tiny".to_string(),
            preferred_language: "en".to_string(),
            connect_timeout_ms: 10_000,
            segment_timeout_ms: 120_000,
            start_timeout_ms: 30_000,
        }
    }
}

impl TranscriptionSettings {
    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Segment timeout as a [`Duration`].
    pub fn segment_timeout(&self) -> Duration {
        Duration::from_millis(self.segment_timeout_ms)
    }

    /// Start timeout as a [`Duration`].
    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }
}
