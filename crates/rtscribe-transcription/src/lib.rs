//! Streaming transcription backends.
//!
//! The engine treats the speech model as an opaque function: a
//! [`Transcriber`] turns one [`TranscriptionRequest`] into a finite,
//! non-restartable [`SegmentStream`] that the caller pulls from.
//!
//! # Backends
//!
//! ```text
//! SidecarTranscriber  → POST {base}/transcribe/stream (multipart) → NDJSON segments
//! ScriptedTranscriber → fixed segment script, optionally gated step by step
//! ```

#![deny(unsafe_code)]

pub mod language;
pub mod scripted;
pub mod sidecar;
pub mod transcriber;
pub mod types;

pub use language::{locked_language, resolve_language};
pub use scripted::{ScriptGate, ScriptStep, ScriptedTranscriber};
pub use sidecar::SidecarTranscriber;
pub use transcriber::{SegmentStream, Transcriber};
pub use types::{AudioSource, TranscribedSegment, TranscriptionError, TranscriptionRequest};
