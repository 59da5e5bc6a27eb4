//! # Transcriber trait
//!
//! Core abstraction over speech backends. The trait returns a boxed
//! [`Stream`] of segments so the consuming session pulls one segment at a
//! time, each pull being an explicit suspension point.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::types::{TranscribedSegment, TranscriptionError, TranscriptionRequest};

/// Boxed stream of segments returned by [`Transcriber::transcribe`].
///
/// The stream is finite and not restartable: a fresh call is required per
/// session. End of stream means the transcription completed.
pub type SegmentStream =
    Pin<Box<dyn Stream<Item = Result<TranscribedSegment, TranscriptionError>> + Send>>;

/// A speech-to-text backend.
///
/// Implementors must be `Send + Sync`; one instance serves every session.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Make `model` the loaded model. Backends that load per request may
    /// treat this as a no-op.
    async fn load_model(&self, model: &str) -> Result<(), TranscriptionError> {
        let _ = model;
        Ok(())
    }

    /// Start transcribing. Errors returned here happen before any segment
    /// is produced (unreadable source, backend refused the job).
    async fn transcribe(
        &self,
        request: TranscriptionRequest,
    ) -> Result<SegmentStream, TranscriptionError>;
}
