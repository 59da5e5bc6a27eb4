//! Deterministic transcriber driven by a fixed script.
//!
//! Used by engine and server tests. A gated script yields one step per
//! permit released through its [`ScriptGate`], which lets a test hold a
//! session in the running state for as long as it needs.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::transcriber::{SegmentStream, Transcriber};
use crate::types::{TranscribedSegment, TranscriptionError, TranscriptionRequest};

/// One step of a script.
#[derive(Clone, Debug)]
pub enum ScriptStep {
    /// Yield a segment.
    Segment(TranscribedSegment),
    /// Yield a backend error.
    Fail(String),
}

/// Releases steps of a gated [`ScriptedTranscriber`].
#[derive(Clone, Debug)]
pub struct ScriptGate {
    permits: Arc<Semaphore>,
}

impl ScriptGate {
    /// Allow `n` more steps to be yielded.
    pub fn release(&self, n: usize) {
        self.permits.add_permits(n);
    }
}

/// Scripted [`Transcriber`].
#[derive(Debug, Default)]
pub struct ScriptedTranscriber {
    steps: Vec<ScriptStep>,
    gate: Option<Arc<Semaphore>>,
    start_error: Option<String>,
    requests: Mutex<Vec<TranscriptionRequest>>,
    loaded: Mutex<Vec<String>>,
}

impl ScriptedTranscriber {
    /// Yield `segments` in order, then end.
    pub fn new(segments: Vec<TranscribedSegment>) -> Self {
        Self::from_steps(segments.into_iter().map(ScriptStep::Segment).collect())
    }

    /// Yield arbitrary steps in order.
    pub fn from_steps(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }

    /// Shorthand for `n` non-final segments `"segment 1"`..`"segment n"`
    /// where the last one is final.
    pub fn numbered(n: usize) -> Self {
        Self::new(
            (1..=n)
                .map(|i| TranscribedSegment::new(format!("segment {i}"), i == n))
                .collect(),
        )
    }

    /// Make every step wait for a permit from the returned gate.
    #[must_use]
    pub fn gated(mut self) -> (Self, ScriptGate) {
        let permits = Arc::new(Semaphore::new(0));
        self.gate = Some(Arc::clone(&permits));
        (self, ScriptGate { permits })
    }

    /// Refuse every job before producing a stream.
    #[must_use]
    pub fn failing_start(mut self, message: impl Into<String>) -> Self {
        self.start_error = Some(message.into());
        self
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<TranscriptionRequest> {
        self.requests.lock().clone()
    }

    /// Models passed to [`Transcriber::load_model`] so far.
    pub fn loaded_models(&self) -> Vec<String> {
        self.loaded.lock().clone()
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn load_model(&self, model: &str) -> Result<(), TranscriptionError> {
        self.loaded.lock().push(model.to_string());
        Ok(())
    }

    async fn transcribe(
        &self,
        request: TranscriptionRequest,
    ) -> Result<SegmentStream, TranscriptionError> {
        self.requests.lock().push(request);
        if let Some(message) = &self.start_error {
            return Err(TranscriptionError::SourceUnavailable(message.clone()));
        }

        let gate = self.gate.clone();
        let stream = futures::stream::iter(self.steps.clone()).then(move |step| {
            let gate = gate.clone();
            async move {
                if let Some(gate) = gate {
                    // a closed semaphore is never produced here
                    if let Ok(permit) = gate.acquire().await {
                        permit.forget();
                    }
                }
                match step {
                    ScriptStep::Segment(segment) => Ok(segment),
                    ScriptStep::Fail(message) => {
                        Err(TranscriptionError::Backend { status: 0, message })
                    }
                }
            }
        });
        Ok(Box::pin(stream))
    }
}
