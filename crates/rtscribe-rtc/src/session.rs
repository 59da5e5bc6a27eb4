//! # Transcription sessions
//!
//! One session drives one transcription job bound to one connection:
//!
//! ```text
//! pending ──start──▶ running ──end of stream──▶ completed
//!                       │──cancel / channel close──▶ cancelled
//!                       └──send or backend error──▶ failed
//! ```
//!
//! While running, the session pulls the next segment (raced against its
//! cancellation token), assigns the next sequence number, and pushes it
//! through the [`ChannelManager`]. Sequence numbers start at 1 and are
//! gapless as seen by the receiver: the first failed send ends the session.
//! Terminal states are reported exactly once.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use metrics::counter;
use parking_lot::Mutex;
use rtscribe_core::{ChannelMessage, ConnectionId, SegmentMessage, SessionId, StatusMessage};
use rtscribe_transcription::{
    AudioSource, SegmentStream, Transcriber, TranscriptionRequest, resolve_language,
};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, instrument, warn};

use crate::channel::ChannelManager;
use crate::errors::RtcError;
use crate::metrics::{RTC_SEGMENTS_SENT_TOTAL, RTC_SESSIONS_TOTAL};

/// Lifecycle state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Claimed, transcription not started yet.
    Pending,
    /// Streaming segments.
    Running,
    /// Transcription reached end of stream.
    Completed,
    /// Cancelled externally.
    Cancelled,
    /// Send failure or transcription error.
    Failed,
}

impl SessionState {
    /// Whether the session is finished.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

struct SessionShared {
    id: SessionId,
    connection_id: ConnectionId,
    source: String,
    language: String,
    started_at: DateTime<Utc>,
    state: watch::Sender<SessionState>,
    cancel: CancellationToken,
    segments: AtomicU64,
    error: Mutex<Option<String>>,
}

/// Shared handle to a session. Cheap to clone.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
}

impl SessionHandle {
    pub(crate) fn new_pending(connection_id: ConnectionId, source: String, language: String) -> Self {
        let (state, _) = watch::channel(SessionState::Pending);
        Self {
            shared: Arc::new(SessionShared {
                id: SessionId::new(),
                connection_id,
                source,
                language,
                started_at: Utc::now(),
                state,
                cancel: CancellationToken::new(),
                segments: AtomicU64::new(0),
                error: Mutex::new(None),
            }),
        }
    }

    /// Session id.
    pub fn id(&self) -> &SessionId {
        &self.shared.id
    }

    /// Connection the session is bound to.
    pub fn connection_id(&self) -> &ConnectionId {
        &self.shared.connection_id
    }

    /// Audio source reference.
    pub fn source(&self) -> &str {
        &self.shared.source
    }

    /// Language captured at start.
    pub fn language(&self) -> &str {
        &self.shared.language
    }

    /// When the session was created.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.shared.started_at
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Whether the session is finished.
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Segments delivered so far (equals the last delivered sequence).
    pub fn segments_sent(&self) -> u64 {
        self.shared.segments.load(Ordering::Acquire)
    }

    /// Failure description for `failed` sessions.
    pub fn error(&self) -> Option<String> {
        self.shared.error.lock().clone()
    }

    /// Request cancellation. The session stops at its next suspension point.
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Wait until the session reaches a terminal state.
    pub async fn wait_terminal(&self) -> SessionState {
        let mut rx = self.shared.state.subscribe();
        // the sender lives as long as `self`, so this only errs if it never finishes
        match rx.wait_for(|s| s.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }

    fn set_running(&self) {
        let _ = self.shared.state.send_if_modified(|state| {
            if *state == SessionState::Pending {
                *state = SessionState::Running;
                true
            } else {
                false
            }
        });
    }

    fn record_sent(&self, sequence: u64) {
        self.shared.segments.store(sequence, Ordering::Release);
    }

    /// Move to a terminal state. Returns `false` if already terminal.
    pub(crate) fn finish(&self, next: SessionState, error: Option<String>) -> bool {
        self.shared.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *self.shared.error.lock() = error;
            *state = next;
            true
        })
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.shared.id)
            .field("connection_id", &self.shared.connection_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Collaborators shared by every session.
#[derive(Clone)]
pub struct SessionContext {
    /// Channel manager (and, through it, the registry).
    pub channels: ChannelManager,
    /// Transcription backend.
    pub transcriber: Arc<dyn Transcriber>,
    /// Send a terminal `status` message after the last segment.
    pub emit_status_events: bool,
    /// Upper bound on the backend accepting a job.
    pub start_timeout: Duration,
}

/// Parameters for [`TranscriptionSession::start`].
#[derive(Clone, Debug)]
pub struct StartRequest {
    /// Target connection.
    pub connection_id: ConnectionId,
    /// Audio to transcribe.
    pub source: AudioSource,
    /// Caller's language hint.
    pub language_hint: Option<String>,
    /// Active model identifier.
    pub model: String,
    /// Preferred language captured at start.
    pub preferred_language: String,
}

/// A running transcription bound to one connection.
pub struct TranscriptionSession {
    ctx: SessionContext,
    handle: SessionHandle,
    stream: SegmentStream,
}

impl TranscriptionSession {
    /// Claim the connection, start transcription and spawn the streaming
    /// task.
    ///
    /// Errors are returned synchronously: `ConnectionNotFound`,
    /// `ChannelNotReady` or `SessionConflict` leave no trace;
    /// `Transcription`, `Timeout` (backend slower than `start_timeout`) and
    /// `ChannelClosed` (cancelled while starting) mean the slot was claimed
    /// and released again.
    #[instrument(skip_all, fields(connection_id = %request.connection_id))]
    pub async fn start(ctx: &SessionContext, request: StartRequest) -> Result<SessionHandle, RtcError> {
        let StartRequest {
            connection_id,
            source,
            language_hint,
            model,
            preferred_language,
        } = request;

        let language = resolve_language(&model, language_hint.as_deref(), &preferred_language);
        let handle = SessionHandle::new_pending(connection_id.clone(), source.describe(), language.clone());
        let registry = ctx.channels.registry();
        let _ = registry.claim_session(&connection_id, handle.clone())?;

        let request = TranscriptionRequest {
            source,
            language,
            model,
        };
        let started = tokio::select! {
            biased;
            () = handle.shared.cancel.cancelled() => None,
            started = tokio::time::timeout(ctx.start_timeout, ctx.transcriber.transcribe(request)) => Some(started),
        };
        let stream = match started {
            Some(Ok(Ok(stream))) => stream,
            Some(Ok(Err(e))) => {
                warn!(
                    session_id = %handle.id(),
                    error = %e,
                    category = e.category(),
                    "transcription failed to start"
                );
                abandon_start(ctx, &handle, SessionState::Failed, Some(e.to_string()));
                return Err(RtcError::Transcription(e.to_string()));
            }
            Some(Err(_)) => {
                let after = ctx.start_timeout;
                warn!(session_id = %handle.id(), ?after, "transcription did not start in time");
                abandon_start(
                    ctx,
                    &handle,
                    SessionState::Failed,
                    Some(format!("transcription did not start within {after:?}")),
                );
                return Err(RtcError::Timeout {
                    operation: "transcribe",
                    after,
                });
            }
            None => {
                info!(session_id = %handle.id(), "session cancelled before transcription started");
                abandon_start(ctx, &handle, SessionState::Cancelled, None);
                return Err(RtcError::ChannelClosed { connection_id });
            }
        };

        handle.set_running();
        info!(
            session_id = %handle.id(),
            source = handle.source(),
            language = handle.language(),
            backend = ctx.transcriber.name(),
            "session started"
        );

        let span = info_span!("session", session_id = %handle.id(), connection_id = %connection_id);
        let session = Self {
            ctx: ctx.clone(),
            handle: handle.clone(),
            stream,
        };
        let _ = tokio::spawn(session.run().instrument(span));
        Ok(handle)
    }

    async fn run(self) {
        let Self {
            ctx,
            handle,
            mut stream,
        } = self;
        let connection_id = handle.connection_id().clone();
        let mut sequence: u64 = 0;

        let (state, error) = loop {
            let next = tokio::select! {
                biased;
                () = handle.shared.cancel.cancelled() => break (SessionState::Cancelled, None),
                next = stream.next() => next,
            };
            let segment = match next {
                None => break (SessionState::Completed, None),
                Some(Err(e)) => break (SessionState::Failed, Some(e.to_string())),
                Some(Ok(segment)) => segment,
            };
            if handle.is_cancelled() {
                break (SessionState::Cancelled, None);
            }

            sequence += 1;
            let message = ChannelMessage::Segment(SegmentMessage {
                sequence,
                text: segment.text,
                is_final: segment.is_final,
                start: segment.start,
                end: segment.end,
            });
            let payload = match message.to_json() {
                Ok(payload) => payload,
                Err(e) => break (SessionState::Failed, Some(e.to_string())),
            };

            match ctx.channels.send(&connection_id, &payload).await {
                Ok(()) => {
                    handle.record_sent(sequence);
                    counter!(RTC_SEGMENTS_SENT_TOTAL).increment(1);
                    debug!(sequence, is_final = segment.is_final, "segment sent");
                }
                Err(_) if handle.is_cancelled() => break (SessionState::Cancelled, None),
                Err(e) => break (SessionState::Failed, Some(e.to_string())),
            }
        };
        // anything the backend still produces is dropped with the stream
        drop(stream);

        if ctx.emit_status_events
            && state != SessionState::Cancelled
            && ctx.channels.is_open(&connection_id)
        {
            send_status(&ctx, &handle, state, error.clone()).await;
        }

        if handle.finish(state, error.clone()) {
            counter!(RTC_SESSIONS_TOTAL, "outcome" => state.as_str()).increment(1);
            let segments = handle.segments_sent();
            match state {
                SessionState::Failed => warn!(segments, error = error.as_deref().unwrap_or(""), "session failed"),
                _ => info!(segments, state = state.as_str(), "session finished"),
            }
        }
        let _ = ctx.channels.registry().finish_session(&connection_id);
    }
}

/// Terminate a session that never reached `running` and release its slot.
fn abandon_start(
    ctx: &SessionContext,
    handle: &SessionHandle,
    state: SessionState,
    error: Option<String>,
) {
    if handle.finish(state, error) {
        counter!(RTC_SESSIONS_TOTAL, "outcome" => state.as_str()).increment(1);
    }
    let _ = ctx.channels.registry().finish_session(handle.connection_id());
}

async fn send_status(
    ctx: &SessionContext,
    handle: &SessionHandle,
    state: SessionState,
    error: Option<String>,
) {
    let status = ChannelMessage::Status(StatusMessage {
        session_id: handle.id().to_string(),
        state: state.as_str().to_string(),
        segments: handle.segments_sent(),
        error,
    });
    let payload = match status.to_json() {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "failed to encode status event");
            return;
        }
    };
    if let Err(e) = ctx.channels.send(handle.connection_id(), &payload).await {
        debug!(error = %e, "status event not delivered");
    }
}
