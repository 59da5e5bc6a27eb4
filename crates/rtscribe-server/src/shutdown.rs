//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use rtscribe_rtc::ChannelManager;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default timeout for graceful shutdown before giving up on tasks.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Coordinates graceful shutdown across the listener, the reaper and the
/// engine.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel every session and close every connection.
    ///
    /// Returns the number of connections closed.
    pub async fn drain_connections(&self, channels: &ChannelManager) -> usize {
        let registry = channels.registry();
        let ids = registry.ids();
        for id in &ids {
            if let Some(session) = registry.session(id) {
                session.cancel();
            }
        }
        let mut closed = 0;
        for id in &ids {
            if channels.close(id).await.is_ok() {
                closed += 1;
            }
        }
        if closed > 0 {
            info!(closed, "connections closed for shutdown");
        }
        closed
    }

    /// Perform a graceful shutdown of all tracked tasks.
    ///
    /// 1. Cancel the shutdown token (signals all tasks)
    /// 2. Wait up to `timeout` for all handles to complete
    pub async fn graceful_shutdown(&self, handles: Vec<JoinHandle<()>>, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        info!(
            task_count = handles.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for tasks to complete"
        );

        let drain = futures::future::join_all(handles);

        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!("shutdown timed out after {timeout:?}, some tasks may still be running");
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use rtscribe_core::ConnectionId;
    use rtscribe_rtc::{
        ConnectionRegistry, LoopbackChannel, SessionContext, SessionState, StartRequest,
        TranscriptionSession,
    };
    use rtscribe_transcription::{AudioSource, ScriptedTranscriber};

    #[test]
    fn shutdown_sets_flag_and_cancels_tokens() {
        let coord = ShutdownCoordinator::new();
        let t1 = coord.token();
        let t2 = coord.token();
        assert!(!coord.is_shutting_down());
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
        assert!(t1.is_cancelled());
        assert!(t2.is_cancelled());
    }

    #[tokio::test]
    async fn graceful_shutdown_awaits_all_tasks() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let handle = tokio::spawn(async move {
            token.cancelled().await;
        });
        coord.graceful_shutdown(vec![handle], None).await;
        assert!(coord.is_shutting_down());
    }

    #[tokio::test]
    async fn graceful_shutdown_times_out() {
        let coord = ShutdownCoordinator::new();
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        });
        coord
            .graceful_shutdown(vec![handle], Some(Duration::from_millis(100)))
            .await;
        assert!(coord.is_shutting_down());
    }

    #[tokio::test]
    async fn drain_cancels_sessions_and_empties_registry() {
        let registry = Arc::new(ConnectionRegistry::new());
        let channels = ChannelManager::new(registry.clone(), Duration::from_secs(1));
        let id = ConnectionId::new();
        registry.register(id.clone(), None);
        let (transport, _outbox) = LoopbackChannel::pair("dc");
        let _ = channels.on_channel_open(&id, transport.clone()).await.unwrap();

        let (transcriber, _gate) = ScriptedTranscriber::numbered(3).gated();
        let ctx = SessionContext {
            channels: channels.clone(),
            transcriber: Arc::new(transcriber),
            emit_status_events: false,
            start_timeout: Duration::from_secs(5),
        };
        let handle = TranscriptionSession::start(
            &ctx,
            StartRequest {
                connection_id: id.clone(),
                source: AudioSource::File("a.wav".into()),
                language_hint: None,
                model: "tiny".into(),
                preferred_language: "en".into(),
            },
        )
        .await
        .unwrap();

        let coord = ShutdownCoordinator::new();
        assert_eq!(coord.drain_connections(&channels).await, 1);
        assert_eq!(handle.wait_terminal().await, SessionState::Cancelled);
        assert!(transport.is_closed());

        // the session task releases the slot once it observes cancellation
        for _ in 0..100 {
            if registry.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(registry.is_empty());
    }
}
