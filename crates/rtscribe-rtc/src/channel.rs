//! # Channel lifecycle
//!
//! [`Channel`] wraps a transport [`PeerChannel`] with a readiness state and
//! a serialized send path: each `send` transmits and then flushes under one
//! lock, so the receiver gets streamed partial results as they are produced
//! instead of when some unrelated event drains the transport buffer.
//!
//! [`ChannelManager`] maps connection events onto the registry: open,
//! close, peer failure, readiness waits and server-initiated teardown.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use metrics::histogram;
use parking_lot::Mutex;
use rtscribe_core::ConnectionId;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::connection::ConnectionState;
use crate::errors::RtcError;
use crate::metrics::RTC_SEND_DURATION_SECONDS;
use crate::registry::ConnectionRegistry;
use crate::transport::PeerChannel;

/// Readiness of a channel. A [`Channel`] exists only once the transport
/// reported it open; before that the connection itself is `connecting`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    /// Usable.
    Open,
    /// Closed; never reopens.
    Closed,
}

/// A data channel attached to one connection.
pub struct Channel {
    connection_id: ConnectionId,
    transport: Arc<dyn PeerChannel>,
    state: Mutex<ChannelState>,
    closed: CancellationToken,
    send_lock: tokio::sync::Mutex<()>,
    queued: AtomicUsize,
    sent: AtomicU64,
}

impl Channel {
    /// Wrap an open transport channel.
    pub fn new(connection_id: ConnectionId, transport: Arc<dyn PeerChannel>) -> Self {
        Self {
            connection_id,
            transport,
            state: Mutex::new(ChannelState::Open),
            closed: CancellationToken::new(),
            send_lock: tokio::sync::Mutex::new(()),
            queued: AtomicUsize::new(0),
            sent: AtomicU64::new(0),
        }
    }

    /// Connection this channel belongs to.
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Transport label.
    pub fn label(&self) -> &str {
        self.transport.label()
    }

    /// Current readiness.
    pub fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    /// Whether sends are accepted.
    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Whether the channel has closed.
    pub fn is_closed(&self) -> bool {
        self.state() == ChannelState::Closed
    }

    /// Messages waiting for the send lock or in flight.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    /// Messages transmitted and flushed.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Mark closed and fail in-flight sends. Returns `false` if it was
    /// already closed.
    pub fn mark_closed(&self) -> bool {
        {
            let mut state = self.state.lock();
            if *state == ChannelState::Closed {
                return false;
            }
            *state = ChannelState::Closed;
        }
        self.closed.cancel();
        true
    }

    /// Transmit `payload` and flush, bounded by `timeout`.
    ///
    /// Fails with `ChannelClosed` if the channel is not open or closes
    /// before the flush completes.
    pub async fn send(&self, payload: &str, timeout: Duration) -> Result<(), RtcError> {
        if !self.is_open() {
            return Err(self.closed_error());
        }

        let _ = self.queued.fetch_add(1, Ordering::Relaxed);
        let result = tokio::select! {
            biased;
            () = self.closed.cancelled() => Err(self.closed_error()),
            outcome = tokio::time::timeout(timeout, self.transmit(payload)) => match outcome {
                Ok(result) => result,
                Err(_) => Err(RtcError::Timeout { operation: "send", after: timeout }),
            },
        };
        let _ = self.queued.fetch_sub(1, Ordering::Relaxed);
        result
    }

    async fn transmit(&self, payload: &str) -> Result<(), RtcError> {
        let _guard = self.send_lock.lock().await;
        if !self.is_open() {
            return Err(self.closed_error());
        }
        self.transport.send_text(payload).await.map_err(|e| {
            debug!(connection_id = %self.connection_id, error = %e, "transport send failed");
            self.closed_error()
        })?;
        self.transport.flush().await.map_err(|e| {
            debug!(connection_id = %self.connection_id, error = %e, "transport flush failed");
            self.closed_error()
        })?;
        let _ = self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn close_transport(&self) {
        self.transport.close().await;
    }

    fn closed_error(&self) -> RtcError {
        RtcError::ChannelClosed {
            connection_id: self.connection_id.clone(),
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("connection_id", &self.connection_id)
            .field("label", &self.label())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Owns channel lifecycle for every connection in the registry.
#[derive(Clone)]
pub struct ChannelManager {
    registry: Arc<ConnectionRegistry>,
    send_timeout: Duration,
}

impl ChannelManager {
    /// Create a manager over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>, send_timeout: Duration) -> Self {
        Self {
            registry,
            send_timeout,
        }
    }

    /// Registry this manager operates on.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Record an opened channel and flip the connection to `connected`.
    ///
    /// If an open channel is already attached, the new one is closed and
    /// the existing one kept.
    #[instrument(skip_all, fields(connection_id = %connection_id, label = transport.label()))]
    pub async fn on_channel_open(
        &self,
        connection_id: &ConnectionId,
        transport: Arc<dyn PeerChannel>,
    ) -> Result<Arc<Channel>, RtcError> {
        if let Some(existing) = self.registry.channel(connection_id) {
            if existing.is_open() {
                warn!("second channel opened on connection, keeping the first");
                transport.close().await;
                return Ok(existing);
            }
        }

        let channel = Arc::new(Channel::new(connection_id.clone(), transport));
        self.registry
            .attach_channel(connection_id, Arc::clone(&channel))?;
        info!("channel open");
        Ok(channel)
    }

    /// Send one payload on a connection's channel (transmit + flush),
    /// bounded by the configured send timeout.
    pub async fn send(&self, connection_id: &ConnectionId, payload: &str) -> Result<(), RtcError> {
        let channel = self.registry.channel(connection_id).ok_or_else(|| {
            if self.registry.contains(connection_id) {
                RtcError::ChannelClosed {
                    connection_id: connection_id.clone(),
                }
            } else {
                RtcError::ConnectionNotFound(connection_id.clone())
            }
        })?;

        let started = Instant::now();
        let result = channel.send(payload, self.send_timeout).await;
        histogram!(RTC_SEND_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        result
    }

    /// Whether the connection's channel is open.
    pub fn is_open(&self, connection_id: &ConnectionId) -> bool {
        self.registry
            .channel(connection_id)
            .is_some_and(|c| c.is_open())
    }

    /// The channel closed: cancel the bound session, fail in-flight sends,
    /// mark the connection closed and try to reclaim its slot.
    #[instrument(skip_all, fields(connection_id = %connection_id))]
    pub fn on_channel_close(&self, connection_id: &ConnectionId) {
        self.teardown(connection_id, ConnectionState::Closed);
    }

    /// The peer connection failed.
    #[instrument(skip_all, fields(connection_id = %connection_id))]
    pub fn on_peer_failed(&self, connection_id: &ConnectionId, reason: &str) {
        warn!(reason, "peer connection failed");
        self.teardown(connection_id, ConnectionState::Failed);
    }

    fn teardown(&self, connection_id: &ConnectionId, state: ConnectionState) {
        // cancel first so the session reports `cancelled` rather than a send failure
        if let Some(session) = self.registry.session(connection_id) {
            session.cancel();
        }
        if let Some(channel) = self.registry.channel(connection_id) {
            if channel.mark_closed() {
                info!(sent = channel.sent(), "channel closed");
            }
        }
        if self.registry.get(connection_id).is_some_and(|c| !c.state.is_terminal()) {
            let _ = self.registry.set_state(connection_id, state);
        }
        let _ = self.registry.reclaim(connection_id);
    }

    /// Wait until the connection's channel is open.
    ///
    /// Fails with `ChannelNotReady` on timeout, `ChannelClosed` if the
    /// connection closes or fails first.
    pub async fn wait_open(
        &self,
        connection_id: &ConnectionId,
        timeout: Duration,
    ) -> Result<(), RtcError> {
        let mut rx = self
            .registry
            .subscribe(connection_id)
            .ok_or_else(|| RtcError::ConnectionNotFound(connection_id.clone()))?;

        let waited = tokio::time::timeout(
            timeout,
            rx.wait_for(|s| !matches!(s, ConnectionState::New | ConnectionState::Connecting)),
        )
        .await;

        match waited {
            Ok(Ok(state)) if *state == ConnectionState::Connected => Ok(()),
            Ok(_) => Err(RtcError::ChannelClosed {
                connection_id: connection_id.clone(),
            }),
            Err(_) => Err(RtcError::ChannelNotReady(connection_id.clone())),
        }
    }

    /// Server-initiated teardown: close the transport channel and the peer
    /// connection, then run the close path.
    pub async fn close(&self, connection_id: &ConnectionId) -> Result<(), RtcError> {
        if !self.registry.contains(connection_id) {
            return Err(RtcError::ConnectionNotFound(connection_id.clone()));
        }
        if let Some(channel) = self.registry.channel(connection_id) {
            channel.close_transport().await;
        }
        if let Some(peer) = self.registry.peer(connection_id) {
            peer.close().await;
        }
        self.on_channel_close(connection_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackChannel;
    use assert_matches::assert_matches;

    fn manager() -> ChannelManager {
        ChannelManager::new(Arc::new(ConnectionRegistry::new()), Duration::from_secs(1))
    }

    fn register(manager: &ChannelManager) -> ConnectionId {
        let id = ConnectionId::new();
        manager.registry().register(id.clone(), None);
        id
    }

    #[tokio::test]
    async fn open_then_send_flushes() {
        let manager = manager();
        let id = register(&manager);
        let (transport, mut outbox) = LoopbackChannel::pair("dc");
        let channel = manager
            .on_channel_open(&id, transport.clone())
            .await
            .unwrap();

        manager.send(&id, "one").await.unwrap();
        manager.send(&id, "two").await.unwrap();

        assert_eq!(outbox.recv().await.as_deref(), Some("one"));
        assert_eq!(outbox.recv().await.as_deref(), Some("two"));
        assert_eq!(channel.sent(), 2);
        assert_eq!(transport.flushes(), 2);
        assert_eq!(channel.queued(), 0);
    }

    #[tokio::test]
    async fn send_without_channel() {
        let manager = manager();
        let id = register(&manager);
        assert_matches!(
            manager.send(&id, "x").await,
            Err(RtcError::ChannelClosed { .. })
        );
        assert_matches!(
            manager.send(&ConnectionId::new(), "x").await,
            Err(RtcError::ConnectionNotFound(_))
        );
    }

    #[tokio::test]
    async fn no_send_after_close() {
        let manager = manager();
        let id = register(&manager);
        let (transport, mut outbox) = LoopbackChannel::pair("dc");
        let channel = manager.on_channel_open(&id, transport).await.unwrap();

        manager.on_channel_close(&id);
        assert!(channel.is_closed());
        assert_matches!(
            channel.send("late", Duration::from_secs(1)).await,
            Err(RtcError::ChannelClosed { .. })
        );
        // closed with no session: slot reclaimed
        assert!(!manager.registry().contains(&id));
        assert!(outbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn close_fails_in_flight_send() {
        let manager = manager();
        let id = register(&manager);
        let (transport, _outbox) = LoopbackChannel::pair("dc");
        transport.hold_flush(true);
        let channel = manager.on_channel_open(&id, transport).await.unwrap();

        let sender = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.send("stuck", Duration::from_secs(30)).await })
        };
        tokio::task::yield_now().await;
        manager.on_channel_close(&id);

        assert_matches!(sender.await.unwrap(), Err(RtcError::ChannelClosed { .. }));
        assert_eq!(channel.sent(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn send_times_out() {
        let manager = manager();
        let id = register(&manager);
        let (transport, _outbox) = LoopbackChannel::pair("dc");
        transport.hold_flush(true);
        let _ = manager.on_channel_open(&id, transport).await.unwrap();

        assert_matches!(
            manager.send(&id, "x").await,
            Err(RtcError::Timeout { operation: "send", .. })
        );
    }

    #[tokio::test]
    async fn second_channel_is_rejected() {
        let manager = manager();
        let id = register(&manager);
        let (first, _a) = LoopbackChannel::pair("first");
        let (second, _b) = LoopbackChannel::pair("second");
        let _ = manager.on_channel_open(&id, first).await.unwrap();
        let kept = manager.on_channel_open(&id, second.clone()).await.unwrap();
        assert_eq!(kept.label(), "first");
        assert!(second.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_open_times_out() {
        let manager = manager();
        let id = register(&manager);
        assert_matches!(
            manager.wait_open(&id, Duration::from_millis(100)).await,
            Err(RtcError::ChannelNotReady(_))
        );
    }

    #[tokio::test]
    async fn wait_open_resolves_on_open() {
        let manager = manager();
        let id = register(&manager);
        let waiter = {
            let manager = manager.clone();
            let id = id.clone();
            tokio::spawn(async move { manager.wait_open(&id, Duration::from_secs(5)).await })
        };
        let (transport, _outbox) = LoopbackChannel::pair("dc");
        let _ = manager.on_channel_open(&id, transport).await.unwrap();
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn wait_open_fails_on_peer_failure() {
        let manager = manager();
        let id = register(&manager);
        let waiter = {
            let manager = manager.clone();
            let id = id.clone();
            tokio::spawn(async move { manager.wait_open(&id, Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        manager.on_peer_failed(&id, "ice failed");
        assert_matches!(waiter.await.unwrap(), Err(RtcError::ChannelClosed { .. }));
    }

    #[tokio::test]
    async fn server_close_closes_transport() {
        let manager = manager();
        let id = register(&manager);
        let (transport, _outbox) = LoopbackChannel::pair("dc");
        let _ = manager.on_channel_open(&id, transport.clone()).await.unwrap();

        manager.close(&id).await.unwrap();
        assert!(transport.is_closed());
        assert!(!manager.registry().contains(&id));
        assert_matches!(manager.close(&id).await, Err(RtcError::ConnectionNotFound(_)));
    }
}
