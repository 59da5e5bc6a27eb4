//! In-process transport.
//!
//! [`LoopbackTransport`] accepts any well-formed offer without touching the
//! network and hands the remote side of each peer to the caller as a
//! [`LoopbackPeer`]. Tests drive channel open/close and peer failure from
//! there and read what the server sent from the channel's outbox.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::errors::TransportError;
use crate::transport::{PeerChannel, PeerEvent, PeerHandle, PeerLink, PeerTransport, SessionDescription};

// ── Channel ─────────────────────────────────────────────────────────────────

/// In-memory [`PeerChannel`]. Every sent message lands in the outbox
/// returned by [`LoopbackChannel::pair`].
pub struct LoopbackChannel {
    label: String,
    outbox: mpsc::UnboundedSender<String>,
    closed: CancellationToken,
    hold: watch::Sender<bool>,
    fail_sends: AtomicBool,
    flushes: AtomicU64,
}

impl LoopbackChannel {
    /// Create a channel and the receiver for everything sent on it.
    pub fn pair(label: impl Into<String>) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (outbox, rx) = mpsc::unbounded_channel();
        let (hold, _) = watch::channel(false);
        let channel = Arc::new(Self {
            label: label.into(),
            outbox,
            closed: CancellationToken::new(),
            hold,
            fail_sends: AtomicBool::new(false),
            flushes: AtomicU64::new(0),
        });
        (channel, rx)
    }

    /// Make `flush` block until released (simulates a congested transport).
    pub fn hold_flush(&self, hold: bool) {
        let _ = self.hold.send_replace(hold);
    }

    /// Make every `send_text` fail.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Relaxed);
    }

    /// Completed flushes.
    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    /// Whether the channel was closed from either side.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[async_trait]
impl PeerChannel for LoopbackChannel {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        if self.fail_sends.load(Ordering::Relaxed) {
            return Err(TransportError::Send("injected failure".into()));
        }
        self.outbox
            .send(text.to_string())
            .map_err(|_| TransportError::Closed)
    }

    async fn flush(&self) -> Result<(), TransportError> {
        let mut released = self.hold.subscribe();
        tokio::select! {
            biased;
            () = self.closed.cancelled() => Err(TransportError::Closed),
            _ = released.wait_for(|held| !*held) => {
                let _ = self.flushes.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    async fn close(&self) {
        self.closed.cancel();
    }
}

// ── Peer ────────────────────────────────────────────────────────────────────

struct LoopbackHandle {
    closed: CancellationToken,
}

#[async_trait]
impl PeerHandle for LoopbackHandle {
    async fn close(&self) {
        self.closed.cancel();
    }
}

/// Remote side of one loopback peer connection.
pub struct LoopbackPeer {
    offer: SessionDescription,
    answer: SessionDescription,
    events: mpsc::Sender<PeerEvent>,
    closed: CancellationToken,
    channel: Mutex<Option<Arc<LoopbackChannel>>>,
}

impl LoopbackPeer {
    /// Offer this peer was created from.
    pub fn offer(&self) -> &SessionDescription {
        &self.offer
    }

    /// Answer returned to the offerer.
    pub fn answer(&self) -> &SessionDescription {
        &self.answer
    }

    /// Open a data channel towards the server. Returns the channel and the
    /// receiver for messages the server sends on it.
    pub async fn open_channel(
        &self,
        label: &str,
    ) -> (Arc<LoopbackChannel>, mpsc::UnboundedReceiver<String>) {
        let (channel, outbox) = LoopbackChannel::pair(label);
        *self.channel.lock() = Some(Arc::clone(&channel));
        let transport: Arc<dyn PeerChannel> = channel.clone();
        let _ = self.events.send(PeerEvent::ChannelOpen(transport)).await;
        (channel, outbox)
    }

    /// Close the data channel from the remote side.
    pub async fn close_channel(&self) {
        let channel = self.channel.lock().clone();
        if let Some(channel) = channel {
            channel.close().await;
        }
        let _ = self.events.send(PeerEvent::ChannelClosed).await;
    }

    /// Report a peer connection failure.
    pub async fn fail(&self, reason: &str) {
        let _ = self.events.send(PeerEvent::Failed(reason.to_string())).await;
    }

    /// Whether the server closed the peer connection.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

// ── Transport ───────────────────────────────────────────────────────────────

/// How [`LoopbackTransport`] answers offers.
#[derive(Clone, Debug, Default)]
pub enum LoopbackMode {
    /// Answer every well-formed offer.
    #[default]
    Accept,
    /// Fail with a transport error.
    Reject(String),
    /// Never answer.
    Hang,
}

/// In-process [`PeerTransport`].
pub struct LoopbackTransport {
    mode: Mutex<LoopbackMode>,
    peers_tx: mpsc::UnboundedSender<LoopbackPeer>,
    peers_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<LoopbackPeer>>,
    established: AtomicUsize,
}

impl LoopbackTransport {
    /// Create a transport in [`LoopbackMode::Accept`].
    pub fn new() -> Self {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        Self {
            mode: Mutex::new(LoopbackMode::Accept),
            peers_tx,
            peers_rx: tokio::sync::Mutex::new(peers_rx),
            established: AtomicUsize::new(0),
        }
    }

    /// Change how subsequent offers are answered.
    pub fn set_mode(&self, mode: LoopbackMode) {
        *self.mode.lock() = mode;
    }

    /// Next peer established by this transport, in order.
    pub async fn next_peer(&self) -> Option<LoopbackPeer> {
        self.peers_rx.lock().await.recv().await
    }

    /// Number of peers established so far.
    pub fn established(&self) -> usize {
        self.established.load(Ordering::Relaxed)
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerTransport for LoopbackTransport {
    async fn establish(&self, offer: &SessionDescription) -> Result<PeerLink, TransportError> {
        let mode = self.mode.lock().clone();
        match mode {
            LoopbackMode::Accept => {}
            LoopbackMode::Reject(reason) => return Err(TransportError::Negotiation(reason)),
            LoopbackMode::Hang => futures::future::pending::<()>().await,
        }
        if !offer.sdp.trim_start().starts_with("v=") {
            return Err(TransportError::InvalidDescription(
                "sdp must start with a version line".into(),
            ));
        }

        let n = self.established.fetch_add(1, Ordering::Relaxed) + 1;
        let answer = SessionDescription::answer(format!(
            "v=0\r\no=rtscribe-loopback {n} 1 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n"
        ));
        let (events_tx, events_rx) = mpsc::channel(16);
        let closed = CancellationToken::new();

        let peer = LoopbackPeer {
            offer: offer.clone(),
            answer: answer.clone(),
            events: events_tx,
            closed: closed.clone(),
            channel: Mutex::new(None),
        };
        let _ = self.peers_tx.send(peer);

        Ok(PeerLink {
            answer,
            events: events_rx,
            handle: Arc::new(LoopbackHandle { closed }),
        })
    }
}
