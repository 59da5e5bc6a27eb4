//! # Peer transport seam
//!
//! The engine never touches ICE, DTLS or SCTP directly. A [`PeerTransport`]
//! applies an offer and hands back a [`PeerLink`]: the answer, a handle to
//! tear the peer down, and an event receiver that reports channel
//! lifecycle. Events are buffered in the receiver until the negotiator has
//! registered the connection, so an early `ChannelOpen` is never lost.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::errors::TransportError;

/// An SDP session description with its type (`offer`, `answer`, ...).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// SDP body.
    pub sdp: String,
    /// Description type.
    #[serde(rename = "type")]
    pub kind: String,
}

impl SessionDescription {
    /// An `offer` description.
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            kind: "offer".into(),
        }
    }

    /// An `answer` description.
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            kind: "answer".into(),
        }
    }
}

/// Ordered, message-oriented channel to the remote peer.
///
/// `send_text` may only hand the message to a transport buffer; `flush`
/// returns once that buffer has drained.
#[async_trait]
pub trait PeerChannel: Send + Sync {
    /// Channel label as negotiated with the peer.
    fn label(&self) -> &str;

    /// Queue one text message.
    async fn send_text(&self, text: &str) -> Result<(), TransportError>;

    /// Wait until everything queued so far has left the transport buffer.
    async fn flush(&self) -> Result<(), TransportError>;

    /// Close the channel. Idempotent.
    async fn close(&self);
}

/// Handle to the peer connection as a whole.
#[async_trait]
pub trait PeerHandle: Send + Sync {
    /// Tear down the peer connection. Idempotent.
    async fn close(&self);
}

/// Lifecycle events reported by a transport for one peer.
pub enum PeerEvent {
    /// The data channel became ready.
    ChannelOpen(Arc<dyn PeerChannel>),
    /// The data channel closed.
    ChannelClosed,
    /// The peer connection failed.
    Failed(String),
}

impl std::fmt::Debug for PeerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChannelOpen(channel) => f.debug_tuple("ChannelOpen").field(&channel.label()).finish(),
            Self::ChannelClosed => f.write_str("ChannelClosed"),
            Self::Failed(reason) => f.debug_tuple("Failed").field(reason).finish(),
        }
    }
}

/// Result of establishing a peer session.
pub struct PeerLink {
    /// Local answer to return to the offerer.
    pub answer: SessionDescription,
    /// Lifecycle events for this peer.
    pub events: mpsc::Receiver<PeerEvent>,
    /// Teardown handle.
    pub handle: Arc<dyn PeerHandle>,
}

impl std::fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLink")
            .field("answer", &self.answer)
            .finish_non_exhaustive()
    }
}

/// Establishes peer sessions from remote offers.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Apply `offer` and produce an answer. Suspends until local
    /// negotiation (including candidate gathering) has finished.
    async fn establish(&self, offer: &SessionDescription) -> Result<PeerLink, TransportError>;
}
