//! Engine error codes and error types.

use std::time::Duration;

use rtscribe_core::ConnectionId;

// ── Error code constants ────────────────────────────────────────────

/// Offer rejected or peer session could not be established.
pub const NEGOTIATION_ERROR: &str = "NEGOTIATION_ERROR";
/// Connection already has an active session.
pub const SESSION_CONFLICT: &str = "SESSION_CONFLICT";
/// Channel is closed or closed during a send.
pub const CHANNEL_CLOSED: &str = "CHANNEL_CLOSED";
/// Transcription backend refused or failed the job.
pub const TRANSCRIPTION_ERROR: &str = "TRANSCRIPTION_ERROR";
/// Connection id is unknown.
pub const CONNECTION_NOT_FOUND: &str = "CONNECTION_NOT_FOUND";
/// Connection exists but its channel is not open.
pub const CHANNEL_NOT_READY: &str = "CHANNEL_NOT_READY";
/// A bounded operation did not finish in time.
pub const TIMEOUT: &str = "TIMEOUT";

/// Failure reported by a peer transport implementation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The remote description could not be parsed or applied.
    #[error("invalid session description: {0}")]
    InvalidDescription(String),

    /// The transport failed while establishing the peer session.
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// Transmitting or flushing a message failed.
    #[error("send failed: {0}")]
    Send(String),

    /// The underlying channel is closed.
    #[error("channel closed")]
    Closed,
}

/// Why a negotiation failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NegotiationError {
    /// The offer is malformed (wrong type, empty SDP).
    #[error("invalid offer: {0}")]
    InvalidOffer(String),

    /// The transport could not establish a session.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Negotiation did not complete in time.
    #[error("negotiation timed out after {0:?}")]
    TimedOut(Duration),
}

/// Errors surfaced by the engine to control-plane callers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RtcError {
    /// Offer could not be turned into a connection.
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    /// Connection already has a non-terminal session.
    #[error("connection {connection_id} already has an active session")]
    SessionConflict {
        /// Busy connection.
        connection_id: ConnectionId,
    },

    /// Channel is not open, or closed while a send was in flight.
    #[error("channel for connection {connection_id} is closed")]
    ChannelClosed {
        /// Connection whose channel closed.
        connection_id: ConnectionId,
    },

    /// The transcription backend failed to start the job.
    #[error("transcription failed: {0}")]
    Transcription(String),

    /// No connection with this id is registered.
    #[error("connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    /// Connection is registered but its channel has not opened.
    #[error("channel for connection {0} is not ready")]
    ChannelNotReady(ConnectionId),

    /// A bounded operation exceeded its deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Operation name (`send`, ...).
        operation: &'static str,
        /// Deadline that elapsed.
        after: Duration,
    },
}

impl NegotiationError {
    /// Metric label for the failure reason.
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidOffer(_) => "invalid_offer",
            Self::Transport(_) => "transport",
            Self::TimedOut(_) => "timeout",
        }
    }
}

impl RtcError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Negotiation(_) => NEGOTIATION_ERROR,
            Self::SessionConflict { .. } => SESSION_CONFLICT,
            Self::ChannelClosed { .. } => CHANNEL_CLOSED,
            Self::Transcription(_) => TRANSCRIPTION_ERROR,
            Self::ConnectionNotFound(_) => CONNECTION_NOT_FOUND,
            Self::ChannelNotReady(_) => CHANNEL_NOT_READY,
            Self::Timeout { .. } => TIMEOUT,
        }
    }

    /// Coarse category for logs and metric labels.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Negotiation(e) => e.category(),
            Self::Timeout { .. } => "timeout",
            Self::SessionConflict { .. } => "conflict",
            Self::ChannelClosed { .. } => "channel_closed",
            Self::Transcription(_) => "transcription",
            Self::ConnectionNotFound(_) | Self::ChannelNotReady(_) => "state",
        }
    }
}
