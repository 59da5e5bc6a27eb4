//! Connection state and snapshots.

use chrono::{DateTime, Utc};
use rtscribe_core::{ConnectionId, SessionId};
use serde::Serialize;

/// Negotiation state of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Created, offer not yet applied.
    New,
    /// Answer returned, waiting for the channel to open.
    Connecting,
    /// Channel open.
    Connected,
    /// Transport reported a failure.
    Failed,
    /// Channel or peer closed.
    Closed,
}

impl ConnectionState {
    /// Whether the connection can never become usable again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }

    /// Lowercase name as used on the wire and in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered peer connection.
#[derive(Clone, Debug)]
pub struct Connection {
    /// Unique id.
    pub id: ConnectionId,
    /// Current negotiation state.
    pub state: ConnectionState,
    /// When the offer was accepted.
    pub created_at: DateTime<Utc>,
    /// When the channel opened (last time, if reopened).
    pub connected_at: Option<DateTime<Utc>>,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId) -> Self {
        Self {
            id,
            state: ConnectionState::Connecting,
            created_at: Utc::now(),
            connected_at: None,
        }
    }
}

/// Read-only snapshot of a registry entry.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    /// Connection id.
    pub connection_id: ConnectionId,
    /// Negotiation state.
    pub state: ConnectionState,
    /// Channel label, if a channel is attached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Session bound to the connection, if any (may be terminal).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// State of the bound session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_state: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time the channel opened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
}
