//! # Connection registry
//!
//! Process-wide table of live connections keyed by [`ConnectionId`]. Every
//! check-and-set (claiming a session, reclaiming a slot) runs under the
//! entry's shard lock, so two concurrent claims on one connection can never
//! both succeed.
//!
//! A slot is reclaimed only once its channel is closed **and** any bound
//! session has reached a terminal state.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use metrics::{counter, gauge};
use rtscribe_core::ConnectionId;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::channel::Channel;
use crate::connection::{Connection, ConnectionInfo, ConnectionState};
use crate::errors::RtcError;
use crate::metrics::{RTC_CONNECTIONS_ACTIVE, RTC_CONNECTIONS_TOTAL};
use crate::session::SessionHandle;
use crate::transport::PeerHandle;

struct Entry {
    connection: Connection,
    channel: Option<Arc<Channel>>,
    session: Option<SessionHandle>,
    peer: Option<Arc<dyn PeerHandle>>,
    state_tx: watch::Sender<ConnectionState>,
}

impl Entry {
    fn set_state(&mut self, state: ConnectionState) {
        if state == ConnectionState::Connected {
            self.connection.connected_at = Some(Utc::now());
        }
        self.connection.state = state;
        let _ = self.state_tx.send_replace(state);
    }

    fn has_active_session(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.is_terminal())
    }

    fn is_reclaimable(&self) -> bool {
        self.connection.state.is_terminal()
            && self.channel.as_ref().is_none_or(|c| c.is_closed())
            && !self.has_active_session()
    }

    fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            connection_id: self.connection.id.clone(),
            state: self.connection.state,
            channel: self.channel.as_ref().map(|c| c.label().to_string()),
            session_id: self.session.as_ref().map(|s| s.id().clone()),
            session_state: self.session.as_ref().map(|s| s.state().as_str().to_string()),
            created_at: self.connection.created_at,
            connected_at: self.connection.connected_at,
        }
    }
}

/// Registry of live connections.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: DashMap<ConnectionId, Entry>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly negotiated connection in the `connecting` state.
    pub fn register(&self, connection_id: ConnectionId, peer: Option<Arc<dyn PeerHandle>>) {
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        let entry = Entry {
            connection: Connection::new(connection_id.clone()),
            channel: None,
            session: None,
            peer,
            state_tx,
        };
        if self.entries.insert(connection_id.clone(), entry).is_none() {
            counter!(RTC_CONNECTIONS_TOTAL).increment(1);
            gauge!(RTC_CONNECTIONS_ACTIVE).increment(1.0);
        }
        debug!(%connection_id, "connection registered");
    }

    /// Remove a connection unconditionally. Returns whether it existed.
    pub fn unregister(&self, connection_id: &ConnectionId) -> bool {
        let removed = self.entries.remove(connection_id).is_some();
        if removed {
            gauge!(RTC_CONNECTIONS_ACTIVE).decrement(1.0);
            debug!(%connection_id, "connection unregistered");
        }
        removed
    }

    /// Snapshot of one connection.
    pub fn get(&self, connection_id: &ConnectionId) -> Option<ConnectionInfo> {
        self.entries.get(connection_id).map(|e| e.info())
    }

    /// Whether a connection is registered.
    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.entries.contains_key(connection_id)
    }

    /// Snapshots of every registered connection, oldest first.
    pub fn list_active(&self) -> Vec<ConnectionInfo> {
        let mut all: Vec<_> = self.entries.iter().map(|e| e.info()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    /// Ids of every registered connection.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of connections with a non-terminal session.
    pub fn active_session_count(&self) -> usize {
        self.entries.iter().filter(|e| e.has_active_session()).count()
    }

    /// Update a connection's negotiation state and wake waiters.
    pub fn set_state(
        &self,
        connection_id: &ConnectionId,
        state: ConnectionState,
    ) -> Result<(), RtcError> {
        let mut entry = self
            .entries
            .get_mut(connection_id)
            .ok_or_else(|| RtcError::ConnectionNotFound(connection_id.clone()))?;
        entry.set_state(state);
        Ok(())
    }

    /// Record an open channel and flip the connection to `connected`.
    ///
    /// A connection that already closed or failed does not accept a channel.
    pub fn attach_channel(
        &self,
        connection_id: &ConnectionId,
        channel: Arc<Channel>,
    ) -> Result<(), RtcError> {
        let mut entry = self
            .entries
            .get_mut(connection_id)
            .ok_or_else(|| RtcError::ConnectionNotFound(connection_id.clone()))?;
        if entry.connection.state.is_terminal() {
            return Err(RtcError::ChannelClosed {
                connection_id: connection_id.clone(),
            });
        }
        entry.channel = Some(channel);
        entry.set_state(ConnectionState::Connected);
        Ok(())
    }

    /// Channel attached to a connection, if any.
    pub fn channel(&self, connection_id: &ConnectionId) -> Option<Arc<Channel>> {
        self.entries
            .get(connection_id)
            .and_then(|e| e.channel.clone())
    }

    /// Peer teardown handle for a connection, if any.
    pub fn peer(&self, connection_id: &ConnectionId) -> Option<Arc<dyn PeerHandle>> {
        self.entries.get(connection_id).and_then(|e| e.peer.clone())
    }

    /// Session bound to a connection (possibly terminal).
    pub fn session(&self, connection_id: &ConnectionId) -> Option<SessionHandle> {
        self.entries
            .get(connection_id)
            .and_then(|e| e.session.clone())
    }

    /// Subscribe to state changes of a connection.
    pub fn subscribe(
        &self,
        connection_id: &ConnectionId,
    ) -> Option<watch::Receiver<ConnectionState>> {
        self.entries.get(connection_id).map(|e| e.state_tx.subscribe())
    }

    /// Atomically bind `session` to a connection.
    ///
    /// Fails with `ConnectionNotFound`, `ChannelNotReady` (not connected or
    /// channel not open) or `SessionConflict` (a non-terminal session is
    /// already bound). On failure nothing is changed.
    pub fn claim_session(
        &self,
        connection_id: &ConnectionId,
        session: SessionHandle,
    ) -> Result<Arc<Channel>, RtcError> {
        let mut entry = self
            .entries
            .get_mut(connection_id)
            .ok_or_else(|| RtcError::ConnectionNotFound(connection_id.clone()))?;

        if entry.has_active_session() {
            return Err(RtcError::SessionConflict {
                connection_id: connection_id.clone(),
            });
        }
        let channel = match (&entry.channel, entry.connection.state) {
            (Some(channel), ConnectionState::Connected) if channel.is_open() => Arc::clone(channel),
            _ => return Err(RtcError::ChannelNotReady(connection_id.clone())),
        };
        entry.session = Some(session);
        Ok(channel)
    }

    /// Called when a bound session reaches a terminal state; releases the
    /// slot if the channel is already gone. Returns whether the slot was
    /// reclaimed.
    pub fn finish_session(&self, connection_id: &ConnectionId) -> bool {
        self.reclaim(connection_id)
    }

    /// Remove the entry if its channel is closed and its session terminal.
    pub fn reclaim(&self, connection_id: &ConnectionId) -> bool {
        let removed = self
            .entries
            .remove_if(connection_id, |_, entry| entry.is_reclaimable())
            .is_some();
        if removed {
            gauge!(RTC_CONNECTIONS_ACTIVE).decrement(1.0);
            info!(%connection_id, "connection slot reclaimed");
        }
        removed
    }

    /// Connection whose channel opened most recently.
    pub fn latest_connected(&self) -> Option<ConnectionId> {
        self.entries
            .iter()
            .filter(|e| e.connection.state == ConnectionState::Connected)
            .max_by_key(|e| e.connection.connected_at)
            .map(|e| e.key().clone())
    }

    /// Most recently created connection still `connecting`.
    pub fn latest_connecting(&self) -> Option<ConnectionId> {
        self.entries
            .iter()
            .filter(|e| e.connection.state == ConnectionState::Connecting)
            .max_by_key(|e| e.connection.created_at)
            .map(|e| e.key().clone())
    }

    /// Connections stuck in `connecting` for longer than `max_age`.
    pub fn stale_connecting(&self, max_age: Duration) -> Vec<ConnectionId> {
        let now = Utc::now();
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        self.entries
            .iter()
            .filter(|e| {
                e.connection.state == ConnectionState::Connecting
                    && now.signed_duration_since(e.connection.created_at) > max_age
            })
            .map(|e| e.key().clone())
            .collect()
    }
}
