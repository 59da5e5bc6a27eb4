//! Peer connection, channel and session timing settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One ICE (STUN/TURN) server entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IceServerSettings {
    /// Server URLs, e.g. `stun:stun.l.google.com:19302`.
    pub urls: Vec<String>,
    /// TURN username.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub username: String,
    /// TURN credential.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub credential: String,
}

/// Peer connection and streaming settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RtcSettings {
    /// ICE servers offered to the peer connection.
    pub ice_servers: Vec<IceServerSettings>,
    /// Upper bound on offer/answer exchange including ICE gathering.
    pub negotiation_timeout_ms: u64,
    /// Upper bound on one send+flush on a channel.
    pub send_timeout_ms: u64,
    /// How long `/infer` waits for a negotiated channel to open.
    pub channel_ready_timeout_ms: u64,
    /// Connections still connecting after this long are torn down.
    pub connect_timeout_ms: u64,
    /// Interval of the stale-connection sweep.
    pub reap_interval_ms: u64,
    /// Capacity of the per-connection transport event queue.
    pub event_buffer: usize,
    /// Send a terminal `status` message after the last segment.
    pub emit_status_events: bool,
}

impl Default for RtcSettings {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServerSettings {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                ..IceServerSettings::default()
            }],
            negotiation_timeout_ms: 30_000,
            send_timeout_ms: 10_000,
            channel_ready_timeout_ms: 10_000,
            connect_timeout_ms: 60_000,
            reap_interval_ms: 5_000,
            event_buffer: 64,
            emit_status_events: false,
        }
    }
}

impl RtcSettings {
    /// Negotiation timeout as a [`Duration`].
    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiation_timeout_ms)
    }

    /// Send timeout as a [`Duration`].
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Channel readiness timeout as a [`Duration`].
    pub fn channel_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.channel_ready_timeout_ms)
    }

    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Reaper interval as a [`Duration`].
    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }
}
