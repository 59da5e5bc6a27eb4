//! # rtscribe-rtc
//!
//! Real-time signaling and streaming-session engine.
//!
//! ```text
//! offer ──▶ SignalingNegotiator ──register──▶ ConnectionRegistry
//!                │ transport events                ▲
//!                ▼                                 │ claim / finish / reclaim
//!          ChannelManager ◀──── send ──── TranscriptionSession ◀── SegmentStream
//! ```
//!
//! - [`SignalingNegotiator`] turns an offer into an answer and registers a
//!   connection in the `connecting` state.
//! - [`ChannelManager`] owns each connection's data channel: open/close
//!   detection, readiness gating, serialized send+flush.
//! - [`TranscriptionSession`] pulls segments from a
//!   [`Transcriber`](rtscribe_transcription::Transcriber), numbers them and
//!   pushes them through the channel manager.
//! - [`ConnectionRegistry`] is the single source of truth for which
//!   connection is busy.
//!
//! Transports plug in through [`PeerTransport`]: [`WebRtcTransport`] for
//! real peers and [`LoopbackTransport`] for in-process tests.

#![deny(unsafe_code)]

pub mod channel;
pub mod connection;
pub mod errors;
pub mod loopback;
pub mod metrics;
pub mod negotiator;
pub mod registry;
pub mod session;
pub mod transport;
pub mod webrtc_transport;

pub use channel::{Channel, ChannelManager, ChannelState};
pub use connection::{ConnectionInfo, ConnectionState};
pub use errors::{NegotiationError, RtcError, TransportError};
pub use loopback::{LoopbackChannel, LoopbackMode, LoopbackPeer, LoopbackTransport};
pub use negotiator::{NegotiatedConnection, SignalingNegotiator};
pub use registry::ConnectionRegistry;
pub use session::{
    SessionContext, SessionHandle, SessionState, StartRequest, TranscriptionSession,
};
pub use transport::{PeerChannel, PeerEvent, PeerHandle, PeerLink, PeerTransport, SessionDescription};
pub use webrtc_transport::{WebRtcConfig, WebRtcTransport};
