//! # WebRTC transport
//!
//! [`PeerTransport`] backed by `webrtc-rs`. The offerer creates the data
//! channel; the server answers with a non-trickle description (candidate
//! gathering completes before the answer is returned) and reports channel
//! open/close and peer failure as [`PeerEvent`]s.
//!
//! `RTCDataChannel::send_text` only queues into the SCTP association, so
//! [`WebRtcChannel::flush`] polls `buffered_amount` until the queue has
//! drained.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::errors::TransportError;
use crate::transport::{PeerChannel, PeerEvent, PeerHandle, PeerLink, PeerTransport, SessionDescription};

/// Buffered events per peer before the transport callbacks wait.
const EVENT_BUFFER: usize = 16;

/// WebRTC transport configuration.
#[derive(Clone, Debug)]
pub struct WebRtcConfig {
    /// STUN/TURN servers offered to ICE.
    pub ice_servers: Vec<RTCIceServer>,
    /// Interval between `buffered_amount` polls while flushing.
    pub flush_poll_interval: Duration,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![RTCIceServer {
                urls: vec!["stun:stun.l.google.com:19302".to_owned()],
                ..Default::default()
            }],
            flush_poll_interval: Duration::from_millis(5),
        }
    }
}

/// `webrtc-rs` peer transport.
pub struct WebRtcTransport {
    api: API,
    config: WebRtcConfig,
}

impl WebRtcTransport {
    /// Build the WebRTC API with default codecs and interceptors.
    pub fn new(config: WebRtcConfig) -> Result<Self, TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| TransportError::Negotiation(format!("media engine: {e}")))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| TransportError::Negotiation(format!("interceptors: {e}")))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api, config })
    }

    async fn answer(
        pc: &RTCPeerConnection,
        offer: &SessionDescription,
    ) -> Result<SessionDescription, TransportError> {
        let remote = RTCSessionDescription::offer(offer.sdp.clone())
            .map_err(|e| TransportError::InvalidDescription(e.to_string()))?;
        pc.set_remote_description(remote)
            .await
            .map_err(|e| TransportError::InvalidDescription(e.to_string()))?;

        let answer = pc
            .create_answer(None)
            .await
            .map_err(|e| TransportError::Negotiation(e.to_string()))?;

        let mut gathered = pc.gathering_complete_promise().await;
        pc.set_local_description(answer)
            .await
            .map_err(|e| TransportError::Negotiation(e.to_string()))?;
        let _ = gathered.recv().await;

        let local = pc
            .local_description()
            .await
            .ok_or_else(|| TransportError::Negotiation("no local description".into()))?;
        Ok(SessionDescription {
            sdp: local.sdp,
            kind: local.sdp_type.to_string(),
        })
    }
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn establish(&self, offer: &SessionDescription) -> Result<PeerLink, TransportError> {
        let rtc_config = RTCConfiguration {
            ice_servers: self.config.ice_servers.clone(),
            ..Default::default()
        };
        let pc = Arc::new(
            self.api
                .new_peer_connection(rtc_config)
                .await
                .map_err(|e| TransportError::Negotiation(e.to_string()))?,
        );

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        install_handlers(&pc, &events_tx, self.config.flush_poll_interval);

        match Self::answer(&pc, offer).await {
            Ok(answer) => Ok(PeerLink {
                answer,
                events: events_rx,
                handle: Arc::new(WebRtcPeer { pc }),
            }),
            Err(e) => {
                if let Err(close_err) = pc.close().await {
                    debug!(error = %close_err, "closing half-negotiated peer connection failed");
                }
                Err(e)
            }
        }
    }
}

fn install_handlers(pc: &RTCPeerConnection, events: &mpsc::Sender<PeerEvent>, flush_poll: Duration) {
    let state_events = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let events = state_events.clone();
        Box::pin(async move {
            debug!(%state, "peer connection state");
            let event = match state {
                RTCPeerConnectionState::Failed => PeerEvent::Failed("peer connection failed".into()),
                RTCPeerConnectionState::Closed => PeerEvent::ChannelClosed,
                _ => return,
            };
            let _ = events.send(event).await;
        })
    }));

    let channel_events = events.clone();
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let events = channel_events.clone();
        Box::pin(async move {
            info!(label = dc.label(), "data channel announced");
            let channel: Arc<dyn PeerChannel> = Arc::new(WebRtcChannel::new(Arc::clone(&dc), flush_poll));

            let open_events = events.clone();
            dc.on_open(Box::new(move || {
                Box::pin(async move {
                    let _ = open_events.send(PeerEvent::ChannelOpen(channel)).await;
                })
            }));

            dc.on_close(Box::new(move || {
                let events = events.clone();
                Box::pin(async move {
                    let _ = events.send(PeerEvent::ChannelClosed).await;
                })
            }));
        })
    }));
}

/// Data channel backed by `RTCDataChannel`.
pub struct WebRtcChannel {
    dc: Arc<RTCDataChannel>,
    label: String,
    flush_poll: Duration,
}

impl WebRtcChannel {
    fn new(dc: Arc<RTCDataChannel>, flush_poll: Duration) -> Self {
        let label = dc.label().to_owned();
        Self {
            dc,
            label,
            flush_poll,
        }
    }
}

#[async_trait]
impl PeerChannel for WebRtcChannel {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if self.dc.ready_state() != RTCDataChannelState::Open {
            return Err(TransportError::Closed);
        }
        self.dc
            .send_text(text.to_owned())
            .await
            .map(|_| ())
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn flush(&self) -> Result<(), TransportError> {
        loop {
            if self.dc.ready_state() != RTCDataChannelState::Open {
                return Err(TransportError::Closed);
            }
            if self.dc.buffered_amount().await == 0 {
                return Ok(());
            }
            tokio::time::sleep(self.flush_poll).await;
        }
    }

    async fn close(&self) {
        if let Err(e) = self.dc.close().await {
            debug!(label = %self.label, error = %e, "data channel close failed");
        }
    }
}

struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerHandle for WebRtcPeer {
    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!(error = %e, "peer connection close failed");
        }
    }
}
