//! # Signaling negotiator
//!
//! Turns a remote offer into a local answer. On success a new connection is
//! registered in the `connecting` state and a watcher task forwards the
//! transport's lifecycle events into the [`ChannelManager`]. On failure
//! nothing is registered.
//!
//! Every call creates an independent connection, even for an offer that was
//! seen before.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use rtscribe_core::ConnectionId;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, info, info_span, instrument, warn};

use crate::channel::ChannelManager;
use crate::errors::{NegotiationError, RtcError, TransportError};
use crate::metrics::RTC_NEGOTIATION_FAILURES_TOTAL;
use crate::transport::{PeerEvent, PeerHandle, PeerLink, PeerTransport, SessionDescription};

/// Outcome of a successful negotiation.
#[derive(Clone, Debug)]
pub struct NegotiatedConnection {
    /// Newly registered connection.
    pub connection_id: ConnectionId,
    /// Answer for the offerer.
    pub answer: SessionDescription,
}

/// Accepts offers and registers connections.
#[derive(Clone)]
pub struct SignalingNegotiator {
    transport: Arc<dyn PeerTransport>,
    channels: ChannelManager,
    timeout: Duration,
}

impl SignalingNegotiator {
    /// Create a negotiator. `timeout` bounds each negotiation.
    pub fn new(transport: Arc<dyn PeerTransport>, channels: ChannelManager, timeout: Duration) -> Self {
        Self {
            transport,
            channels,
            timeout,
        }
    }

    /// Negotiate `offer` and register a new connection.
    #[instrument(skip_all, fields(offer_type = %offer.kind))]
    pub async fn negotiate(&self, offer: SessionDescription) -> Result<NegotiatedConnection, RtcError> {
        match self.try_negotiate(&offer).await {
            Ok(negotiated) => Ok(negotiated),
            Err(e) => {
                counter!(RTC_NEGOTIATION_FAILURES_TOTAL, "reason" => e.category()).increment(1);
                warn!(error = %e, "negotiation failed");
                Err(e.into())
            }
        }
    }

    async fn try_negotiate(
        &self,
        offer: &SessionDescription,
    ) -> Result<NegotiatedConnection, NegotiationError> {
        validate_offer(offer)?;

        let link = match tokio::time::timeout(self.timeout, self.transport.establish(offer)).await {
            Ok(Ok(link)) => link,
            Ok(Err(TransportError::InvalidDescription(reason))) => {
                return Err(NegotiationError::InvalidOffer(reason));
            }
            Ok(Err(e)) => return Err(NegotiationError::Transport(e)),
            Err(_) => return Err(NegotiationError::TimedOut(self.timeout)),
        };

        let PeerLink {
            answer,
            events,
            handle,
        } = link;
        let connection_id = ConnectionId::new();
        self.channels
            .registry()
            .register(connection_id.clone(), Some(handle));

        let span = info_span!("peer_events", connection_id = %connection_id);
        let _ = tokio::spawn(
            forward_events(self.channels.clone(), connection_id.clone(), events).instrument(span),
        );

        info!(%connection_id, "offer accepted");
        Ok(NegotiatedConnection {
            connection_id,
            answer,
        })
    }
}

fn validate_offer(offer: &SessionDescription) -> Result<(), NegotiationError> {
    if offer.kind != "offer" {
        return Err(NegotiationError::InvalidOffer(format!(
            "expected type 'offer', got '{}'",
            offer.kind
        )));
    }
    if offer.sdp.trim().is_empty() {
        return Err(NegotiationError::InvalidOffer("empty sdp".into()));
    }
    Ok(())
}

async fn forward_events(
    channels: ChannelManager,
    connection_id: ConnectionId,
    mut events: mpsc::Receiver<PeerEvent>,
) {
    while let Some(event) = events.recv().await {
        debug!(?event, "peer event");
        match event {
            PeerEvent::ChannelOpen(transport) => {
                if let Err(e) = channels.on_channel_open(&connection_id, transport).await {
                    warn!(error = %e, "could not attach channel");
                }
            }
            PeerEvent::ChannelClosed => {
                let peer = channels.registry().peer(&connection_id);
                channels.on_channel_close(&connection_id);
                release_peer(peer).await;
            }
            PeerEvent::Failed(reason) => {
                let peer = channels.registry().peer(&connection_id);
                channels.on_peer_failed(&connection_id, &reason);
                release_peer(peer).await;
            }
        }
        if !channels.registry().contains(&connection_id) {
            return;
        }
    }
    // transport dropped its side: nothing will ever open or close again
    if channels.registry().contains(&connection_id) {
        let peer = channels.registry().peer(&connection_id);
        channels.on_channel_close(&connection_id);
        release_peer(peer).await;
    }
}

/// Close the peer connection after the channel side has been torn down, so
/// a bound session observes cancellation before its transport goes away.
async fn release_peer(peer: Option<Arc<dyn PeerHandle>>) {
    if let Some(peer) = peer {
        peer.close().await;
        debug!("peer connection released");
    }
}
