//! Periodic sweep of connections that never opened a channel.

use std::time::Duration;

use metrics::counter;
use rtscribe_rtc::ChannelManager;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::metrics::RTC_CONNECTIONS_REAPED_TOTAL;

/// Close every connection still `connecting` after `max_age`. Returns the
/// number closed.
pub async fn reap_once(channels: &ChannelManager, max_age: Duration) -> usize {
    let stale = channels.registry().stale_connecting(max_age);
    let mut reaped = 0;
    for id in stale {
        if channels.close(&id).await.is_ok() {
            debug!(connection_id = %id, "stale connection closed");
            reaped += 1;
        }
    }
    if reaped > 0 {
        counter!(RTC_CONNECTIONS_REAPED_TOTAL).increment(reaped as u64);
        info!(reaped, "stale connection sweep");
    }
    reaped
}

/// Spawn the sweep loop. Stops when `token` is cancelled.
pub fn start_reaper(
    channels: ChannelManager,
    max_age: Duration,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    let _ = reap_once(&channels, max_age).await;
                }
            }
        }
        debug!("reaper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use rtscribe_core::ConnectionId;
    use rtscribe_rtc::{ConnectionRegistry, LoopbackChannel};

    fn manager() -> (Arc<ConnectionRegistry>, ChannelManager) {
        let registry = Arc::new(ConnectionRegistry::new());
        let channels = ChannelManager::new(registry.clone(), Duration::from_secs(1));
        (registry, channels)
    }

    #[tokio::test]
    async fn only_stale_connecting_is_reaped() {
        let (registry, channels) = manager();
        let stale = ConnectionId::new();
        let open = ConnectionId::new();
        registry.register(stale.clone(), None);
        registry.register(open.clone(), None);
        let (transport, _outbox) = LoopbackChannel::pair("dc");
        let _ = channels.on_channel_open(&open, transport).await.unwrap();

        assert_eq!(reap_once(&channels, Duration::from_secs(60)).await, 0);

        // connection ages are wall-clock
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(reap_once(&channels, Duration::from_millis(5)).await, 1);
        assert!(!registry.contains(&stale));
        assert!(registry.contains(&open));
    }

    #[tokio::test(start_paused = true)]
    async fn loop_stops_on_cancel() {
        let (_registry, channels) = manager();
        let token = CancellationToken::new();
        let handle = start_reaper(
            channels,
            Duration::from_secs(60),
            Duration::from_secs(1),
            token.clone(),
        );
        tokio::time::advance(Duration::from_secs(3)).await;
        token.cancel();
        handle.await.unwrap();
    }
}
