//! Discovery loop (spec §4.4, component C7): tick-driven with adaptive
//! backoff, keeping every configured peer dialed.
//!
//! Bootstrap multiaddrs are dialed once at transport construction time
//! (`Libp2pTransport::new`); this loop only triggers the DHT's own
//! `bootstrap()`/routing-table refresh, and only on the initial tick or when
//! no peer is connected (spec §4.4 additions, grounded on
//! `original_source/p2p/node.go`'s `dht.BootstrapPeers`).
//!
//! "Attempt to connect via the peer transport (which internally consults
//! DHT/PeX/delegated routing)" (spec §4.4) is realized here rather than
//! inside the transport itself, since the combinator (§9 `race_sources`)
//! lives in this crate: before dialing a peer with no known address, the loop
//! races every configured [`PeerAddressSource`] and feeds what it finds into
//! the transport's address book.

use crate::pex::ADDRESS_TTL;
use crate::routing::{race_sources, PeerAddressSource};
use hyprspace_core::Membership;
use hyprspace_transport::{Connectedness, PeerTransport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const INITIAL_PERIOD: Duration = Duration::from_secs(1);
const MAX_PERIOD: Duration = Duration::from_secs(60);
const RESET_PERIOD: Duration = Duration::from_secs(10);
/// Period the loop re-arms to after an external rediscover signal collapses
/// the wait to near-zero (spec §4.4).
const REARM_PERIOD: Duration = Duration::from_secs(3);
const REDISCOVER_COLLAPSE: Duration = Duration::from_millis(1);

pub struct DiscoveryLoop {
    transport: Arc<dyn PeerTransport>,
    membership: Arc<Membership>,
    sources: Vec<Arc<dyn PeerAddressSource>>,
    rediscover_rx: mpsc::Receiver<()>,
    cancel: CancellationToken,
}

impl DiscoveryLoop {
    pub fn new(
        transport: Arc<dyn PeerTransport>,
        membership: Arc<Membership>,
        sources: Vec<Arc<dyn PeerAddressSource>>,
        rediscover_rx: mpsc::Receiver<()>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            membership,
            sources,
            rediscover_rx,
            cancel,
        }
    }

    pub async fn run(mut self) {
        let mut period = INITIAL_PERIOD;
        let mut first_tick = true;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(period) => {
                    period = self.tick(period, first_tick).await;
                    first_tick = false;
                }
                Some(()) = self.rediscover_rx.recv() => {
                    tracing::debug!("discovery: rediscover signal received");
                    let _ = self.tick(period, first_tick).await;
                    first_tick = false;
                    period = REARM_PERIOD;
                }
            }
        }
    }

    /// Runs one tick, returning the period to wait before the next one.
    async fn tick(&mut self, prior_period: Duration, first_tick: bool) -> Duration {
        let mut any_connected = false;
        for peer in &self.membership.peers {
            if self.transport.connectedness(peer.id) == Connectedness::Connected {
                any_connected = true;
                continue;
            }
            if self.transport.known_addrs(peer.id).is_empty() && !self.sources.is_empty() {
                let found = race_sources(peer.id, &self.sources).await;
                if !found.is_empty() {
                    self.transport.add_addrs(peer.id, found, ADDRESS_TTL);
                }
            }
            match self.transport.connect(peer.id).await {
                Ok(()) => any_connected = true,
                Err(e) => {
                    tracing::debug!(peer = %peer.id, error = %e, "discovery: connect attempt failed");
                }
            }
        }

        if any_connected {
            (prior_period * 2).min(MAX_PERIOD)
        } else {
            if first_tick {
                tracing::debug!("discovery: no peers connected, bootstrapping dht");
            }
            self.transport.dht_bootstrap();
            RESET_PERIOD
        }
    }

    /// Exposed for the rediscover signal producer (RPC, SIGUSR1): the period
    /// collapses to near-zero so the very next tick runs almost immediately.
    pub fn collapsed_wait() -> Duration {
        REDISCOVER_COLLAPSE
    }
}
