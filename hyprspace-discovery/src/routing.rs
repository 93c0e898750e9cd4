//! Peer-address-source combinator (spec §9 "Dynamic dispatch over
//! transports", grounded on `original_source/p2p/routing.go`'s
//! `ParallelRouting`): several address sources queried concurrently, with a
//! grace window to collect more once the first responds.

use async_trait::async_trait;
use hyprspace_transport::PeerTransport;
use libp2p::{Multiaddr, PeerId};
use std::sync::Arc;
use std::time::Duration;

/// A grace window after the first source answers, so slower-but-still-useful
/// sources get a chance to contribute (spec §9: "~500 ms").
pub const GRACE_WINDOW: Duration = Duration::from_millis(500);

#[async_trait]
pub trait PeerAddressSource: Send + Sync {
    async fn find_peer(&self, peer: PeerId) -> Vec<Multiaddr>;
}

/// Explicit Kademlia closest-peers lookup (spec §4.4 additions).
pub struct KadSource {
    transport: Arc<dyn PeerTransport>,
}

impl KadSource {
    pub fn new(transport: Arc<dyn PeerTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl PeerAddressSource for KadSource {
    async fn find_peer(&self, peer: PeerId) -> Vec<Multiaddr> {
        self.transport.dht_find_peer(peer).await
    }
}

/// Addresses learned via PeX, already TTL'd in the transport's address book
/// (spec §4.5 additions).
pub struct AddressBookSource {
    transport: Arc<dyn PeerTransport>,
}

impl AddressBookSource {
    pub fn new(transport: Arc<dyn PeerTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl PeerAddressSource for AddressBookSource {
    async fn find_peer(&self, peer: PeerId) -> Vec<Multiaddr> {
        self.transport.known_addrs(peer)
    }
}

/// `HYPRSPACE_IPFS_API` auxiliary source (spec §3/§6 additions, grounded on
/// `original_source/p2p/node.go`'s `getExtraPeers`). Modeled generically, not
/// as a literal IPFS HTTP API client: a GET to `{api}/api/v0/dht/findpeer?arg=<id>`
/// returning a JSON array of multiaddr strings is the minimal shape needed.
pub struct IpfsApiSource {
    api_base: Multiaddr,
    client: reqwest::Client,
}

impl IpfsApiSource {
    pub fn new(api_base: Multiaddr) -> Self {
        Self {
            api_base,
            client: reqwest::Client::new(),
        }
    }

    fn find_peer_url(&self, peer: PeerId) -> Option<String> {
        let host = self.api_base.iter().find_map(|p| match p {
            libp2p::multiaddr::Protocol::Ip4(ip) => Some(ip.to_string()),
            libp2p::multiaddr::Protocol::Dns(d) | libp2p::multiaddr::Protocol::Dns4(d) => {
                Some(d.to_string())
            }
            _ => None,
        })?;
        let port = self
            .api_base
            .iter()
            .find_map(|p| match p {
                libp2p::multiaddr::Protocol::Tcp(port) => Some(port),
                _ => None,
            })
            .unwrap_or(5001);
        Some(format!(
            "http://{host}:{port}/api/v0/dht/findpeer?arg={peer}"
        ))
    }
}

#[derive(serde::Deserialize)]
struct FindPeerResponse {
    #[serde(default)]
    #[serde(rename = "Responses")]
    responses: Vec<FindPeerAddrs>,
}

#[derive(serde::Deserialize)]
struct FindPeerAddrs {
    #[serde(rename = "Addrs", default)]
    addrs: Vec<String>,
}

#[async_trait]
impl PeerAddressSource for IpfsApiSource {
    async fn find_peer(&self, peer: PeerId) -> Vec<Multiaddr> {
        let Some(url) = self.find_peer_url(peer) else {
            return Vec::new();
        };
        let response = match self.client.post(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, "ipfs api find_peer request failed");
                return Vec::new();
            }
        };
        let parsed: FindPeerResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(error = %e, "ipfs api find_peer response was not the expected shape");
                return Vec::new();
            }
        };
        parsed
            .responses
            .into_iter()
            .flat_map(|r| r.addrs)
            .filter_map(|a| a.parse().ok())
            .collect()
    }
}

/// Races every source's `find_peer(peer)` concurrently, returning as soon as
/// the first non-empty result lands but waiting up to [`GRACE_WINDOW`] longer
/// to accumulate addresses from slower sources (spec §9).
pub async fn race_sources(
    peer: PeerId,
    sources: &[Arc<dyn PeerAddressSource>],
) -> Vec<Multiaddr> {
    use futures::stream::FuturesUnordered;
    use futures::StreamExt;

    let mut futs: FuturesUnordered<_> = sources.iter().map(|s| s.find_peer(peer)).collect();
    let mut collected = Vec::new();

    let Some(first) = futs.next().await else {
        return collected;
    };
    collected.extend(first);

    let grace = tokio::time::sleep(GRACE_WINDOW);
    tokio::pin!(grace);
    loop {
        tokio::select! {
            _ = &mut grace => break,
            next = futs.next() => match next {
                Some(addrs) => collected.extend(addrs),
                None => break,
            }
        }
    }

    collected.sort_by_key(|a| a.to_string());
    collected.dedup();
    collected
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource(Vec<Multiaddr>);

    #[async_trait]
    impl PeerAddressSource for FixedSource {
        async fn find_peer(&self, _peer: PeerId) -> Vec<Multiaddr> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn race_merges_results_from_every_source() {
        let a: Multiaddr = "/ip4/10.0.0.1/tcp/4001".parse().unwrap();
        let b: Multiaddr = "/ip4/10.0.0.2/tcp/4001".parse().unwrap();
        let sources: Vec<Arc<dyn PeerAddressSource>> = vec![
            Arc::new(FixedSource(vec![a.clone()])),
            Arc::new(FixedSource(vec![b.clone()])),
        ];
        let mut found = race_sources(PeerId::random(), &sources).await;
        found.sort_by_key(|a| a.to_string());
        let mut expected = vec![a, b];
        expected.sort_by_key(|a| a.to_string());
        assert_eq!(found, expected);
    }

    #[tokio::test]
    async fn race_returns_empty_when_no_source_knows_the_peer() {
        let sources: Vec<Arc<dyn PeerAddressSource>> = vec![Arc::new(FixedSource(vec![]))];
        let found = race_sources(PeerId::random(), &sources).await;
        assert!(found.is_empty());
    }
}
