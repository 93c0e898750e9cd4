//! The `PeerTransport` contract (spec §4 C4, §9 "Dynamic dispatch over
//! transports"): everything above this crate talks to peers only through
//! this trait, never to libp2p directly.

use async_trait::async_trait;
use bytes::Bytes;
use libp2p::{Multiaddr, PeerId, StreamProtocol};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectedness {
    NotConnected,
    Connected,
}

/// A connectedness transition, the signal C7/C8 react to (spec §4.4, §4.5).
#[derive(Debug, Clone)]
pub struct ConnectednessEvent {
    pub peer: PeerId,
    pub connectedness: Connectedness,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no address known for peer {0}")]
    NoAddressKnown(PeerId),
    #[error("dial denied by gater")]
    DialDenied,
    #[error("dial failed: {0}")]
    DialFailed(String),
    #[error("stream open failed: {0}")]
    StreamOpenFailed(String),
    #[error("peer {0} is not a member of the closed overlay")]
    NotAMember(PeerId),
    #[error("transport io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A bidirectional byte stream to a single peer under a single protocol,
/// framed by the caller (spec §3 "Forwarding stream").
pub trait PeerStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> PeerStream for T {}

pub type BoxedStream = Box<dyn PeerStream>;

/// Invoked for each inbound stream opened under a registered protocol.
pub type StreamHandler =
    std::sync::Arc<dyn Fn(PeerId, BoxedStream) + Send + Sync + 'static>;

#[async_trait]
pub trait PeerTransport: Send + Sync {
    fn local_peer_id(&self) -> PeerId;

    fn listen_addrs(&self) -> Vec<Multiaddr>;

    /// Opens an outbound stream to `peer` under `protocol`, dialing first if
    /// not already connected (spec §4.3 `get_or_open`).
    async fn open_stream(
        &self,
        peer: PeerId,
        protocol: StreamProtocol,
    ) -> Result<BoxedStream, TransportError>;

    /// Registers a handler invoked once per inbound stream opened under
    /// `protocol` by any connected peer (spec §6 wire protocols).
    fn set_stream_handler(&self, protocol: StreamProtocol, handler: StreamHandler);

    /// Explicitly attempts to connect to `peer`, consulting the address book
    /// and, if empty, discovery sources (spec §4.4 step "attempt to connect").
    async fn connect(&self, peer: PeerId) -> Result<(), TransportError>;

    /// Adds learned addresses to the address book with a TTL after which
    /// they are no longer offered to dialers (spec §4.5: PeX hints expire
    /// after 30s; a hint source is not ground truth).
    fn add_addrs(&self, peer: PeerId, addrs: Vec<Multiaddr>, ttl: Duration);

    /// Address-book entries for `peer` that have not yet expired. One input
    /// to the peer-address-source combinator (spec §9).
    fn known_addrs(&self, peer: PeerId) -> Vec<Multiaddr>;

    fn connectedness(&self, peer: PeerId) -> Connectedness;

    /// Number of live connections currently open to `peer`.
    fn conns_to_peer(&self, peer: PeerId) -> usize;

    /// Subscribes to connectedness transitions (spec §4.4/§4.5 triggers).
    fn subscribe_connectedness(&self) -> tokio::sync::broadcast::Receiver<ConnectednessEvent>;

    /// EWMA round-trip latency to `peer` in milliseconds, sampled from ping
    /// events (spec §4.7 "Route Metrics"). `None` until a sample has arrived.
    fn latency_ms(&self, peer: PeerId) -> Option<f64>;

    /// Explicit Kademlia closest-peers lookup for `peer` (spec §9 "Dynamic
    /// dispatch over transports"): one input to the peer-address-source
    /// combinator in `hyprspace-discovery`, not used by `connect` itself.
    async fn dht_find_peer(&self, peer: PeerId) -> Vec<Multiaddr>;

    /// Re-bootstraps the DHT routing table from the configured bootstrap
    /// peers (spec §4.4: "schedule a DHT bootstrap and routing-table
    /// refresh" when no peers are connected).
    fn dht_bootstrap(&self);
}

/// One `(peer-id, multiaddr)` pair as carried on the wire by PeX (spec §6).
#[derive(Debug, Clone)]
pub struct PexEntry {
    pub peer: PeerId,
    pub addr: Multiaddr,
}

impl PexEntry {
    pub fn encode_line(&self) -> Bytes {
        Bytes::from(format!("{}|{}\n", self.peer, self.addr))
    }

    pub fn parse_line(line: &str) -> Option<Self> {
        let (peer, addr) = line.trim_end().split_once('|')?;
        Some(Self {
            peer: peer.parse().ok()?,
            addr: addr.parse().ok()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pex_entry_round_trips_through_the_wire_line_format() {
        let peer = PeerId::random();
        let addr: Multiaddr = "/ip4/127.0.0.1/tcp/4001".parse().unwrap();
        let entry = PexEntry { peer, addr: addr.clone() };
        let line = entry.encode_line();
        let parsed = PexEntry::parse_line(std::str::from_utf8(&line).unwrap()).unwrap();
        assert_eq!(parsed.peer, peer);
        assert_eq!(parsed.addr, addr);
    }
}
