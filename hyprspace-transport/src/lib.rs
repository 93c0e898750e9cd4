//! Peer transport (spec §4 C4) and its two gaters (§4.6 C9), backed by
//! `libp2p`: tcp/quic transports, noise security, yamux muxing, Kademlia
//! peer routing, relay client/server, DCUtR hole-punching, identify, ping,
//! and `libp2p-stream` for the raw framed streams the forwarding, PeX, and
//! service protocols run over.

mod behaviour;
pub mod gater;
mod swarm;
pub mod trait_def;

pub use swarm::Libp2pTransport;
pub use trait_def::{
    BoxedStream, Connectedness, ConnectednessEvent, PexEntry, PeerStream, PeerTransport,
    StreamHandler, TransportError,
};
