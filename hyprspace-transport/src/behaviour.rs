//! The combined libp2p behaviour: every protocol the peer transport needs is
//! one of the crate's own behaviours, composed - not reimplemented (spec
//! §4 C4: "we do not reimplement Kademlia, STUN/ICE, or NAT traversal").

use libp2p::swarm::NetworkBehaviour;
use libp2p::{allow_block_list, dcutr, identify, kad, ping, relay};

#[derive(NetworkBehaviour)]
pub struct HyprspaceBehaviour {
    /// Closed-membership relay gater (spec §4.6 "Relay gater").
    pub allow: allow_block_list::Behaviour<allow_block_list::AllowedPeers>,
    pub identify: identify::Behaviour,
    pub ping: ping::Behaviour,
    pub kad: kad::Behaviour<kad::store::MemoryStore>,
    pub relay_client: relay::client::Behaviour,
    pub relay_server: relay::Behaviour,
    pub dcutr: dcutr::Behaviour,
    /// Raw protocol-scoped bidirectional streams: the forwarding, PeX, and
    /// service wire protocols are all opened through this (spec §6).
    pub stream: libp2p_stream::Behaviour,
}
