//! Core data model shared by every crate (spec §3): configured peers and the
//! CIDRs they own. Immutable once loaded - the peer set is closed for the
//! lifetime of the daemon (spec §1 Non-goals: "no dynamic membership").

use ip_network::IpNetwork;
use libp2p::{Multiaddr, PeerId};
use serde::{Deserialize, Serialize};

use crate::addr::{builtin_v4, builtin_v6};

/// A single configured overlay member.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub id: PeerId,
    pub name: Option<String>,
    pub builtin_v4: std::net::Ipv4Addr,
    pub builtin_v6: std::net::Ipv6Addr,
    /// Explicitly configured CIDRs this peer owns, in addition to its two
    /// builtin /32 and /128 addresses.
    pub routes: Vec<IpNetwork>,
    /// Static multiaddrs to try before falling back to discovery (spec §6
    /// `listenAddresses` is this node's own; a peer's own addresses, if
    /// configured, seed the address book the same way).
    pub static_addrs: Vec<Multiaddr>,
}

impl PeerRecord {
    pub fn new(id: PeerId, name: Option<String>, routes: Vec<IpNetwork>, static_addrs: Vec<Multiaddr>) -> Self {
        Self {
            builtin_v4: builtin_v4(&id),
            builtin_v6: builtin_v6(&id),
            id,
            name,
            routes,
            static_addrs,
        }
    }

    /// All CIDRs this peer owns: its two builtin addresses plus whatever was
    /// configured explicitly (spec §3 "Peer Record").
    pub fn owned_networks(&self) -> impl Iterator<Item = IpNetwork> + '_ {
        std::iter::once(IpNetwork::new(self.builtin_v4, 32).expect("/32 is always valid"))
            .chain(std::iter::once(
                IpNetwork::new(self.builtin_v6, 128).expect("/128 is always valid"),
            ))
            .chain(self.routes.iter().copied())
    }
}

/// The full closed membership set for this node, plus this node's own identity.
#[derive(Debug, Clone)]
pub struct Membership {
    pub local_id: PeerId,
    pub peers: Vec<PeerRecord>,
}

impl Membership {
    pub fn find(&self, id: &PeerId) -> Option<&PeerRecord> {
        self.peers.iter().find(|p| &p.id == id)
    }

    pub fn is_member(&self, id: &PeerId) -> bool {
        self.find(id).is_some()
    }

    pub fn other_members(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.iter()
    }
}

/// One `services` entry: a locally registered name mapped to a TCP target
/// elsewhere (spec §3 "Service Listener", §6 config `services`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub target: Multiaddr,
}
