//! Two connection gaters composed by AND (spec §4.6 "Gaters (C9)"):
//!
//! - *Relay gater*: closed-membership check, built directly from libp2p's own
//!   [`libp2p::allow_block_list`] behaviour rather than a hand-rolled
//!   `ConnectionGater` - the crate already ships the exact "only accept
//!   connections from an allow-listed set of peers" primitive this needs.
//! - *Recursion gater*: a plain pre-dial predicate, since go-libp2p's
//!   `InterceptAddrDial` hook has no direct rust-libp2p equivalent; callers
//!   run [`would_recurse`] themselves before handing an address to the swarm.

use hyprspace_core::Membership;
use hyprspace_routing::RouteTable;
use libp2p::{Multiaddr, PeerId};
use std::net::{IpAddr, Ipv4Addr};

/// Builds the allow-list for the relay gater: every configured member, so
/// that dials and inbound connections from anyone else are refused at the
/// swarm level (spec §4.6 "Relay gater").
pub fn allowed_peers(membership: &Membership) -> impl Iterator<Item = PeerId> + '_ {
    std::iter::once(membership.local_id).chain(membership.peers.iter().map(|p| p.id))
}

/// Extracts the IPv4 host address out of a dial multiaddr, if any.
fn ipv4_of(addr: &Multiaddr) -> Option<Ipv4Addr> {
    addr.iter().find_map(|proto| match proto {
        libp2p::multiaddr::Protocol::Ip4(ip) => Some(ip),
        _ => None,
    })
}

/// Recursion gater (spec §4.6): denies dialing `addr` (believed to belong to
/// `dial_peer`) when the address is itself an overlay route owned by
/// `dial_peer` *and* the host would route that same address back through our
/// own TUN interface - i.e. dialing it would tunnel the overlay through
/// itself.
pub fn would_recurse(
    addr: &Multiaddr,
    dial_peer: PeerId,
    membership: &Membership,
    host_routes: &RouteTable,
) -> bool {
    let Some(ip) = ipv4_of(addr) else {
        return false;
    };
    let Some(peer_record) = membership.find(&dial_peer) else {
        return false;
    };
    let owns_it = peer_record
        .owned_networks()
        .any(|net| net.contains(IpAddr::V4(ip)));
    if !owns_it {
        return false;
    }
    host_routes.lookup_ip(IpAddr::V4(ip)).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ip_network::IpNetwork;

    #[test]
    fn denies_dial_when_target_is_routed_back_through_tun() {
        let local_id = PeerId::random();
        let peer_id = PeerId::random();
        let routes = vec![IpNetwork::new(Ipv4Addr::new(100, 64, 1, 0), 24).unwrap()];
        let peer = hyprspace_core::PeerRecord::new(peer_id, None, routes.clone(), vec![]);
        let membership = Membership {
            local_id,
            peers: vec![peer],
        };

        let mut host_routes = RouteTable::new();
        host_routes.insert(routes[0], peer_id);

        let addr: Multiaddr = "/ip4/100.64.1.5/tcp/4001".parse().unwrap();
        assert!(would_recurse(&addr, peer_id, &membership, &host_routes));
    }

    #[test]
    fn allows_dial_when_address_is_not_an_overlay_route() {
        let local_id = PeerId::random();
        let peer_id = PeerId::random();
        let peer = hyprspace_core::PeerRecord::new(peer_id, None, vec![], vec![]);
        let membership = Membership {
            local_id,
            peers: vec![peer],
        };
        let host_routes = RouteTable::new();

        let addr: Multiaddr = "/ip4/203.0.113.1/tcp/4001".parse().unwrap();
        assert!(!would_recurse(&addr, peer_id, &membership, &host_routes));
    }
}
