//! Service lookup: mapping a service address's `(NetID, ServiceID)` pair to
//! either a locally registered handler or a remote peer to proxy to (spec
//! §4.8 "Registration", grounded on `original_source/svc/network.go`'s
//! `Register`/`listeners` map).

use hyprspace_core::addr::{net_id, net_id_of_service_addr, service_id_of_service_addr};
use hyprspace_core::{Membership, ServiceConfig};
use ip_network::Ipv6Network;
use libp2p::{Multiaddr, PeerId};
use std::collections::HashMap;
use std::net::Ipv6Addr;

/// Where a service connection should be bridged to once accepted.
#[derive(Debug, Clone)]
pub enum ServiceTarget {
    /// This node owns the service; dial `target` on the host and splice.
    Local(Multiaddr),
    /// Another configured member owns it; proxy over the service protocol.
    Remote(PeerId, [u8; 2]),
}

/// Resolves service addresses to a [`ServiceTarget`], built once at startup
/// from the node's own registered services plus the closed membership set.
#[derive(Clone)]
pub struct ServiceRegistry {
    local_net_id: [u8; 4],
    local: HashMap<[u8; 2], Multiaddr>,
    peers_by_net_id: HashMap<[u8; 4], PeerId>,
}

impl ServiceRegistry {
    pub fn new(membership: &Membership, services: &[ServiceConfig]) -> Self {
        let local_net_id = net_id(&membership.local_id);
        let local = services
            .iter()
            .map(|s| (hyprspace_core::addr::service_id(&s.name), s.target.clone()))
            .collect();
        let peers_by_net_id = membership
            .peers
            .iter()
            .map(|p| (net_id(&p.id), p.id))
            .collect();
        Self {
            local_net_id,
            local,
            peers_by_net_id,
        }
    }

    /// Looks up a locally registered service by its wire-carried `svc_id`
    /// (spec §4.8 "Inbound service stream handler").
    pub fn local_target(&self, svc_id: [u8; 2]) -> Option<Multiaddr> {
        self.local.get(&svc_id).cloned()
    }

    /// Resolves a service address observed as a TUN destination into a
    /// target, or `None` if it names neither a local service nor a known
    /// peer (spec §4.8: "Unknown service" is logged and the connection is
    /// not accepted).
    pub fn resolve(&self, addr: &Ipv6Addr) -> Option<ServiceTarget> {
        let net_id = net_id_of_service_addr(addr);
        let svc_id = service_id_of_service_addr(addr);
        if net_id == self.local_net_id {
            return self.local.get(&svc_id).cloned().map(ServiceTarget::Local);
        }
        let peer = *self.peers_by_net_id.get(&net_id)?;
        Some(ServiceTarget::Remote(peer, svc_id))
    }
}

/// The `/112` service-subnet route a given peer's services live under (spec
/// §4.8: "one /112 per known peer, built from the service prefix ⊕ NetID"),
/// installed on the host alongside the peer's builtin addresses.
pub fn service_subnet_for_peer(peer: &PeerId) -> Ipv6Network {
    let addr = hyprspace_core::addr::service_addr(peer, "");
    let mut octets = addr.octets();
    octets[14] = 0;
    octets[15] = 0;
    Ipv6Network::new(Ipv6Addr::from(octets), 112).expect("/112 is always a valid prefix length")
}

#[cfg(test)]
mod tests {
    use super::*;
    use libp2p::identity::Keypair;

    fn rand_peer() -> PeerId {
        Keypair::generate_ed25519().public().to_peer_id()
    }

    #[test]
    fn resolve_finds_local_service_by_net_id_and_svc_id() {
        let local_id = rand_peer();
        let membership = Membership {
            local_id,
            peers: vec![],
        };
        let services = vec![ServiceConfig {
            name: "ssh".to_string(),
            target: "/ip4/127.0.0.1/tcp/22".parse().unwrap(),
        }];
        let registry = ServiceRegistry::new(&membership, &services);
        let addr = hyprspace_core::addr::service_addr(&local_id, "ssh");
        assert!(matches!(registry.resolve(&addr), Some(ServiceTarget::Local(_))));
    }

    #[test]
    fn resolve_finds_remote_peer_by_net_id() {
        let local_id = rand_peer();
        let remote = rand_peer();
        let membership = Membership {
            local_id,
            peers: vec![hyprspace_core::PeerRecord::new(remote, None, vec![], vec![])],
        };
        let registry = ServiceRegistry::new(&membership, &[]);
        let addr = hyprspace_core::addr::service_addr(&remote, "http");
        match registry.resolve(&addr) {
            Some(ServiceTarget::Remote(peer, _)) => assert_eq!(peer, remote),
            other => panic!("expected a remote target, got {other:?}"),
        }
    }

    #[test]
    fn resolve_is_none_for_unknown_net_id() {
        let local_id = rand_peer();
        let membership = Membership {
            local_id,
            peers: vec![],
        };
        let registry = ServiceRegistry::new(&membership, &[]);
        let addr = hyprspace_core::addr::service_addr(&rand_peer(), "http");
        assert!(registry.resolve(&addr).is_none());
    }

    #[test]
    fn service_subnet_for_peer_is_a_valid_112() {
        let peer = rand_peer();
        let net = service_subnet_for_peer(&peer);
        assert_eq!(net.netmask(), 112);
        assert!(net.contains(hyprspace_core::addr::service_addr(&peer, "anything")));
    }
}
