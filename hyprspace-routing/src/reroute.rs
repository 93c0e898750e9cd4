//! Reroute override table (spec §3 "Reroute Record"): a small map consulted
//! before the normal route table, letting an operator redirect a CIDR to a
//! different peer at runtime without a config reload.
//!
//! The source only overrides IPv4 traffic; the table shape generalizes
//! trivially to IPv6 and the implementer is free to extend it (spec §9 Open
//! Question 2), so both families are supported here.

use ip_network::IpNetwork;
use libp2p::PeerId;
use parking_lot::RwLock;
use std::net::IpAddr;

/// `{net, to_peer}` overrides, checked ahead of the main [`RouteTable`]
/// (spec §4.3 step 5).
///
/// [`RouteTable`]: crate::table::RouteTable
#[derive(Default)]
pub struct RerouteTable {
    overrides: RwLock<Vec<(IpNetwork, PeerId)>>,
}

impl RerouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the override for `net`.
    pub fn set(&self, net: IpNetwork, to_peer: PeerId) {
        let mut overrides = self.overrides.write();
        if let Some(entry) = overrides.iter_mut().find(|(n, _)| *n == net) {
            entry.1 = to_peer;
        } else {
            overrides.push((net, to_peer));
        }
    }

    pub fn clear(&self, net: IpNetwork) -> bool {
        let mut overrides = self.overrides.write();
        let before = overrides.len();
        overrides.retain(|(n, _)| *n != net);
        overrides.len() != before
    }

    /// Longest-prefix match against the override table only, for either
    /// address family.
    pub fn lookup(&self, ip: IpAddr) -> Option<PeerId> {
        self.overrides
            .read()
            .iter()
            .filter(|(net, _)| net.contains(ip))
            .max_by_key(|(net, _)| net.netmask())
            .map(|(_, peer)| *peer)
    }

    pub fn entries(&self) -> Vec<(IpNetwork, PeerId)> {
        self.overrides.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn override_wins_over_narrower_entries_of_the_same_family() {
        let rr = RerouteTable::new();
        let wide = PeerId::random();
        let narrow = PeerId::random();
        rr.set(IpNetwork::new(Ipv4Addr::new(10, 0, 0, 0), 8).unwrap(), wide);
        rr.set(IpNetwork::new(Ipv4Addr::new(10, 0, 1, 0), 24).unwrap(), narrow);

        assert_eq!(
            rr.lookup(IpAddr::V4(Ipv4Addr::new(10, 0, 1, 5))),
            Some(narrow)
        );
    }

    #[test]
    fn ipv6_overrides_are_supported() {
        let rr = RerouteTable::new();
        let p = PeerId::random();
        rr.set(IpNetwork::new(Ipv6Addr::LOCALHOST, 128).unwrap(), p);
        assert_eq!(rr.lookup(IpAddr::V6(Ipv6Addr::LOCALHOST)), Some(p));
    }

    #[test]
    fn clear_removes_an_override() {
        let rr = RerouteTable::new();
        let net = IpNetwork::new(Ipv4Addr::new(192, 168, 0, 0), 16).unwrap();
        rr.set(net, PeerId::random());
        assert!(rr.clear(net));
        assert_eq!(rr.lookup(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1))), None);
    }
}
