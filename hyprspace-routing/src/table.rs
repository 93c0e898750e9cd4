//! The route table itself (spec §3 "Route Table", §4.2 "Route Table /
//! Longest-Prefix Match").
//!
//! Backed by [`ip_network_table::IpNetworkTable`], which tries IPv4 and IPv6
//! networks independently and returns the longest matching prefix for a
//! lookup address. Each trie node holds a small insertion-ordered list rather
//! than a single value: configuring the same CIDR for two different peers is
//! tolerated (spec §3 "Duplicates (same CIDR) are tolerated but warned"), and
//! `lookup_ip` always returns the first one inserted, deterministically.

use ip_network::IpNetwork;
use ip_network_table::IpNetworkTable;
use libp2p::PeerId;
use std::net::IpAddr;

/// Longest-prefix-match table mapping overlay CIDRs to the peer that owns
/// them (spec component C2).
pub struct RouteTable {
    table: IpNetworkTable<Vec<PeerId>>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteTable {
    pub fn new() -> Self {
        Self {
            table: IpNetworkTable::new(),
        }
    }

    /// Builds a route table directly from a membership's configured peers
    /// (spec §4.2 "materializing routes"). Used both by the node supervisor
    /// and by the recursion gater, which needs its own snapshot of the
    /// statically configured host routes independent of the live table RPC
    /// `route add`/`route del` mutate.
    pub fn from_membership(membership: &hyprspace_core::Membership) -> Self {
        let mut table = Self::new();
        for peer in &membership.peers {
            for net in peer.owned_networks() {
                table.insert(net, peer.id);
            }
        }
        table
    }

    /// Adds `cidr -> peer`. If `cidr` is already present for a different
    /// peer, the existing entry is kept and this insert is logged as a
    /// duplicate (spec §4.2: "first inserted wins; duplicates logged at
    /// warn"). Re-inserting the same `(cidr, peer)` pair is a silent no-op.
    pub fn insert(&mut self, cidr: IpNetwork, peer: PeerId) {
        match self.table.exact_match_mut(cidr) {
            Some(owners) => {
                if owners.contains(&peer) {
                    return;
                }
                tracing::warn!(%cidr, first = %owners[0], duplicate = %peer, "duplicate route CIDR, keeping first insert");
                owners.push(peer);
            }
            None => {
                self.table.insert(cidr, vec![peer]);
            }
        }
    }

    /// Removes every entry for the exact CIDR `cidr`, regardless of how many
    /// peers were layered onto it by [`Self::insert`].
    pub fn remove(&mut self, cidr: IpNetwork) -> bool {
        self.table.remove(cidr).is_some()
    }

    /// Longest-prefix match for `ip`. Returns the first peer inserted for the
    /// most specific matching CIDR, or `None` if nothing covers `ip`.
    pub fn lookup_ip(&self, ip: IpAddr) -> Option<PeerId> {
        self.table
            .longest_match(ip)
            .and_then(|(_, owners)| owners.first().copied())
    }

    /// All networks covering `ip`, most specific first, each with its
    /// first-inserted owner. Used by RPC `route show` (spec §4.10).
    pub fn covered(&self, ip: IpAddr) -> Vec<(IpNetwork, PeerId)> {
        let mut hits: Vec<(IpNetwork, PeerId)> = self
            .table
            .matches(ip)
            .filter_map(|(net, owners)| owners.first().map(|p| (net, *p)))
            .collect();
        hits.sort_by_key(|(net, _)| std::cmp::Reverse(net.netmask()));
        hits
    }

    /// The full, insertion-ordered owner list for the exact CIDR `cidr`, if
    /// present. Used by RPC `route del` (spec §4.10) to restore an entry
    /// byte-for-byte if removing the matching host route fails (spec §7
    /// rollback rule).
    pub fn exact_owners(&self, cidr: IpNetwork) -> Option<Vec<PeerId>> {
        self.table.exact_match(cidr).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = (IpNetwork, PeerId)> + '_ {
        self.table
            .iter()
            .filter_map(|(net, owners)| owners.first().map(|p| (net, *p)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn peer() -> PeerId {
        PeerId::random()
    }

    #[test]
    fn longest_prefix_wins_over_shorter_covering_route() {
        let mut rt = RouteTable::new();
        let wide = peer();
        let narrow = peer();
        rt.insert(IpNetwork::new(Ipv4Addr::new(10, 0, 0, 0), 8).unwrap(), wide);
        rt.insert(IpNetwork::new(Ipv4Addr::new(10, 0, 1, 0), 24).unwrap(), narrow);

        let hit = rt.lookup_ip(IpAddr::V4(Ipv4Addr::new(10, 0, 1, 5)));
        assert_eq!(hit, Some(narrow));

        let other = rt.lookup_ip(IpAddr::V4(Ipv4Addr::new(10, 0, 2, 5)));
        assert_eq!(other, Some(wide));
    }

    #[test]
    fn duplicate_cidr_keeps_first_inserted() {
        let mut rt = RouteTable::new();
        let first = peer();
        let second = peer();
        let cidr = IpNetwork::new(Ipv4Addr::new(192, 168, 1, 0), 24).unwrap();
        rt.insert(cidr, first);
        rt.insert(cidr, second);

        assert_eq!(rt.lookup_ip(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1))), Some(first));
    }

    #[test]
    fn remove_clears_all_owners_of_a_cidr() {
        let mut rt = RouteTable::new();
        let cidr = IpNetwork::new(Ipv4Addr::new(172, 16, 0, 0), 16).unwrap();
        rt.insert(cidr, peer());
        assert!(rt.remove(cidr));
        assert_eq!(rt.lookup_ip(IpAddr::V4(Ipv4Addr::new(172, 16, 0, 1))), None);
    }

    #[test]
    fn ipv6_lookup_works_alongside_ipv4() {
        let mut rt = RouteTable::new();
        let p = peer();
        rt.insert(
            IpNetwork::new(Ipv6Addr::new(0xfd00, 0x6879, 0x7072, 0x7370, 0x6163, 0x6500, 0, 0), 96).unwrap(),
            p,
        );
        let hit = rt.lookup_ip(IpAddr::V6(Ipv6Addr::new(
            0xfd00, 0x6879, 0x7072, 0x7370, 0x6163, 0x6500, 0, 1,
        )));
        assert_eq!(hit, Some(p));
    }
}
