//! Deterministic overlay address derivation from a peer identity.
//!
//! Ported from the `folding_xor` scheme in the original Go implementation
//! (`config/idhash.go`): every derived address starts from a fixed prefix and
//! each byte of the peer identity XORs one position of that prefix, chosen by
//! the byte's index modulo a small stride. This keeps the whole family of
//! addresses a pure, collision-tolerant function of the identity bytes.

use std::net::{Ipv4Addr, Ipv6Addr};

use libp2p::PeerId;

/// `100.64.0.0/10`, the shared-address-space block builtin v4 addresses live in.
pub const BUILTIN_V4_BASE: [u8; 4] = [100, 64, 1, 2];

/// `fd00:6879:7072:7370:6163:6500::/96` - see [`builtin_v6`].
const BUILTIN_V6_BASE: [u8; 16] = *b"\xfd\x00hyprspace\x00\xde\xad\xbe\xef";

/// `fd00:6879:7072:7370:7376:7073::/80` - see [`service_addr`].
const SERVICE_V6_BASE: [u8; 16] = *b"\xfd\x00hyprspsv\xde\xad\xbe\xef\x00\x00";

const SERVICE_ID_INITIAL: [u8; 2] = [0xff, 0xfe];

/// Four-byte fingerprint of a peer identity. Collision domain for the builtin
/// IPv6 address and for every service address of that peer (see spec §9 for
/// the accepted birthday bound).
pub type NetId = [u8; 4];

fn peer_bytes(peer: &PeerId) -> Vec<u8> {
    peer.to_bytes()
}

/// Computes the four-byte [`NetId`] of a peer identity.
///
/// `NetId[i] = 0xde,0xad,0xbe,0xef[i] XOR (XOR of every identity byte at index j where j % 4 == i)`.
pub fn net_id(peer: &PeerId) -> NetId {
    let mut id: NetId = [0xde, 0xad, 0xbe, 0xef];
    for (i, b) in peer_bytes(peer).iter().enumerate() {
        id[i % 4] ^= b;
    }
    id
}

/// Computes the deterministic builtin IPv4 address for a peer identity.
///
/// Always lies in `100.64.0.0/10` (see [`BUILTIN_V4_BASE`]).
pub fn builtin_v4(peer: &PeerId) -> Ipv4Addr {
    let mut addr = BUILTIN_V4_BASE;
    for (i, b) in peer_bytes(peer).iter().enumerate() {
        addr[(i % 2) + 2] ^= b;
    }
    Ipv4Addr::from(addr)
}

/// Computes the deterministic builtin IPv6 address for a peer identity.
///
/// The trailing four bytes always equal [`net_id`] of the same peer; the
/// leading twelve bytes are the fixed `fd00:6879:7072:7370:6163:6500::/96`
/// prefix.
pub fn builtin_v6(peer: &PeerId) -> Ipv6Addr {
    let mut addr = BUILTIN_V6_BASE;
    for (i, b) in peer_bytes(peer).iter().enumerate() {
        addr[(i % 4) + 12] ^= b;
    }
    Ipv6Addr::from(addr)
}

/// Computes the two-byte `ServiceID` of a service name.
///
/// `ServiceID[i % 2] ^= name[i] * i` (wrapping byte multiplication), seeded
/// from `[0xff, 0xfe]`.
pub fn service_id(name: &str) -> [u8; 2] {
    let mut id = SERVICE_ID_INITIAL;
    for (i, b) in name.as_bytes().iter().enumerate() {
        let idx = i % 2;
        id[idx] ^= b.wrapping_mul(i as u8);
    }
    id
}

/// Computes the synthesized IPv6 service address for `(peer, service name)`.
///
/// Shares the `fd00:6879:7072:7370:7376:7073::/80` prefix across all peers
/// and services; bytes `10..14` equal [`net_id`] of `peer`, bytes `14..16`
/// equal [`service_id`] of `name`.
pub fn service_addr(peer: &PeerId, name: &str) -> Ipv6Addr {
    let mut addr = SERVICE_V6_BASE;
    for (i, b) in peer_bytes(peer).iter().enumerate() {
        addr[(i % 4) + 10] ^= b;
    }
    let svc_id = service_id(name);
    addr[14] = svc_id[0];
    addr[15] = svc_id[1];
    Ipv6Addr::from(addr)
}

/// `true` if `addr` falls in the 80-bit service-address prefix shared by every
/// `(peer, service)` address (see [`service_addr`]).
pub fn is_service_addr(addr: &Ipv6Addr) -> bool {
    let octets = addr.octets();
    octets[..10] == SERVICE_V6_BASE[..10]
}

/// The shared `/80` service-address prefix itself (`fd00:6879:7072:7370:7376:7073::/80`),
/// used by the outbound TUN classifier (spec §4.3 step 4) to recognize any
/// service-subnet destination regardless of which peer or service it targets.
pub fn service_prefix() -> ip_network::Ipv6Network {
    let mut base = SERVICE_V6_BASE;
    base[10..].fill(0);
    ip_network::Ipv6Network::new(Ipv6Addr::from(base), 80).expect("/80 is always a valid prefix length")
}

/// Extracts the `NetId` portion (bytes `10..14`) out of a service address.
///
/// Does not validate that `addr` is actually a service address; callers
/// should check [`is_service_addr`] first.
pub fn net_id_of_service_addr(addr: &Ipv6Addr) -> NetId {
    let octets = addr.octets();
    [octets[10], octets[11], octets[12], octets[13]]
}

/// Extracts the `ServiceId` portion (bytes `14..16`) out of a service address.
pub fn service_id_of_service_addr(addr: &Ipv6Addr) -> [u8; 2] {
    let octets = addr.octets();
    [octets[14], octets[15]]
}

#[cfg(test)]
mod tests {
    use super::*;
    use libp2p::identity::Keypair;

    fn rand_peer() -> PeerId {
        Keypair::generate_ed25519().public().to_peer_id()
    }

    #[test]
    fn builtin_v4_lies_in_carrier_grade_nat_block() {
        for _ in 0..50 {
            let p = rand_peer();
            let v4 = builtin_v4(&p);
            let octets = v4.octets();
            assert_eq!(octets[0], 100);
            assert!((64..=127).contains(&octets[1]), "{v4} not in 100.64.0.0/10");
        }
    }

    #[test]
    fn builtin_v6_shares_prefix_and_carries_net_id() {
        for _ in 0..50 {
            let p = rand_peer();
            let v6 = builtin_v6(&p);
            let octets = v6.octets();
            assert_eq!(&octets[..12], &BUILTIN_V6_BASE[..12]);
            assert_eq!(&octets[12..16], &net_id(&p));
        }
    }

    #[test]
    fn service_addr_shares_prefix_and_carries_net_id_and_service_id() {
        let p = rand_peer();
        for name in ["ssh", "http", ""] {
            let addr = service_addr(&p, name);
            let octets = addr.octets();
            assert_eq!(&octets[..10], &SERVICE_V6_BASE[..10]);
            assert_eq!(net_id_of_service_addr(&addr), net_id(&p));
            assert_eq!(service_id_of_service_addr(&addr), service_id(name));
            assert!(is_service_addr(&addr));
        }
    }

    #[test]
    fn builtin_and_service_prefixes_do_not_overlap() {
        assert_ne!(&BUILTIN_V6_BASE[..10], &SERVICE_V6_BASE[..10]);
    }

    #[test]
    fn derivation_is_deterministic() {
        let p = rand_peer();
        assert_eq!(builtin_v4(&p), builtin_v4(&p));
        assert_eq!(builtin_v6(&p), builtin_v6(&p));
        assert_eq!(service_addr(&p, "ssh"), service_addr(&p, "ssh"));
    }

    #[test]
    fn service_id_matches_golden_values() {
        // Regression values computed by hand from the `id[i%2] ^= b * i` rule.
        assert_eq!(service_id(""), [0xff, 0xfe]);
    }
}
