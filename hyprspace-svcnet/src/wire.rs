//! Status bytes for the service wire protocol (spec §6 "Wire: service
//! protocol", grounded on `original_source/svc/proxy.go`'s
//! `RemoteServiceProxyStatus`).

use std::time::Duration;

pub const STATUS_OK: u8 = 0xf1;
pub const STATUS_NOT_SUPPORTED: u8 = 0xf2;

/// Bound on dialing the owning peer and waiting for its status byte.
pub const PROXY_HANDSHAKE_DEADLINE: Duration = Duration::from_secs(10);

/// Converts a `/ip4/.../tcp/...` or `/ip6/.../tcp/...` multiaddr into a
/// `SocketAddr` for dialing a local service target (spec §6 config
/// `services: name -> multiaddr`).
pub fn multiaddr_to_socket_addr(addr: &libp2p::Multiaddr) -> Option<std::net::SocketAddr> {
    use libp2p::multiaddr::Protocol;
    use std::net::{IpAddr, SocketAddr};

    let mut ip = None;
    let mut port = None;
    for proto in addr.iter() {
        match proto {
            Protocol::Ip4(v4) => ip = Some(IpAddr::V4(v4)),
            Protocol::Ip6(v6) => ip = Some(IpAddr::V6(v6)),
            Protocol::Tcp(p) => port = Some(p),
            _ => {}
        }
    }
    Some(SocketAddr::new(ip?, port?))
}
