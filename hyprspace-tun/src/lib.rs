//! TUN adapter (spec §4.1, component C3): a blocking, one-frame-per-call
//! byte interface over a platform TUN device, plus the address/route/MTU
//! options applied to it at startup and on reroute events.

mod linux;

use async_trait::async_trait;
use ip_network::IpNetwork;
use std::net::IpAddr;

/// One configuration change applied via [`TunDevice::apply`] (spec §4.1).
#[derive(Debug, Clone)]
pub enum TunOption {
    /// An address to assign to the device: IPv4 with a /32, IPv6 with a /128.
    Address(IpAddr, u8),
    Route(IpNetwork),
    RemoveRoute(IpNetwork),
    Mtu(u16),
}

#[derive(Debug, thiserror::Error)]
pub enum TunError {
    #[error("tun device: {0}")]
    Io(#[from] std::io::Error),
    #[error("tun device is down")]
    Closed,
}

/// Contract implemented by the platform TUN backend (spec §4.1).
///
/// `read`/`write` move exactly one complete IP frame per call. After
/// [`TunDevice::down`], `read` must fail with [`TunError::Closed`] so that the
/// forwarding loop (C6) can treat it as a terminal signal and exit.
#[async_trait]
pub trait TunDevice: Send + Sync {
    async fn up(&self) -> Result<(), TunError>;
    async fn down(&self) -> Result<(), TunError>;
    async fn read(&self, buf: &mut [u8]) -> Result<usize, TunError>;
    async fn write(&self, buf: &[u8]) -> Result<usize, TunError>;
    /// Applies options in order. Assigning an address already present, or
    /// adding a route already present, is idempotent; removing an absent
    /// route is a no-op logged at warn (spec §4.1).
    async fn apply(&self, options: &[TunOption]) -> Result<(), TunError>;
}

pub use linux::LinuxTun;
