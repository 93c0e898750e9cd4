//! Overlay addressing, packet framing, and shared data/error types (spec §3, §7).

pub mod addr;
pub mod error;
pub mod model;
pub mod packet;
pub mod protocols;

pub use model::{Membership, PeerRecord, ServiceConfig};
pub use packet::{decode_frame, destination_bytes, encode_frame, is_tcp, tcp_dest_port, FrameTooLarge, IpVersion, MTU};
pub use protocols::{forwarding_protocol, pex_protocol, service_protocol};
