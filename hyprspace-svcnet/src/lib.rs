//! Service Network (spec §4.8, component C10): a user-space TCP stack
//! offering per-peer services at synthesized IPv6 endpoints, tunneled over
//! the forwarding engine's peer transport.

mod device;
mod proxy;
mod receiver;
mod registry;
mod stack;
mod wire;

pub use proxy::DefaultBridge;
pub use receiver::handle_inbound_service_stream;
pub use registry::{service_subnet_for_peer, ServiceRegistry, ServiceTarget};
pub use stack::{ServiceBridge, ServiceNetwork, SmolTcpStream};
