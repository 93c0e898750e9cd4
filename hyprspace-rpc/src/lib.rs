//! Control RPC (spec §4.10, component C4.10): a Unix-domain-socket line
//! protocol exposing daemon status, peer list, and route table mutation to
//! the `hyprspace` CLI, grounded on `original_source/rpc/{server,client,types}.go`.

pub mod protocol;
pub mod server;

pub use protocol::{PeerAddrs, PeersReply, Request, Response, RouteEntry, StatusReply};
pub use server::{serve, socket_path, RpcHandler};
