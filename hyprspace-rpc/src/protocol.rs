//! Request/response envelopes for the control RPC (spec §4.10, §6 "Control
//! RPC"), grounded on `original_source/rpc/types.go`'s `StatusReply`/
//! `PeersReply`. The wire encoding itself is out of scope per spec.md, so
//! this is the simplest idiomatic choice rather than a contract: one JSON
//! object per line.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Status,
    Peers,
    RouteShow,
    RouteAdd { net: String, peer: String },
    RouteDel { net: String },
    RerouteShow,
    RerouteSet { net: String, peer: String },
    RerouteClear { net: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReply {
    pub peer_id: String,
    pub swarm_peers_current: usize,
    pub net_peers_current: usize,
    pub net_peer_addrs_current: Vec<String>,
    pub net_peers_max: usize,
    pub listen_addrs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerAddrs {
    pub peer_id: String,
    pub addrs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeersReply {
    pub peers: Vec<PeerAddrs>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteEntry {
    pub net: String,
    pub peer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result")]
pub enum Response {
    Status(StatusReply),
    Peers(PeersReply),
    Routes(Vec<RouteEntry>),
    Ok,
    Err { message: String },
}
