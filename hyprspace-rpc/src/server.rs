//! The control RPC listener (spec §4.10): a Unix-domain socket at
//! `/run/hyprspace-rpc.<interface>.sock`, mode 0770, accepting one connection
//! at a time, grounded on `original_source/rpc/server.go`'s `RpcServer`.

use crate::protocol::{PeerAddrs, PeersReply, Request, Response, RouteEntry, StatusReply};
use hyprspace_core::Membership;
use hyprspace_forward::ForwardingEngine;
use hyprspace_transport::{Connectedness, PeerTransport};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tokio_util::codec::{Framed, LinesCodec};

/// What the RPC server needs to answer every operation in [`Request`].
pub struct RpcHandler {
    pub transport: Arc<dyn PeerTransport>,
    pub membership: Arc<Membership>,
    pub engine: Arc<ForwardingEngine>,
}

impl RpcHandler {
    async fn handle(&self, request: Request) -> Response {
        match request {
            Request::Status => Response::Status(self.status()),
            Request::Peers => Response::Peers(self.peers()),
            Request::RouteShow => Response::Routes(self.route_show()),
            Request::RouteAdd { net, peer } => self.route_add(&net, &peer).await,
            Request::RouteDel { net } => self.route_del(&net).await,
            Request::RerouteShow => Response::Routes(self.reroute_show()),
            Request::RerouteSet { net, peer } => self.reroute_set(&net, &peer),
            Request::RerouteClear { net } => self.reroute_clear(&net),
        }
    }

    fn status(&self) -> StatusReply {
        let mut net_peers_current = 0;
        let mut net_peer_addrs_current = Vec::new();
        let mut swarm_peers_current = 0;
        for peer in &self.membership.peers {
            swarm_peers_current += self.transport.conns_to_peer(peer.id);
            if self.transport.connectedness(peer.id) == Connectedness::Connected {
                net_peers_current += 1;
                for addr in self.transport.known_addrs(peer.id) {
                    net_peer_addrs_current.push(format!("{addr}/p2p/{}", peer.id));
                }
            }
        }
        StatusReply {
            peer_id: self.transport.local_peer_id().to_string(),
            swarm_peers_current,
            net_peers_current,
            net_peer_addrs_current,
            net_peers_max: self.membership.peers.len(),
            listen_addrs: self.transport.listen_addrs().iter().map(|a| a.to_string()).collect(),
        }
    }

    fn peers(&self) -> PeersReply {
        let peers = self
            .membership
            .peers
            .iter()
            .filter(|p| self.transport.connectedness(p.id) == Connectedness::Connected)
            .map(|p| PeerAddrs {
                peer_id: p.id.to_string(),
                addrs: self
                    .transport
                    .known_addrs(p.id)
                    .iter()
                    .map(|a| a.to_string())
                    .collect(),
            })
            .collect();
        PeersReply { peers }
    }

    fn route_show(&self) -> Vec<RouteEntry> {
        self.engine
            .route_show()
            .into_iter()
            .map(|(net, peer)| RouteEntry {
                net: net.to_string(),
                peer: peer.to_string(),
            })
            .collect()
    }

    async fn route_add(&self, net: &str, peer: &str) -> Response {
        let Ok(net) = net.parse::<ip_network::IpNetwork>() else {
            return Response::Err { message: format!("invalid cidr: {net}") };
        };
        let Ok(peer) = peer.parse::<libp2p::PeerId>() else {
            return Response::Err { message: format!("invalid peer id: {peer}") };
        };
        match self.engine.route_add(net, peer).await {
            Ok(()) => Response::Ok,
            Err(e) => Response::Err { message: e.to_string() },
        }
    }

    async fn route_del(&self, net: &str) -> Response {
        let Ok(net) = net.parse::<ip_network::IpNetwork>() else {
            return Response::Err { message: format!("invalid cidr: {net}") };
        };
        match self.engine.route_del(net).await {
            Ok(()) => Response::Ok,
            Err(e) => Response::Err { message: e.to_string() },
        }
    }

    fn reroute_show(&self) -> Vec<RouteEntry> {
        self.engine
            .reroute_show()
            .into_iter()
            .map(|(net, peer)| RouteEntry {
                net: net.to_string(),
                peer: peer.to_string(),
            })
            .collect()
    }

    fn reroute_set(&self, net: &str, peer: &str) -> Response {
        let Ok(net) = net.parse::<ip_network::IpNetwork>() else {
            return Response::Err { message: format!("invalid cidr: {net}") };
        };
        let Ok(peer) = peer.parse::<libp2p::PeerId>() else {
            return Response::Err { message: format!("invalid peer id: {peer}") };
        };
        self.engine.reroute_set(net, peer);
        Response::Ok
    }

    fn reroute_clear(&self, net: &str) -> Response {
        let Ok(net) = net.parse::<ip_network::IpNetwork>() else {
            return Response::Err { message: format!("invalid cidr: {net}") };
        };
        self.engine.reroute_clear(net);
        Response::Ok
    }
}

/// Binds the control socket for `interface`, removing any stale socket file
/// left behind by a prior unclean shutdown (spec §4.9 teardown order: the
/// lockfile is removed before the socket, so a leftover socket here implies a
/// crash, not a live daemon).
pub fn socket_path(interface: &str) -> PathBuf {
    PathBuf::from(format!("/run/hyprspace-rpc.{interface}.sock"))
}

pub async fn serve(
    path: &Path,
    handler: Arc<RpcHandler>,
    cancel: tokio_util::sync::CancellationToken,
) -> std::io::Result<()> {
    let _ = std::fs::remove_file(path);
    let listener = UnixListener::bind(path)?;
    set_permissions(path)?;
    tracing::info!(path = %path.display(), "rpc: listening");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = std::fs::remove_file(path);
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                // One connection at a time (spec §4.10): handled inline
                // rather than spawned, so a second dialer simply waits.
                handle_connection(stream, &handler).await;
            }
        }
    }
}

fn set_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o770);
    std::fs::set_permissions(path, perms)
}

async fn handle_connection(stream: UnixStream, handler: &Arc<RpcHandler>) {
    use futures_util::{SinkExt, StreamExt};

    let mut framed = Framed::new(stream, LinesCodec::new());
    while let Some(line) = framed.next().await {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                tracing::debug!(error = %e, "rpc: connection read error");
                return;
            }
        };
        let request: Request = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                let err = serde_json::to_string(&Response::Err { message: e.to_string() }).unwrap_or_default();
                let _ = framed.send(err).await;
                continue;
            }
        };
        let response = handler.handle(request).await;
        let encoded = serde_json::to_string(&response).unwrap_or_else(|_| {
            serde_json::to_string(&Response::Err { message: "failed to encode response".to_string() })
                .expect("static error response always encodes")
        });
        if framed.send(encoded).await.is_err() {
            return;
        }
    }
}
