//! Client side of the service bridge (spec §4.8 "Accepted connections"),
//! grounded line-for-line on `original_source/svc/proxy.go`'s
//! `RemoteServiceProxy`. The bidirectional splice uses
//! `tokio::io::copy_bidirectional` in place of the original's hand-rolled
//! channel pump (`original_source/svc/pipe.go`).

use crate::registry::ServiceTarget;
use crate::stack::{ServiceBridge, SmolTcpStream};
use crate::wire::{multiaddr_to_socket_addr, PROXY_HANDSHAKE_DEADLINE, STATUS_OK};
use hyprspace_core::service_protocol;
use hyprspace_transport::PeerTransport;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Bridges an accepted service-subnet connection to whatever
/// [`ServiceTarget`] it resolved to (spec §4.8).
pub struct DefaultBridge {
    transport: Arc<dyn PeerTransport>,
}

impl DefaultBridge {
    pub fn new(transport: Arc<dyn PeerTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait::async_trait]
impl ServiceBridge for DefaultBridge {
    async fn bridge(&self, target: ServiceTarget, mut conn: SmolTcpStream) {
        match target {
            ServiceTarget::Local(addr) => {
                let Some(socket_addr) = multiaddr_to_socket_addr(&addr) else {
                    tracing::warn!(%addr, "svcnet: local service target is not a dialable multiaddr");
                    return;
                };
                match TcpStream::connect(socket_addr).await {
                    Ok(mut upstream) => {
                        if let Err(e) = tokio::io::copy_bidirectional(&mut conn, &mut upstream).await {
                            tracing::debug!(error = %e, "svcnet: local service splice ended");
                        }
                    }
                    Err(e) => tracing::warn!(%socket_addr, error = %e, "svcnet: failed to dial local service"),
                }
            }
            ServiceTarget::Remote(peer, svc_id) => {
                let mut stream = match self.transport.open_stream(peer, service_protocol()).await {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::debug!(%peer, error = %e, "svcnet: could not open service stream");
                        return;
                    }
                };
                if tokio::time::timeout(PROXY_HANDSHAKE_DEADLINE, stream.write_all(&svc_id))
                    .await
                    .is_err()
                {
                    return;
                }
                let mut status = [0u8; 1];
                if tokio::time::timeout(
                    PROXY_HANDSHAKE_DEADLINE,
                    tokio::io::AsyncReadExt::read_exact(&mut stream, &mut status),
                )
                .await
                .is_err()
                {
                    return;
                }
                if status[0] != STATUS_OK {
                    tracing::debug!(%peer, svc_id = ?svc_id, "svcnet: peer does not support service");
                    return;
                }
                if let Err(e) = tokio::io::copy_bidirectional(&mut conn, &mut stream).await {
                    tracing::debug!(error = %e, "svcnet: remote service splice ended");
                }
            }
        }
    }
}
