//! Server side of the service protocol (spec §4.8 "Inbound service stream
//! handler", §6 "Wire: service protocol"), grounded on
//! `original_source/svc/receiver.go`'s `streamHandler`.

use crate::registry::ServiceRegistry;
use crate::wire::{multiaddr_to_socket_addr, STATUS_NOT_SUPPORTED, STATUS_OK};
use hyprspace_transport::BoxedStream;
use libp2p::PeerId;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// One call per accepted stream under the service protocol. Non-members are
/// reset immediately, matching every other inbound handler in the daemon.
pub async fn handle_inbound_service_stream(
    registry: &ServiceRegistry,
    requester: PeerId,
    is_member: bool,
    mut stream: BoxedStream,
) {
    if !is_member {
        tracing::warn!(%requester, "svcnet: service request from non-member, resetting");
        return;
    }

    let mut svc_id = [0u8; 2];
    if stream.read_exact(&mut svc_id).await.is_err() {
        return;
    }

    let Some(target) = registry.local_target(svc_id) else {
        tracing::info!(%requester, svc_id = ?svc_id, "svcnet: unknown service requested");
        let _ = stream.write_all(&[STATUS_NOT_SUPPORTED]).await;
        return;
    };

    let Some(socket_addr) = multiaddr_to_socket_addr(&target) else {
        let _ = stream.write_all(&[STATUS_NOT_SUPPORTED]).await;
        return;
    };

    let mut upstream = match TcpStream::connect(socket_addr).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(%socket_addr, error = %e, "svcnet: failed to dial local service for inbound request");
            let _ = stream.write_all(&[STATUS_NOT_SUPPORTED]).await;
            return;
        }
    };

    if stream.write_all(&[STATUS_OK]).await.is_err() {
        return;
    }
    if let Err(e) = tokio::io::copy_bidirectional(&mut stream, &mut upstream).await {
        tracing::debug!(error = %e, "svcnet: inbound service splice ended");
    }
}
