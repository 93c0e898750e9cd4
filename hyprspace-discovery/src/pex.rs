//! Peer exchange (spec §4.5, component C8): a line-oriented protocol that
//! shares known member addresses among connected peers.

use bytes::BytesMut;
use hyprspace_core::Membership;
use hyprspace_transport::{BoxedStream, PexEntry};
use hyprspace_transport::{Connectedness, ConnectednessEvent, PeerTransport};
use libp2p::{PeerId, StreamProtocol};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// PeX entries are a hint, not ground truth - kept alive just long enough to
/// attempt a dial (spec §4.5).
pub const ADDRESS_TTL: Duration = Duration::from_secs(30);
const REQUEST_READ_DEADLINE: Duration = Duration::from_secs(10);

/// Client side: requests the addresses `peer` knows for other members and
/// feeds them into the transport's address book (spec §4.5).
pub async fn request_pex(
    transport: &Arc<dyn PeerTransport>,
    protocol: StreamProtocol,
    peer: PeerId,
) -> Vec<PexEntry> {
    let mut stream = match transport.open_stream(peer, protocol).await {
        Ok(s) => s,
        Err(e) => {
            tracing::debug!(%peer, error = %e, "pex: could not open stream");
            return Vec::new();
        }
    };

    if tokio::time::timeout(REQUEST_READ_DEADLINE, stream.write_all(b"r\n"))
        .await
        .is_err()
    {
        tracing::debug!(%peer, "pex: request write timed out");
        return Vec::new();
    }

    let mut entries = Vec::new();
    let mut buf = Vec::new();
    if tokio::time::timeout(REQUEST_READ_DEADLINE, stream.read_to_end(&mut buf))
        .await
        .is_err()
    {
        tracing::debug!(%peer, "pex: response read timed out");
    }
    for line in String::from_utf8_lossy(&buf).lines() {
        if let Some(entry) = PexEntry::parse_line(line) {
            entries.push(entry);
        }
    }
    entries
}

/// Server side: one call per accepted PeX stream (spec §4.5, §6).
pub async fn handle_inbound_pex(
    membership: &Membership,
    transport: &Arc<dyn PeerTransport>,
    requester: PeerId,
    is_member: bool,
    mut stream: BoxedStream,
) {
    if !is_member {
        tracing::warn!(%requester, "pex request from non-member, resetting");
        return;
    }

    let mut request = [0u8; 2];
    if tokio::time::timeout(REQUEST_READ_DEADLINE, stream.read_exact(&mut request))
        .await
        .is_err()
    {
        return;
    }
    if &request != b"r\n" {
        return;
    }

    let mut out = BytesMut::new();
    for member in membership.other_members() {
        if member.id == requester {
            continue;
        }
        let mut addrs = transport.known_addrs(member.id);
        addrs.extend(member.static_addrs.iter().cloned());
        for addr in addrs {
            out.extend_from_slice(
                PexEntry {
                    peer: member.id,
                    addr,
                }
                .encode_line()
                .as_ref(),
            );
        }
    }
    let _ = stream.write_all(&out).await;
    let _ = stream.shutdown().await;
}

/// Drives the connectedness-triggered request pattern (spec §4.5
/// "Triggers"): connect requests PeX from the peer that just connected;
/// disconnect requests PeX from every configured member (quorum-style rumor
/// collection).
pub async fn run_trigger_loop(
    transport: Arc<dyn PeerTransport>,
    membership: Arc<Membership>,
    protocol: StreamProtocol,
) {
    let mut events = transport.subscribe_connectedness();
    loop {
        let event = match events.recv().await {
            Ok(e) => e,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
        };
        on_connectedness_event(&transport, &membership, protocol.clone(), event).await;
    }
}

async fn on_connectedness_event(
    transport: &Arc<dyn PeerTransport>,
    membership: &Arc<Membership>,
    protocol: StreamProtocol,
    event: ConnectednessEvent,
) {
    let targets: Vec<PeerId> = match event.connectedness {
        Connectedness::Connected => vec![event.peer],
        Connectedness::NotConnected => membership.peers.iter().map(|p| p.id).collect(),
    };

    for target in targets {
        if !membership.is_member(&target) {
            continue;
        }
        let transport = transport.clone();
        let protocol = protocol.clone();
        tokio::spawn(async move {
            let entries = request_pex(&transport, protocol, target).await;
            for entry in entries {
                transport.add_addrs(entry.peer, vec![entry.addr], ADDRESS_TTL);
                let _ = transport.connect(entry.peer).await;
            }
        });
    }
}
