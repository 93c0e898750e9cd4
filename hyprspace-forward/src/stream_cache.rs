//! Stream cache (spec §3 "Stream Slot", §4.3 "Stream cache (C5) semantics"):
//! at most one cached outbound forwarding stream per peer, evicted on
//! write failure or an expired write deadline and rebuilt on next use.

use bytes::BytesMut;
use hyprspace_core::FrameTooLarge;
use hyprspace_transport::{BoxedStream, PeerTransport, TransportError};
use libp2p::{PeerId, StreamProtocol};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as AsyncMutex;

/// A framed write must complete within this long before the slot is
/// considered stuck and evicted (spec §4.3 "25-second write deadline").
pub const WRITE_DEADLINE: Duration = Duration::from_secs(25);

struct Slot {
    stream: Option<BoxedStream>,
    /// Write deadline is implemented as "refresh on success, evict if
    /// expired at next use" rather than an eager timer (spec §9 Open
    /// Question 1).
    deadline: Instant,
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("no stream available and open failed: {0}")]
    OpenFailed(#[from] TransportError),
    #[error("frame too large to send: {0}")]
    FrameTooLarge(#[from] FrameTooLarge),
    #[error("write to peer stream timed out or failed")]
    WriteFailed,
}

/// Per-peer at-most-one outbound forwarding stream (spec component C5).
pub struct StreamCache {
    transport: Arc<dyn PeerTransport>,
    protocol: StreamProtocol,
    slots: RwLock<HashMap<PeerId, Arc<AsyncMutex<Slot>>>>,
    /// Signalled (best-effort) whenever opening or writing a stream fails,
    /// so the discovery loop can retrigger sooner (spec §4.3, §4.4).
    rediscover: tokio::sync::mpsc::Sender<()>,
}

impl StreamCache {
    pub fn new(
        transport: Arc<dyn PeerTransport>,
        protocol: StreamProtocol,
        rediscover: tokio::sync::mpsc::Sender<()>,
    ) -> Self {
        Self {
            transport,
            protocol,
            slots: RwLock::new(HashMap::new()),
            rediscover,
        }
    }

    fn slot_for(&self, peer: PeerId) -> Arc<AsyncMutex<Slot>> {
        if let Some(slot) = self.slots.read().get(&peer) {
            return slot.clone();
        }
        self.slots
            .write()
            .entry(peer)
            .or_insert_with(|| {
                Arc::new(AsyncMutex::new(Slot {
                    stream: None,
                    deadline: Instant::now(),
                }))
            })
            .clone()
    }

    fn signal_rediscover(&self) {
        let _ = self.rediscover.try_send(());
    }

    /// `get_or_open` + framed write, folded into one call: returns the cached
    /// *Open* stream if usable, opens a new one otherwise, writes the frame,
    /// and evicts the slot on any failure (spec §4.3).
    pub async fn send_frame(&self, peer: PeerId, frame: &[u8]) -> Result<(), SendError> {
        let slot = self.slot_for(peer);
        let mut guard = slot.lock().await;

        let expired = guard.deadline <= Instant::now();
        if guard.stream.is_none() || expired {
            guard.stream = None;
            match self
                .transport
                .open_stream(peer, self.protocol.clone())
                .await
            {
                Ok(stream) => guard.stream = Some(stream),
                Err(e) => {
                    self.signal_rediscover();
                    return Err(e.into());
                }
            }
        }

        let mut wire = BytesMut::new();
        hyprspace_core::encode_frame(frame, &mut wire)?;

        let stream = guard.stream.as_mut().expect("just opened or already present");
        let result = tokio::time::timeout(WRITE_DEADLINE, stream.write_all(&wire)).await;
        match result {
            Ok(Ok(())) => {
                guard.deadline = Instant::now() + WRITE_DEADLINE;
                Ok(())
            }
            _ => {
                guard.stream = None;
                self.signal_rediscover();
                Err(SendError::WriteFailed)
            }
        }
    }

    /// Drops the cached stream for `peer`, if any (used when an inbound
    /// handler observes the peer has gone away).
    pub fn evict(&self, peer: PeerId) {
        if let Some(slot) = self.slots.read().get(&peer) {
            if let Ok(mut guard) = slot.try_lock() {
                guard.stream = None;
            }
        }
    }
}
