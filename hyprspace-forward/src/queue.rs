//! Per-peer bounded egress queue (spec §4.3 "Per-peer bounded queue"): fixed
//! capacity, drop-oldest-on-overflow, so a slow peer's backlog never blocks
//! the TUN ingress reader.
//!
//! `tokio::sync::mpsc` has no native ring-buffer-with-overwrite semantics, so
//! overflow is handled by popping the oldest queued frame with `try_recv`
//! before re-sending the new one, under the channel's own capacity check.

use bytes::Bytes;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};

pub const CAPACITY: usize = 128;

pub struct PeerQueue {
    tx: mpsc::Sender<Bytes>,
    rx: Mutex<mpsc::Receiver<Bytes>>,
}

impl Default for PeerQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(CAPACITY);
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Pushes `frame`, dropping the oldest queued frame if already at
    /// capacity (spec §4.3: "newer packets are more informative").
    pub async fn push(&self, frame: Bytes) {
        match self.tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                {
                    let mut rx = self.rx.lock().await;
                    let _ = rx.try_recv();
                }
                if self.tx.try_send(frame).is_err() {
                    tracing::trace!("peer queue still full after evicting oldest, dropping frame");
                }
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Waits for the next queued frame. Returns `None` once every sender has
    /// been dropped (the engine is shutting down).
    pub async fn pop(&self) -> Option<Bytes> {
        self.rx.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn overflow_drops_the_oldest_entry() {
        let q = PeerQueue::new();
        for i in 0..(CAPACITY + 1) {
            q.push(Bytes::from(vec![i as u8])).await;
        }
        let first_out = q.pop().await.unwrap();
        assert_eq!(first_out, Bytes::from(vec![1u8]));
    }

    #[tokio::test]
    async fn pop_waits_for_a_push() {
        let q = std::sync::Arc::new(PeerQueue::new());
        let q2 = q.clone();
        let handle = tokio::spawn(async move { q2.pop().await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        q.push(Bytes::from_static(b"hi")).await;
        let got = handle.await.unwrap().unwrap();
        assert_eq!(got, Bytes::from_static(b"hi"));
    }
}
