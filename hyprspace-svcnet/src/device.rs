//! The `smoltcp` [`Device`] that feeds the internal TCP stack raw IPv6
//! packets and collects its output for re-injection onto the real TUN (spec
//! §4.8 "Egress from the internal stack").

use smoltcp::phy::{Device, DeviceCapabilities, Medium, RxToken, TxToken};
use smoltcp::time::Instant as SmolInstant;
use std::collections::VecDeque;
use tokio::sync::mpsc;

/// A pair of queues standing in for a real network card: packets destined
/// for the service subnet are pushed into `rx_queue` before each poll, and
/// whatever the stack transmits is handed to `egress` for the caller to
/// write back onto the real TUN.
pub struct VirtualDevice {
    rx_queue: VecDeque<Vec<u8>>,
    egress: mpsc::UnboundedSender<Vec<u8>>,
    mtu: usize,
}

impl VirtualDevice {
    pub fn new(egress: mpsc::UnboundedSender<Vec<u8>>, mtu: usize) -> Self {
        Self {
            rx_queue: VecDeque::new(),
            egress,
            mtu,
        }
    }

    pub fn push_inbound(&mut self, packet: Vec<u8>) {
        self.rx_queue.push_back(packet);
    }

    pub fn has_pending(&self) -> bool {
        !self.rx_queue.is_empty()
    }
}

pub struct VirtualRxToken {
    buf: Vec<u8>,
}

impl RxToken for VirtualRxToken {
    fn consume<R, F>(mut self, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        f(&mut self.buf)
    }
}

pub struct VirtualTxToken<'a> {
    egress: &'a mpsc::UnboundedSender<Vec<u8>>,
}

impl<'a> TxToken for VirtualTxToken<'a> {
    fn consume<R, F>(self, len: usize, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        let mut buf = vec![0u8; len];
        let result = f(&mut buf);
        let _ = self.egress.send(buf);
        result
    }
}

impl Device for VirtualDevice {
    type RxToken<'a>
        = VirtualRxToken
    where
        Self: 'a;
    type TxToken<'a>
        = VirtualTxToken<'a>
    where
        Self: 'a;

    fn receive(&mut self, _timestamp: SmolInstant) -> Option<(Self::RxToken<'_>, Self::TxToken<'_>)> {
        let packet = self.rx_queue.pop_front()?;
        Some((
            VirtualRxToken { buf: packet },
            VirtualTxToken {
                egress: &self.egress,
            },
        ))
    }

    fn transmit(&mut self, _timestamp: SmolInstant) -> Option<Self::TxToken<'_>> {
        Some(VirtualTxToken {
            egress: &self.egress,
        })
    }

    fn capabilities(&self) -> DeviceCapabilities {
        let mut caps = DeviceCapabilities::default();
        caps.max_transmission_unit = self.mtu;
        caps.medium = Medium::Ip;
        caps
    }
}
