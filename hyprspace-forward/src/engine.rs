//! Forwarding engine (spec §4.3, component C6): one TUN ingress task plus a
//! dedicated egress worker per destination peer, pumping frames between the
//! TUN device and the peer transport via the stream cache (C5).

use crate::queue::PeerQueue;
use crate::stream_cache::StreamCache;
use bytes::Bytes;
use hyprspace_routing::RerouteTable;
use hyprspace_routing::RouteTable;
use hyprspace_tun::{TunDevice, TunError, TunOption};
use ip_network::IpNetwork;
use libp2p::PeerId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// This node's own overlay addresses, used for the self-addressed drop rule
/// (spec §4.3 step 3).
#[derive(Debug, Clone, Copy)]
pub struct LocalAddrs {
    pub v4: Ipv4Addr,
    pub v6: Ipv6Addr,
}

/// The destination classification for an outbound TUN frame (spec §4.3
/// steps 2-5).
enum Destination {
    /// Drop: not IPv4/IPv6, or self-addressed, or no route.
    Drop,
    Service,
    Peer(PeerId),
}

pub struct ForwardingEngine {
    tun: Arc<dyn TunDevice>,
    routes: arc_swap::ArcSwap<hyprspace_routing::RouteTable>,
    reroute: Arc<RerouteTable>,
    stream_cache: Arc<StreamCache>,
    local: LocalAddrs,
    service_subnet: IpNetwork,
    queues: RwLock<HashMap<PeerId, Arc<PeerQueue>>>,
    cancel: CancellationToken,
    service_net_tx: tokio::sync::mpsc::Sender<Bytes>,
}

impl ForwardingEngine {
    pub fn new(
        tun: Arc<dyn TunDevice>,
        routes: hyprspace_routing::RouteTable,
        reroute: Arc<RerouteTable>,
        stream_cache: Arc<StreamCache>,
        local: LocalAddrs,
        service_subnet: IpNetwork,
        cancel: CancellationToken,
        service_net_tx: tokio::sync::mpsc::Sender<Bytes>,
    ) -> Arc<Self> {
        Arc::new(Self {
            tun,
            routes: arc_swap::ArcSwap::from_pointee(routes),
            reroute,
            stream_cache,
            local,
            service_subnet,
            queues: RwLock::new(HashMap::new()),
            cancel,
            service_net_tx,
        })
    }

    /// Swaps in a new route table snapshot (RPC `route add`/`route del`,
    /// spec §5 "copy-on-write tree").
    pub fn replace_routes(&self, routes: hyprspace_routing::RouteTable) {
        self.routes.store(Arc::new(routes));
    }

    /// Every route currently installed, for RPC `route show` (spec §4.10).
    pub fn route_show(&self) -> Vec<(IpNetwork, PeerId)> {
        self.routes.load().iter().collect()
    }

    fn clone_table(&self) -> RouteTable {
        let mut next = RouteTable::new();
        for (net, peer) in self.routes.load().iter() {
            next.insert(net, peer);
        }
        next
    }

    /// RPC `route add` (spec §4.10, §7 rollback rule): the host route is
    /// applied first; the table is only mutated if that succeeds, so a
    /// failure leaves the table unchanged.
    pub async fn route_add(&self, cidr: IpNetwork, peer: PeerId) -> Result<(), TunError> {
        self.tun.apply(&[TunOption::Route(cidr)]).await?;
        let mut next = self.clone_table();
        next.insert(cidr, peer);
        self.routes.store(Arc::new(next));
        Ok(())
    }

    /// RPC `route del` (spec §4.10, §7 rollback rule): the table is mutated
    /// first so the forwarding path stops using the route immediately: if
    /// removing the host route then fails, the original owner list is
    /// restored so table and host stay consistent.
    pub async fn route_del(&self, cidr: IpNetwork) -> Result<(), TunError> {
        let before = self.routes.load().exact_owners(cidr);
        let Some(owners) = before else {
            return Ok(());
        };

        let mut next = self.clone_table();
        next.remove(cidr);
        self.routes.store(Arc::new(next));

        if let Err(e) = self.tun.apply(&[TunOption::RemoveRoute(cidr)]).await {
            let mut restored = self.clone_table();
            for peer in owners {
                restored.insert(cidr, peer);
            }
            self.routes.store(Arc::new(restored));
            return Err(e);
        }
        Ok(())
    }

    /// RPC `reroute set` (spec §3 "Reroute Record"): adds or replaces the
    /// override for `cidr`, consulted ahead of the route table for both
    /// address families (spec §9 Open Question 2).
    pub fn reroute_set(&self, cidr: IpNetwork, peer: PeerId) {
        self.reroute.set(cidr, peer);
    }

    /// RPC `reroute clear`. Returns whether an override existed for `cidr`.
    pub fn reroute_clear(&self, cidr: IpNetwork) -> bool {
        self.reroute.clear(cidr)
    }

    /// Every reroute override currently installed, for RPC `reroute show`.
    pub fn reroute_show(&self) -> Vec<(IpNetwork, PeerId)> {
        self.reroute.entries()
    }

    fn classify(&self, frame: &[u8]) -> Destination {
        let Some(dst_bytes) = hyprspace_core::destination_bytes(frame) else {
            return Destination::Drop;
        };
        let dst: IpAddr = match dst_bytes.len() {
            4 => IpAddr::V4(Ipv4Addr::new(dst_bytes[0], dst_bytes[1], dst_bytes[2], dst_bytes[3])),
            16 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(dst_bytes);
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            _ => return Destination::Drop,
        };

        match dst {
            IpAddr::V4(v4) if v4 == self.local.v4 => return Destination::Drop,
            IpAddr::V6(v6) if v6 == self.local.v6 => return Destination::Drop,
            _ => {}
        }

        if let IpAddr::V6(_) = dst {
            if self.service_subnet.contains(dst) && hyprspace_core::is_tcp(frame) {
                return Destination::Service;
            }
        }

        let target = self
            .reroute
            .lookup(dst)
            .or_else(|| self.routes.load().lookup_ip(dst));

        match target {
            Some(peer) => Destination::Peer(peer),
            None => Destination::Drop,
        }
    }

    fn queue_for(self: &Arc<Self>, peer: PeerId) -> Arc<PeerQueue> {
        if let Some(q) = self.queues.read().get(&peer) {
            return q.clone();
        }
        let mut queues = self.queues.write();
        if let Some(q) = queues.get(&peer) {
            return q.clone();
        }
        let queue = Arc::new(PeerQueue::new());
        queues.insert(peer, queue.clone());
        drop(queues);
        tokio::spawn(self.clone().run_egress_worker(peer, queue.clone()));
        queue
    }

    async fn run_egress_worker(self: Arc<Self>, peer: PeerId, queue: Arc<PeerQueue>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                frame = queue.pop() => {
                    let Some(frame) = frame else { return };
                    if let Err(e) = self.stream_cache.send_frame(peer, &frame).await {
                        tracing::debug!(%peer, error = %e, "dropping frame, stream unavailable");
                    }
                }
            }
        }
    }

    /// Runs the single TUN ingress task until the device closes or the root
    /// context cancels (spec §4.3, §5 "TUN device is closed last").
    pub async fn run_ingress(self: Arc<Self>) {
        let mut buf = vec![0u8; hyprspace_core::MTU];
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = self.tun.read(&mut buf) => {
                    match result {
                        Ok(n) => self.handle_outbound(&buf[..n]).await,
                        Err(TunError::Closed) => {
                            tracing::info!("tun closed, exiting ingress loop");
                            return;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "tun read error");
                        }
                    }
                }
            }
        }
    }

    async fn handle_outbound(self: &Arc<Self>, frame: &[u8]) {
        match self.classify(frame) {
            Destination::Drop => {}
            Destination::Service => {
                if self.service_net_tx.try_send(Bytes::copy_from_slice(frame)).is_err() {
                    tracing::trace!("service network backlog full, dropping frame");
                }
            }
            Destination::Peer(peer) => {
                self.queue_for(peer)
                    .push(Bytes::copy_from_slice(frame))
                    .await;
            }
        }
    }

    /// Inbound handler for the forwarding protocol (spec §4.3 "Inbound
    /// path"): one call per accepted stream. Resets (drops) the stream
    /// immediately if the remote is not a configured member.
    pub async fn handle_inbound_stream(
        self: Arc<Self>,
        peer: PeerId,
        is_member: bool,
        mut stream: hyprspace_transport::BoxedStream,
    ) {
        use tokio::io::AsyncReadExt;

        if !is_member {
            tracing::warn!(%peer, "forwarding stream from non-member, resetting");
            return;
        }

        let mut buf = bytes::BytesMut::with_capacity(hyprspace_core::MTU + 2);
        loop {
            let mut len_bytes = [0u8; 2];
            let read = tokio::time::timeout(
                crate::stream_cache::WRITE_DEADLINE,
                stream.read_exact(&mut len_bytes),
            )
            .await;
            match read {
                Ok(Ok(())) => {}
                _ => return,
            }
            let len = u16::from_le_bytes(len_bytes) as usize;
            buf.clear();
            buf.resize(len, 0);
            if tokio::time::timeout(crate::stream_cache::WRITE_DEADLINE, stream.read_exact(&mut buf))
                .await
                .is_err()
            {
                return;
            }
            let write = async {
                let mut written = 0;
                while written < buf.len() {
                    match self.tun.write(&buf[written..]).await {
                        Ok(0) => break,
                        Ok(n) => written += n,
                        Err(_) => break,
                    }
                }
            };
            if tokio::time::timeout(crate::stream_cache::WRITE_DEADLINE, write)
                .await
                .is_err()
            {
                tracing::warn!("tun write deadline exceeded, dropping frame");
            }
        }
    }
}
