//! Builds and drives the libp2p [`Swarm`], and implements [`PeerTransport`]
//! on top of it (spec §4 C4).
//!
//! The swarm itself is owned by a single driver task (it is not `Sync`); the
//! [`Libp2pTransport`] handle talks to it through a command channel for
//! dial/address-book operations, and through a cloned [`libp2p_stream::Control`]
//! for stream open/accept, which libp2p-stream already makes safe to use
//! from any task.

use crate::behaviour::{HyprspaceBehaviour, HyprspaceBehaviourEvent};
use crate::gater;
use crate::trait_def::{
    BoxedStream, Connectedness, ConnectednessEvent, PeerTransport, StreamHandler, TransportError,
};
use async_trait::async_trait;
use futures::StreamExt;
use hyprspace_core::Membership;
use hyprspace_routing::RouteTable;
use libp2p::swarm::SwarmEvent;
use libp2p::{identity, noise, yamux, Multiaddr, PeerId, StreamProtocol, Swarm};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot};

const ADDRESS_BOOK_SWEEP_INTERVAL: Duration = Duration::from_secs(10);
const CONNECTEDNESS_CHANNEL_CAPACITY: usize = 256;

enum SwarmCommand {
    Dial {
        peer: PeerId,
        addrs: Vec<Multiaddr>,
        resp: oneshot::Sender<Result<(), TransportError>>,
    },
    /// Explicit DHT lookup, one input to the peer-address-source combinator
    /// (spec §9 "Dynamic dispatch over transports").
    FindPeer {
        peer: PeerId,
        resp: oneshot::Sender<Vec<Multiaddr>>,
    },
    Bootstrap,
}

struct AddressBookEntry {
    addr: Multiaddr,
    expires_at: Instant,
}

#[derive(Default)]
struct AddressBook {
    entries: Mutex<HashMap<PeerId, Vec<AddressBookEntry>>>,
}

impl AddressBook {
    fn add(&self, peer: PeerId, addrs: Vec<Multiaddr>, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        let mut entries = self.entries.lock();
        let slot = entries.entry(peer).or_default();
        for addr in addrs {
            if let Some(existing) = slot.iter_mut().find(|e| e.addr == addr) {
                existing.expires_at = expires_at;
            } else {
                slot.push(AddressBookEntry { addr, expires_at });
            }
        }
    }

    fn live_addrs(&self, peer: &PeerId) -> Vec<Multiaddr> {
        let now = Instant::now();
        self.entries
            .lock()
            .get(peer)
            .map(|slot| {
                slot.iter()
                    .filter(|e| e.expires_at > now)
                    .map(|e| e.addr.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn sweep_expired(&self) {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, slot| {
            slot.retain(|e| e.expires_at > now);
            !slot.is_empty()
        });
    }
}

pub struct Libp2pTransport {
    local_peer_id: PeerId,
    listen_addrs: Vec<Multiaddr>,
    commands: mpsc::Sender<SwarmCommand>,
    stream_control: libp2p_stream::Control,
    address_book: Arc<AddressBook>,
    connectedness: Arc<Mutex<HashMap<PeerId, usize>>>,
    connectedness_tx: broadcast::Sender<ConnectednessEvent>,
    latencies: Arc<Mutex<HashMap<PeerId, f64>>>,
    membership: Arc<Membership>,
    host_routes: RouteTable,
}

/// Smoothing factor for the round-trip EWMA (spec §4.7): weights the newest
/// sample at 30%.
const LATENCY_EWMA_ALPHA: f64 = 0.3;

impl Libp2pTransport {
    /// Builds the swarm, spawns its driver task, and returns the handle used
    /// by the rest of the daemon. `listen_addrs` are the addresses to listen
    /// on (spec §6 config `listenAddresses`); `bootstrap` seeds the DHT on
    /// first run (spec §4.4 additions); `allowed_peers` seeds the relay
    /// gater's closed-membership allow-list (spec §4.6 "Relay gater") so
    /// dials and inbound connections from anyone else are refused at the
    /// swarm level; `membership` additionally seeds the recursion gater's
    /// own host-routes snapshot, consulted by [`PeerTransport::connect`]
    /// (spec §4.6 "Recursion gater").
    pub async fn new(
        keypair: identity::Keypair,
        listen_addrs: Vec<Multiaddr>,
        bootstrap: Vec<Multiaddr>,
        allowed_peers: Vec<PeerId>,
        membership: Arc<Membership>,
    ) -> anyhow::Result<Arc<Self>> {
        let local_peer_id = PeerId::from(keypair.public());

        let mut swarm = libp2p::SwarmBuilder::with_existing_identity(keypair)
            .with_tokio()
            .with_tcp(
                libp2p::tcp::Config::default(),
                noise::Config::new,
                yamux::Config::default,
            )?
            .with_quic()
            .with_dns()?
            .with_relay_client(noise::Config::new, yamux::Config::default)?
            .with_behaviour(|key, relay_client| {
                let local_peer_id = PeerId::from(key.public());
                let mut allow = libp2p::allow_block_list::Behaviour::default();
                for peer in &allowed_peers {
                    allow.allow_peer(*peer);
                }
                Ok(HyprspaceBehaviour {
                    allow,
                    identify: libp2p::identify::Behaviour::new(libp2p::identify::Config::new(
                        "/hyprspace/id/0.0.1".to_string(),
                        key.public(),
                    )),
                    ping: libp2p::ping::Behaviour::default(),
                    kad: libp2p::kad::Behaviour::new(
                        local_peer_id,
                        libp2p::kad::store::MemoryStore::new(local_peer_id),
                    ),
                    relay_client,
                    relay_server: libp2p::relay::Behaviour::new(
                        local_peer_id,
                        libp2p::relay::Config::default(),
                    ),
                    dcutr: libp2p::dcutr::Behaviour::new(local_peer_id),
                    stream: libp2p_stream::Behaviour::new(),
                })
            })?
            .with_swarm_config(|c| c.with_idle_connection_timeout(Duration::from_secs(60)))
            .build();

        for addr in &listen_addrs {
            swarm.listen_on(addr.clone())?;
        }
        for addr in &bootstrap {
            swarm.dial(addr.clone())?;
        }

        let stream_control = swarm.behaviour().stream.new_control();
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (connectedness_tx, _) = broadcast::channel(CONNECTEDNESS_CHANNEL_CAPACITY);
        let connectedness = Arc::new(Mutex::new(HashMap::new()));
        let address_book = Arc::new(AddressBook::default());
        let latencies = Arc::new(Mutex::new(HashMap::new()));
        let host_routes = RouteTable::from_membership(&membership);

        let this = Arc::new(Self {
            local_peer_id,
            listen_addrs,
            commands: cmd_tx,
            stream_control,
            address_book: address_book.clone(),
            connectedness: connectedness.clone(),
            connectedness_tx: connectedness_tx.clone(),
            latencies: latencies.clone(),
            membership,
            host_routes,
        });

        tokio::spawn(drive_swarm(
            swarm,
            cmd_rx,
            connectedness,
            connectedness_tx,
            latencies,
        ));
        tokio::spawn(sweep_address_book(address_book));

        Ok(this)
    }
}

async fn sweep_address_book(book: Arc<AddressBook>) {
    let mut ticker = tokio::time::interval(ADDRESS_BOOK_SWEEP_INTERVAL);
    loop {
        ticker.tick().await;
        book.sweep_expired();
    }
}

async fn drive_swarm(
    mut swarm: Swarm<HyprspaceBehaviour>,
    mut commands: mpsc::Receiver<SwarmCommand>,
    connectedness: Arc<Mutex<HashMap<PeerId, usize>>>,
    connectedness_tx: broadcast::Sender<ConnectednessEvent>,
    latencies: Arc<Mutex<HashMap<PeerId, f64>>>,
) {
    let mut pending_lookups: HashMap<libp2p::kad::QueryId, (PeerId, oneshot::Sender<Vec<Multiaddr>>)> =
        HashMap::new();

    loop {
        tokio::select! {
            Some(cmd) = commands.recv() => match cmd {
                SwarmCommand::Dial { peer, addrs, resp } => {
                    let result = if addrs.is_empty() {
                        swarm.dial(peer)
                    } else {
                        swarm.dial(
                            libp2p::swarm::dial_opts::DialOpts::peer_id(peer)
                                .addresses(addrs)
                                .build(),
                        )
                    };
                    let _ = resp.send(result.map_err(|e| TransportError::DialFailed(e.to_string())));
                }
                SwarmCommand::FindPeer { peer, resp } => {
                    let query_id = swarm.behaviour_mut().kad.get_closest_peers(peer);
                    pending_lookups.insert(query_id, (peer, resp));
                }
                SwarmCommand::Bootstrap => {
                    if let Err(e) = swarm.behaviour_mut().kad.bootstrap() {
                        tracing::debug!(error = %e, "dht bootstrap skipped, no known peers yet");
                    }
                }
            },
            event = swarm.select_next_some() => {
                handle_swarm_event(event, &connectedness, &connectedness_tx, &latencies, &mut pending_lookups);
            }
        }
    }
}

fn handle_swarm_event(
    event: SwarmEvent<HyprspaceBehaviourEvent>,
    connectedness: &Arc<Mutex<HashMap<PeerId, usize>>>,
    connectedness_tx: &broadcast::Sender<ConnectednessEvent>,
    latencies: &Arc<Mutex<HashMap<PeerId, f64>>>,
    pending_lookups: &mut HashMap<libp2p::kad::QueryId, (PeerId, oneshot::Sender<Vec<Multiaddr>>)>,
) {
    match event {
        SwarmEvent::ConnectionEstablished { peer_id, .. } => {
            let became_connected = {
                let mut map = connectedness.lock();
                let count = map.entry(peer_id).or_insert(0);
                *count += 1;
                *count == 1
            };
            if became_connected {
                let _ = connectedness_tx.send(ConnectednessEvent {
                    peer: peer_id,
                    connectedness: Connectedness::Connected,
                });
            }
        }
        SwarmEvent::ConnectionClosed { peer_id, .. } => {
            let became_disconnected = {
                let mut map = connectedness.lock();
                match map.get_mut(&peer_id) {
                    Some(count) if *count > 1 => {
                        *count -= 1;
                        false
                    }
                    Some(_) => {
                        map.remove(&peer_id);
                        true
                    }
                    None => false,
                }
            };
            if became_disconnected {
                let _ = connectedness_tx.send(ConnectednessEvent {
                    peer: peer_id,
                    connectedness: Connectedness::NotConnected,
                });
            }
        }
        SwarmEvent::Behaviour(HyprspaceBehaviourEvent::Kad(libp2p::kad::Event::OutboundQueryProgressed {
            id,
            result: libp2p::kad::QueryResult::GetClosestPeers(Ok(ok)),
            step,
            ..
        })) => {
            if step.last {
                if let Some((target, resp)) = pending_lookups.remove(&id) {
                    let addrs = ok
                        .peers
                        .into_iter()
                        .filter(|p| p.peer_id == target)
                        .flat_map(|p| p.addrs)
                        .collect();
                    let _ = resp.send(addrs);
                }
            }
        }
        SwarmEvent::Behaviour(HyprspaceBehaviourEvent::Kad(libp2p::kad::Event::OutboundQueryProgressed {
            id,
            result: libp2p::kad::QueryResult::GetClosestPeers(Err(_)),
            step,
            ..
        })) => {
            if step.last {
                if let Some((_, resp)) = pending_lookups.remove(&id) {
                    let _ = resp.send(Vec::new());
                }
            }
        }
        SwarmEvent::Behaviour(HyprspaceBehaviourEvent::Identify(libp2p::identify::Event::Received {
            peer_id,
            info,
            ..
        })) => {
            tracing::debug!(%peer_id, addrs = ?info.listen_addrs, "identify received");
        }
        SwarmEvent::Behaviour(HyprspaceBehaviourEvent::Ping(libp2p::ping::Event {
            peer,
            result: Ok(rtt),
            ..
        })) => {
            let sample = rtt.as_secs_f64() * 1000.0;
            let mut map = latencies.lock();
            let smoothed = match map.get(&peer) {
                Some(prev) => prev + LATENCY_EWMA_ALPHA * (sample - prev),
                None => sample,
            };
            map.insert(peer, smoothed);
            tracing::trace!(%peer, rtt_ms = sample, ewma_ms = smoothed, "ping rtt sample");
        }
        other => {
            tracing::trace!(?other, "unhandled swarm event");
        }
    }
}

#[async_trait]
impl PeerTransport for Libp2pTransport {
    fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    fn listen_addrs(&self) -> Vec<Multiaddr> {
        self.listen_addrs.clone()
    }

    async fn open_stream(
        &self,
        peer: PeerId,
        protocol: StreamProtocol,
    ) -> Result<BoxedStream, TransportError> {
        if self.connectedness(peer) == Connectedness::NotConnected {
            self.connect(peer).await?;
        }
        let mut control = self.stream_control.clone();
        let stream = control
            .open_stream(peer, protocol)
            .await
            .map_err(|e| TransportError::StreamOpenFailed(e.to_string()))?;
        Ok(Box::new(stream))
    }

    fn set_stream_handler(&self, protocol: StreamProtocol, handler: StreamHandler) {
        let mut control = self.stream_control.clone();
        let Ok(mut incoming) = control.accept(protocol) else {
            tracing::warn!("protocol handler already registered, ignoring duplicate registration");
            return;
        };
        tokio::spawn(async move {
            while let Some((peer, stream)) = incoming.next().await {
                handler(peer, Box::new(stream));
            }
        });
    }

    async fn connect(&self, peer: PeerId) -> Result<(), TransportError> {
        let mut addrs = self.address_book.live_addrs(&peer);
        if !addrs.is_empty() {
            let known = addrs.len();
            addrs.retain(|addr| !gater::would_recurse(addr, peer, &self.membership, &self.host_routes));
            if addrs.is_empty() && known > 0 {
                tracing::warn!(%peer, "all known addresses denied by the recursion gater");
                return Err(TransportError::DialDenied);
            }
        }
        let (resp_tx, resp_rx) = oneshot::channel();
        self.commands
            .send(SwarmCommand::Dial {
                peer,
                addrs,
                resp: resp_tx,
            })
            .await
            .map_err(|_| TransportError::DialFailed("swarm driver gone".into()))?;
        resp_rx
            .await
            .map_err(|_| TransportError::DialFailed("swarm driver dropped response".into()))?
    }

    fn add_addrs(&self, peer: PeerId, addrs: Vec<Multiaddr>, ttl: Duration) {
        self.address_book.add(peer, addrs, ttl);
    }

    fn known_addrs(&self, peer: PeerId) -> Vec<Multiaddr> {
        self.address_book.live_addrs(&peer)
    }

    fn connectedness(&self, peer: PeerId) -> Connectedness {
        if self.connectedness.lock().contains_key(&peer) {
            Connectedness::Connected
        } else {
            Connectedness::NotConnected
        }
    }

    fn conns_to_peer(&self, peer: PeerId) -> usize {
        self.connectedness.lock().get(&peer).copied().unwrap_or(0)
    }

    fn subscribe_connectedness(&self) -> broadcast::Receiver<ConnectednessEvent> {
        self.connectedness_tx.subscribe()
    }

    fn latency_ms(&self, peer: PeerId) -> Option<f64> {
        self.latencies.lock().get(&peer).copied()
    }

    async fn dht_find_peer(&self, peer: PeerId) -> Vec<Multiaddr> {
        let (resp_tx, resp_rx) = oneshot::channel();
        if self
            .commands
            .send(SwarmCommand::FindPeer { peer, resp: resp_tx })
            .await
            .is_err()
        {
            return Vec::new();
        }
        resp_rx.await.unwrap_or_default()
    }

    fn dht_bootstrap(&self) {
        let _ = self.commands.try_send(SwarmCommand::Bootstrap);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_book_entries_expire() {
        let book = AddressBook::default();
        let peer = PeerId::random();
        let addr: Multiaddr = "/ip4/127.0.0.1/tcp/4001".parse().unwrap();
        book.add(peer, vec![addr.clone()], Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(book.live_addrs(&peer).is_empty());
    }

    #[test]
    fn address_book_returns_live_entries() {
        let book = AddressBook::default();
        let peer = PeerId::random();
        let addr: Multiaddr = "/ip4/127.0.0.1/tcp/4001".parse().unwrap();
        book.add(peer, vec![addr.clone()], Duration::from_secs(30));
        assert_eq!(book.live_addrs(&peer), vec![addr]);
    }
}
