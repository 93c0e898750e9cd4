//! Node Supervisor (spec §4.9, component C11): brings every other component
//! up in order, wires them to each other, and tears them down in the reverse
//! order on shutdown.

use crate::config::{self, LoadedConfig};
use hyprspace_core::addr::{builtin_v4, builtin_v6, service_prefix};
use hyprspace_core::{forwarding_protocol, pex_protocol, service_protocol, MTU};
use hyprspace_discovery::{
    handle_inbound_pex, run_trigger_loop, AddressBookSource, DiscoveryLoop, IpfsApiSource,
    KadSource, PeerAddressSource,
};
use hyprspace_forward::{ForwardingEngine, LocalAddrs, StreamCache};
use hyprspace_routing::{RerouteTable, RouteTable};
use hyprspace_rpc::RpcHandler;
use hyprspace_svcnet::{
    handle_inbound_service_stream, service_subnet_for_peer, DefaultBridge, ServiceNetwork,
    ServiceRegistry,
};
use hyprspace_transport::{gater, Libp2pTransport, PeerTransport};
use hyprspace_tun::{LinuxTun, TunDevice, TunOption};
use libp2p::Multiaddr;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A running node: holds everything the shutdown sequence needs and nothing
/// more. Dropping it without calling [`Supervisor::shutdown`] leaves the
/// lockfile and control socket behind, same as a hard crash.
pub struct Supervisor {
    pub interface: String,
    pub transport: Arc<dyn PeerTransport>,
    pub rediscover_tx: tokio::sync::mpsc::Sender<()>,
    tun: Arc<LinuxTun>,
    lockfile: PathBuf,
    cancel: CancellationToken,
}

/// Brings a node up end to end (spec §4.9 steps 1-6) and returns a handle
/// plus the background tasks' [`CancellationToken`].
pub async fn start(interface: String, config_path: Option<PathBuf>) -> anyhow::Result<Supervisor> {
    // 1. Read config, materialize peers and routes.
    let config_path = config_path.unwrap_or_else(|| config::default_path(&interface));
    let LoadedConfig {
        keypair,
        membership,
        listen_addrs,
        services,
    } = config::load(&config_path)?;
    let membership = Arc::new(membership);

    let route_table = RouteTable::from_membership(&membership);
    let reroute = Arc::new(RerouteTable::new());

    // 2. Create TUN, add builtin addresses, bring up.
    let local_v4 = builtin_v4(&membership.local_id);
    let local_v6 = builtin_v6(&membership.local_id);
    let tun = Arc::new(LinuxTun::new(interface.clone(), MTU as u16));
    tun.up().await?;
    tun.apply(&[
        TunOption::Address(IpAddr::V4(local_v4), 32),
        TunOption::Address(IpAddr::V6(local_v6), 128),
        TunOption::Mtu(MTU as u16),
    ])
    .await?;

    // 3. Instantiate transport with both gaters, PeX handler, forwarding handler.
    let allowed_peers: Vec<_> = gater::allowed_peers(&membership).collect();
    let bootstrap: Vec<Multiaddr> = Vec::new();
    let transport =
        Libp2pTransport::new(keypair, listen_addrs, bootstrap, allowed_peers, membership.clone())
            .await?;

    let cancel = CancellationToken::new();
    let (rediscover_tx, rediscover_rx) = tokio::sync::mpsc::channel(8);
    let (service_net_tx, service_net_rx) = tokio::sync::mpsc::channel(256);

    let stream_cache = Arc::new(StreamCache::new(
        transport.clone(),
        forwarding_protocol(),
        rediscover_tx.clone(),
    ));
    let local_addrs = LocalAddrs {
        v4: local_v4,
        v6: local_v6,
    };
    let engine = ForwardingEngine::new(
        tun.clone(),
        route_table,
        reroute,
        stream_cache,
        local_addrs,
        service_prefix().into(),
        cancel.clone(),
        service_net_tx,
    );

    let registry = ServiceRegistry::new(&membership, &services);
    let bridge = Arc::new(DefaultBridge::new(transport.clone()));
    let (service_net, mut egress_rx) = ServiceNetwork::spawn(registry.clone(), MTU, bridge);
    tokio::spawn({
        let tun = tun.clone();
        async move {
            while let Some(packet) = egress_rx.recv().await {
                let _ = tun.write(&packet).await;
            }
        }
    });
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            let mut rx = service_net_rx;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    Some(packet) = rx.recv() => service_net.handle_packet(packet.to_vec()),
                    else => return,
                }
            }
        }
    });

    {
        let engine = engine.clone();
        let membership = membership.clone();
        transport.set_stream_handler(
            forwarding_protocol(),
            Arc::new(move |peer, stream| {
                let engine = engine.clone();
                let is_member = membership.is_member(&peer);
                tokio::spawn(engine.handle_inbound_stream(peer, is_member, stream));
            }),
        );
    }
    {
        let transport_for_pex = transport.clone();
        let membership = membership.clone();
        transport.set_stream_handler(
            pex_protocol(),
            Arc::new(move |peer, stream| {
                let transport = transport_for_pex.clone();
                let membership = membership.clone();
                let is_member = membership.is_member(&peer);
                tokio::spawn(async move {
                    handle_inbound_pex(&membership, &transport, peer, is_member, stream).await;
                });
            }),
        );
    }
    {
        let registry = registry.clone();
        let membership = membership.clone();
        transport.set_stream_handler(
            service_protocol(),
            Arc::new(move |peer, stream| {
                let registry = registry.clone();
                let is_member = membership.is_member(&peer);
                tokio::spawn(async move {
                    handle_inbound_service_stream(&registry, peer, is_member, stream).await;
                });
            }),
        );
    }

    tokio::spawn(engine.clone().run_ingress());

    // 4. Start discovery, PeX, metrics, service network, control RPC.
    let mut sources: Vec<Arc<dyn PeerAddressSource>> = vec![
        Arc::new(KadSource::new(transport.clone())),
        Arc::new(AddressBookSource::new(transport.clone())),
    ];
    if let Ok(ipfs_api) = std::env::var("HYPRSPACE_IPFS_API") {
        match ipfs_api.parse::<Multiaddr>() {
            Ok(addr) => sources.push(Arc::new(IpfsApiSource::new(addr))),
            Err(e) => tracing::warn!(error = %e, "HYPRSPACE_IPFS_API is not a valid multiaddr, ignoring"),
        }
    }
    if let Ok(path) = std::env::var("HYPRSPACE_SWARM_KEY") {
        tracing::info!(path, "HYPRSPACE_SWARM_KEY set; private-network enforcement is not implemented, ignoring");
    }
    if let Ok(port) = std::env::var("HYPRSPACE_METRICS_PORT") {
        tracing::info!(port, "HYPRSPACE_METRICS_PORT set; the metrics endpoint is out of scope, ignoring");
    }

    let discovery = DiscoveryLoop::new(
        transport.clone(),
        membership.clone(),
        sources,
        rediscover_rx,
        cancel.clone(),
    );
    tokio::spawn(discovery.run());
    tokio::spawn(run_trigger_loop(transport.clone(), membership.clone(), pex_protocol()));

    let rpc_handler = Arc::new(RpcHandler {
        transport: transport.clone(),
        membership: membership.clone(),
        engine: engine.clone(),
    });
    let rpc_socket = hyprspace_rpc::socket_path(&interface);
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if let Err(e) = hyprspace_rpc::serve(&rpc_socket, rpc_handler, cancel).await {
                tracing::error!(error = %e, "rpc server exited");
            }
        }
    });

    // 5. Apply all host routes (including per-peer service /112s).
    for peer in &membership.peers {
        let mut options = Vec::new();
        for net in peer.owned_networks() {
            options.push(TunOption::Route(net));
        }
        options.push(TunOption::Route(service_subnet_for_peer(&peer.id).into()));
        tun.apply(&options).await?;
    }

    // 6. Write a PID lockfile next to the config.
    let lockfile = config::lockfile_path(&config_path, &interface);
    std::fs::write(&lockfile, std::process::id().to_string())?;

    Ok(Supervisor {
        interface,
        transport,
        rediscover_tx,
        tun,
        lockfile,
        cancel,
    })
}

impl Supervisor {
    /// Orderly teardown (spec §4.9): cancels every background task, brings
    /// the TUN device down (unblocking the ingress reader with
    /// [`hyprspace_tun::TunError::Closed`]), and removes the PID lockfile.
    /// The control RPC socket is removed by its own server loop reacting to
    /// the same cancellation.
    pub async fn shutdown(self) {
        tracing::info!(interface = %self.interface, "shutting down");
        self.cancel.cancel();
        if let Err(e) = self.tun.down().await {
            tracing::warn!(error = %e, "tun down failed during shutdown");
        }
        if let Err(e) = std::fs::remove_file(&self.lockfile) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(error = %e, "failed to remove lockfile");
            }
        }
    }

    /// Re-bootstraps discovery on demand (SIGUSR1, spec §4.9/§4.4).
    pub fn rediscover(&self) {
        self.transport.dht_bootstrap();
        let _ = self.rediscover_tx.try_send(());
    }
}
