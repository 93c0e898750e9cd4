//! The internal TCP stack driver task (spec §4.8): owns the `smoltcp`
//! interface and socket set exclusively (the same single-owner-task pattern
//! `hyprspace-transport::swarm` uses for the libp2p swarm, since neither type
//! is safely shared across tasks) and exposes it to the rest of the daemon
//! through a command channel plus a per-connection byte-stream adapter.

use crate::device::VirtualDevice;
use crate::registry::{ServiceRegistry, ServiceTarget};
use bytes::Bytes;
use smoltcp::iface::{Config, Interface, SocketHandle, SocketSet};
use smoltcp::socket::tcp;
use smoltcp::time::Instant as SmolInstant;
use smoltcp::wire::{HardwareAddress, IpAddress, IpCidr, IpListenEndpoint};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::net::Ipv6Addr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant as StdInstant;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::{mpsc, oneshot};

const RX_BUFFER: usize = 64 * 1024;
const TX_BUFFER: usize = 64 * 1024;

/// Internal anchor address the stack's interface binds, mirroring
/// `original_source/svc/network.go`'s `fd00hyprspinternal` address - required
/// by smoltcp's interface but never routed anywhere outside this process.
const STACK_ADDR: Ipv6Addr = Ipv6Addr::new(0xfd00, 0x6879, 0x7072, 0x7370, 0x696e, 0x7400, 0, 1);

enum StackCommand {
    Packet(Vec<u8>),
    Write {
        handle: SocketHandle,
        data: Bytes,
        ack: oneshot::Sender<std::io::Result<usize>>,
    },
    Shutdown {
        handle: SocketHandle,
    },
}

/// Handle to the running service network; cheap to clone and share.
#[derive(Clone)]
pub struct ServiceNetwork {
    commands: mpsc::UnboundedSender<StackCommand>,
}

/// What an accepted connection does with its bridged byte stream: dial a
/// local service, or proxy it to the peer that owns it (spec §4.8).
#[async_trait::async_trait]
pub trait ServiceBridge: Send + Sync {
    async fn bridge(&self, target: ServiceTarget, conn: SmolTcpStream);
}

impl ServiceNetwork {
    /// Spawns the driver task and returns a handle plus the channel the
    /// caller should drain to write stack-produced packets onto the real TUN
    /// (spec §4.8 "Egress from the internal stack").
    pub fn spawn(
        registry: ServiceRegistry,
        mtu: usize,
        bridge: Arc<dyn ServiceBridge>,
    ) -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (egress_tx, egress_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_driver(registry, mtu, bridge, cmd_tx.clone(), cmd_rx, egress_tx));

        (Self { commands: cmd_tx }, egress_rx)
    }

    /// Hands a raw IPv6 packet, already known to target the service subnet,
    /// to the internal stack (spec §4.3 step 4 -> §4.8 "Demux on ingress").
    pub fn handle_packet(&self, packet: Vec<u8>) {
        let _ = self.commands.send(StackCommand::Packet(packet));
    }
}

async fn run_driver(
    registry: ServiceRegistry,
    mtu: usize,
    bridge: Arc<dyn ServiceBridge>,
    commands_tx: mpsc::UnboundedSender<StackCommand>,
    mut commands_rx: mpsc::UnboundedReceiver<StackCommand>,
    egress: mpsc::UnboundedSender<Vec<u8>>,
) {
    let mut device = VirtualDevice::new(egress, mtu);
    let config = Config::new(HardwareAddress::Ip);
    let start = StdInstant::now();
    let mut iface = Interface::new(config, &mut device, smol_now(start));
    iface.update_ip_addrs(|addrs| {
        let _ = addrs.push(IpCidr::new(IpAddress::Ipv6(STACK_ADDR.into()), 128));
    });

    let mut sockets = SocketSet::new(vec![]);
    // endpoint -> the listening socket currently accepting connections for it.
    let mut listeners: HashMap<(Ipv6Addr, u16), SocketHandle> = HashMap::new();
    let mut endpoint_targets: HashMap<(Ipv6Addr, u16), ServiceTarget> = HashMap::new();
    let mut claimed: HashSet<SocketHandle> = HashSet::new();
    let mut readers: HashMap<SocketHandle, mpsc::Sender<Bytes>> = HashMap::new();

    loop {
        let now = smol_now(start);
        let delay = iface
            .poll_delay(now, &sockets)
            .map(|d| std::time::Duration::from_micros(d.total_micros()))
            .unwrap_or(std::time::Duration::from_secs(1));

        tokio::select! {
            cmd = commands_rx.recv() => {
                match cmd {
                    None => return,
                    Some(StackCommand::Packet(packet)) => {
                        if let Some((addr, port)) = dst_addr_port(&packet) {
                            ensure_listener(&registry, &mut sockets, &mut listeners, &mut endpoint_targets, addr, port);
                        }
                        device.push_inbound(packet);
                    }
                    Some(StackCommand::Write { handle, data, ack }) => {
                        let socket: &mut tcp::Socket = sockets.get_mut(handle);
                        if socket.is_open() {
                            match socket.send_slice(&data) {
                                Ok(n) => { let _ = ack.send(Ok(n)); }
                                Err(e) => { let _ = ack.send(Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))); }
                            }
                        } else {
                            let _ = ack.send(Err(std::io::Error::new(std::io::ErrorKind::NotConnected, "socket closed")));
                        }
                    }
                    Some(StackCommand::Shutdown { handle }) => {
                        let socket: &mut tcp::Socket = sockets.get_mut(handle);
                        if socket.is_open() {
                            socket.close();
                        }
                        readers.remove(&handle);
                    }
                }
            }
            _ = tokio::time::sleep(delay) => {}
        }

        let now = smol_now(start);
        iface.poll(now, &mut device, &mut sockets);

        // Drain received bytes for every live connection into its reader.
        let live_handles: Vec<SocketHandle> = readers.keys().copied().collect();
        for handle in live_handles {
            let socket: &mut tcp::Socket = sockets.get_mut(handle);
            if socket.can_recv() {
                let mut buf = vec![0u8; 4096];
                if let Ok(n) = socket.recv_slice(&mut buf) {
                    if n > 0 {
                        if let Some(tx) = readers.get(&handle) {
                            let _ = tx.try_send(Bytes::copy_from_slice(&buf[..n]));
                        }
                    }
                }
            }
            if !socket.is_open() {
                readers.remove(&handle);
            }
        }

        // Claim newly-established connections and re-arm their listener.
        let pending: Vec<((Ipv6Addr, u16), SocketHandle)> =
            listeners.iter().map(|(&k, &v)| (k, v)).collect();
        for (endpoint, handle) in pending {
            if claimed.contains(&handle) {
                continue;
            }
            let established = {
                let socket: &mut tcp::Socket = sockets.get_mut(handle);
                !matches!(socket.state(), tcp::State::Listen | tcp::State::Closed)
            };
            if !established {
                continue;
            }
            claimed.insert(handle);
            let Some(target) = endpoint_targets.get(&endpoint).cloned() else {
                continue;
            };

            let (reader_tx, reader_rx) = mpsc::channel(64);
            readers.insert(handle, reader_tx);
            let stream = SmolTcpStream::new(handle, commands_tx.clone(), reader_rx);
            let bridge = bridge.clone();
            tokio::spawn(async move {
                bridge.bridge(target, stream).await;
            });

            // Re-arm a fresh listening socket so further connections on the
            // same endpoint are accepted too.
            spawn_listener(&mut sockets, &mut listeners, endpoint);
        }
    }
}

fn smol_now(start: StdInstant) -> SmolInstant {
    SmolInstant::from_micros(start.elapsed().as_micros() as i64)
}

/// Extracts `(dst addr, dst tcp port)` from a raw IPv6/TCP frame, if present.
fn dst_addr_port(frame: &[u8]) -> Option<(Ipv6Addr, u16)> {
    if frame.len() < 40 || frame[0] & 0xf0 != 0x60 || frame[6] != 6 {
        return None;
    }
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&frame[24..40]);
    let port = hyprspace_core::tcp_dest_port(frame, 40)?;
    Some((Ipv6Addr::from(octets), port))
}

fn ensure_listener(
    registry: &ServiceRegistry,
    sockets: &mut SocketSet<'static>,
    listeners: &mut HashMap<(Ipv6Addr, u16), SocketHandle>,
    endpoint_targets: &mut HashMap<(Ipv6Addr, u16), ServiceTarget>,
    addr: Ipv6Addr,
    port: u16,
) {
    let key = (addr, port);
    if listeners.contains_key(&key) {
        return;
    }
    let Some(target) = registry.resolve(&addr) else {
        tracing::info!(%addr, port, "svcnet: connection attempt to unknown service");
        return;
    };
    endpoint_targets.insert(key, target);
    spawn_listener(sockets, listeners, key);
}

fn spawn_listener(
    sockets: &mut SocketSet<'static>,
    listeners: &mut HashMap<(Ipv6Addr, u16), SocketHandle>,
    key: (Ipv6Addr, u16),
) {
    let rx_buffer = tcp::SocketBuffer::new(vec![0u8; RX_BUFFER]);
    let tx_buffer = tcp::SocketBuffer::new(vec![0u8; TX_BUFFER]);
    let mut socket = tcp::Socket::new(rx_buffer, tx_buffer);
    let endpoint = IpListenEndpoint {
        addr: Some(IpAddress::Ipv6(key.0.into())),
        port: key.1,
    };
    let _ = socket.listen(endpoint);
    let handle = sockets.add(socket);
    listeners.insert(key, handle);
}

/// Byte-stream adapter bridging an accepted `smoltcp` TCP connection to
/// `AsyncRead`/`AsyncWrite` (and so to `tokio::io::copy_bidirectional`),
/// since the underlying socket lives inside the driver task's exclusively
/// owned `SocketSet`.
pub struct SmolTcpStream {
    handle: SocketHandle,
    commands: mpsc::UnboundedSender<StackCommand>,
    incoming: mpsc::Receiver<Bytes>,
    read_buf: bytes::BytesMut,
    pending_write: Option<oneshot::Receiver<std::io::Result<usize>>>,
}

impl SmolTcpStream {
    fn new(
        handle: SocketHandle,
        commands: mpsc::UnboundedSender<StackCommand>,
        incoming: mpsc::Receiver<Bytes>,
    ) -> Self {
        Self {
            handle,
            commands,
            incoming,
            read_buf: bytes::BytesMut::new(),
            pending_write: None,
        }
    }
}

impl AsyncRead for SmolTcpStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if !self.read_buf.is_empty() {
            let n = self.read_buf.len().min(buf.remaining());
            let chunk = self.read_buf.split_to(n);
            buf.put_slice(&chunk);
            return Poll::Ready(Ok(()));
        }
        match self.incoming.poll_recv(cx) {
            Poll::Ready(Some(bytes)) => {
                self.read_buf.extend_from_slice(&bytes);
                let n = self.read_buf.len().min(buf.remaining());
                let chunk = self.read_buf.split_to(n);
                buf.put_slice(&chunk);
                Poll::Ready(Ok(()))
            }
            Poll::Ready(None) => Poll::Ready(Ok(())),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl AsyncWrite for SmolTcpStream {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        if let Some(mut rx) = self.pending_write.take() {
            return match Pin::new(&mut rx).poll(cx) {
                Poll::Ready(Ok(result)) => Poll::Ready(result),
                Poll::Ready(Err(_)) => Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "stack dropped write ack",
                ))),
                Poll::Pending => {
                    self.pending_write = Some(rx);
                    Poll::Pending
                }
            };
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .commands
            .send(StackCommand::Write {
                handle: self.handle,
                data: Bytes::copy_from_slice(buf),
                ack: ack_tx,
            })
            .is_err()
        {
            return Poll::Ready(Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stack gone")));
        }
        self.pending_write = Some(ack_rx);
        self.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let _ = self.commands.send(StackCommand::Shutdown { handle: self.handle });
        Poll::Ready(Ok(()))
    }
}
