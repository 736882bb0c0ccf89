//! The three-port endpoint set.
//!
//! Each protocol port gets a unicast socket bound to the host address and,
//! when enabled, a second socket bound to the broadcast address so LAN
//! broadcasts are received too. Outbound traffic (including broadcasts)
//! always leaves from the unicast socket so the source address identifies
//! this host.
//!
//! ```text
//!   discovery 32770 ─┐
//!   secure    32771 ─┼─ receive loops ─ subnet filter ─ mpsc ─▶ router
//!   data      49171 ─┘
//! ```

use crate::subnet::Subnet;
use crate::transport::{Transport, TransportError, TransportResult, TransportStats};
use crate::udp_async::{AsyncUdpTransport, SocketOptions};
use crate::MAX_DATAGRAM;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Longest a receive loop blocks before re-checking the running flag
const RECV_POLL: Duration = Duration::from_secs(1);

/// Capacity of the inbound datagram channel
const INBOUND_QUEUE: usize = 1024;

/// Which protocol port a datagram belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortKind {
    /// Peer, share and printer discovery
    Discovery,
    /// Secure-share key exchange
    Secure,
    /// File operations and transfers
    Data,
}

impl PortKind {
    /// All kinds in binding order
    pub const ALL: [PortKind; 3] = [PortKind::Discovery, PortKind::Secure, PortKind::Data];

    fn index(self) -> usize {
        match self {
            PortKind::Discovery => 0,
            PortKind::Secure => 1,
            PortKind::Data => 2,
        }
    }
}

/// Port numbers for the three endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSet {
    /// Discovery port
    pub discovery: u16,
    /// Secure-share port
    pub secure: u16,
    /// Data port
    pub data: u16,
}

impl Default for PortSet {
    fn default() -> Self {
        Self {
            discovery: 32770,
            secure: 32771,
            data: 49171,
        }
    }
}

impl PortSet {
    /// Port number for `kind`
    pub fn port(&self, kind: PortKind) -> u16 {
        match kind {
            PortKind::Discovery => self.discovery,
            PortKind::Secure => self.secure,
            PortKind::Data => self.data,
        }
    }
}

/// Addressing for an endpoint set
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Address of this host on the LAN
    pub host_addr: Ipv4Addr,
    /// Broadcast address broadcasts are sent to
    pub broadcast_addr: Ipv4Addr,
    /// Only datagrams from inside this network are accepted
    pub subnet: Subnet,
    /// Port numbers
    pub ports: PortSet,
    /// Bind a second socket to the broadcast address of each port
    pub bind_broadcast: bool,
    /// Bind the unicast sockets to ephemeral ports. Replies still arrive
    /// because servers answer the sender's address; lets a client run next
    /// to a daemon on the same host.
    pub ephemeral_unicast: bool,
}

/// One received datagram
#[derive(Debug, Clone)]
pub struct Datagram {
    /// Port it arrived on
    pub port: PortKind,
    /// Sender
    pub from: SocketAddrV4,
    /// Payload
    pub data: Vec<u8>,
}

struct Endpoint {
    unicast: AsyncUdpTransport,
    broadcast: Option<AsyncUdpTransport>,
}

/// The bound sockets for all three ports
pub struct EndpointSet {
    config: EndpointConfig,
    endpoints: Vec<Endpoint>,
}

impl EndpointSet {
    /// Bind every socket.
    ///
    /// If the broadcast address cannot be bound, the wildcard address is
    /// used instead so broadcasts still arrive.
    ///
    /// # Errors
    /// Returns `TransportError::BindFailed` when a unicast socket cannot be bound
    pub async fn bind(config: EndpointConfig) -> TransportResult<Self> {
        let mut endpoints = Vec::with_capacity(PortKind::ALL.len());
        for kind in PortKind::ALL {
            let port = config.ports.port(kind);
            let unicast_port = if config.ephemeral_unicast { 0 } else { port };
            let unicast = AsyncUdpTransport::bind_with(
                SocketAddr::from((config.host_addr, unicast_port)),
                SocketOptions::default(),
            )
            .await?;

            let broadcast = if config.bind_broadcast {
                Some(bind_broadcast(config.broadcast_addr, port).await?)
            } else {
                None
            };

            tracing::debug!(
                "Bound {:?} endpoint on {}:{} (broadcast socket: {})",
                kind,
                config.host_addr,
                port,
                broadcast.is_some()
            );
            endpoints.push(Endpoint { unicast, broadcast });
        }

        Ok(Self { config, endpoints })
    }

    /// Endpoint addressing
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Address of this host
    pub fn host_addr(&self) -> Ipv4Addr {
        self.config.host_addr
    }

    /// Local address of the unicast socket for `kind`
    ///
    /// # Errors
    /// Returns `TransportError` if the address cannot be determined
    pub fn local_addr(&self, kind: PortKind) -> TransportResult<SocketAddr> {
        self.endpoints[kind.index()].unicast.local_addr()
    }

    /// Send a datagram from the unicast socket of `kind`
    ///
    /// # Errors
    /// Propagates send failures; a full buffer after every retry yields
    /// `TransportError::SendDropped`
    pub async fn send(&self, kind: PortKind, data: &[u8], to: SocketAddr) -> TransportResult<usize> {
        tracing::trace!("send {:?} {} bytes to {}", kind, data.len(), to);
        self.endpoints[kind.index()].unicast.send_to(data, to).await
    }

    /// Send to `ip` on this set's port for `kind`
    ///
    /// # Errors
    /// See [`EndpointSet::send`]
    pub async fn send_to_host(
        &self,
        kind: PortKind,
        data: &[u8],
        ip: Ipv4Addr,
    ) -> TransportResult<usize> {
        let to = SocketAddr::from((ip, self.config.ports.port(kind)));
        self.send(kind, data, to).await
    }

    /// Broadcast a datagram on the port for `kind`
    ///
    /// # Errors
    /// See [`EndpointSet::send`]
    pub async fn broadcast(&self, kind: PortKind, data: &[u8]) -> TransportResult<usize> {
        self.send_to_host(kind, data, self.config.broadcast_addr)
            .await
    }

    /// Start one receive loop per socket feeding a single channel.
    ///
    /// Loops exit once `running` is cleared (checked at least once a second)
    /// or the receiver is dropped.
    pub fn spawn_receivers(
        &self,
        running: Arc<AtomicBool>,
    ) -> (mpsc::Receiver<Datagram>, Vec<JoinHandle<()>>) {
        let (tx, rx) = mpsc::channel(INBOUND_QUEUE);
        let mut handles = Vec::new();
        for kind in PortKind::ALL {
            let endpoint = &self.endpoints[kind.index()];
            let sockets = std::iter::once(&endpoint.unicast).chain(endpoint.broadcast.as_ref());
            for socket in sockets {
                handles.push(tokio::spawn(receive_loop(
                    kind,
                    socket.clone(),
                    self.config.subnet,
                    tx.clone(),
                    running.clone(),
                )));
            }
        }
        (rx, handles)
    }

    /// Combined statistics of the sockets behind `kind`
    pub fn stats(&self, kind: PortKind) -> TransportStats {
        let endpoint = &self.endpoints[kind.index()];
        let unicast = endpoint.unicast.stats();
        match &endpoint.broadcast {
            Some(b) => unicast.merged(&b.stats()),
            None => unicast,
        }
    }

    /// Close every socket
    pub async fn close(&self) {
        for endpoint in &self.endpoints {
            let _ = endpoint.unicast.close().await;
            if let Some(b) = &endpoint.broadcast {
                let _ = b.close().await;
            }
        }
    }
}

async fn bind_broadcast(addr: Ipv4Addr, port: u16) -> TransportResult<AsyncUdpTransport> {
    match AsyncUdpTransport::bind_with(SocketAddr::from((addr, port)), SocketOptions::default())
        .await
    {
        Ok(t) => Ok(t),
        Err(TransportError::BindFailed { reason, .. }) => {
            tracing::warn!(
                "Cannot bind broadcast address {}:{} ({}); using wildcard",
                addr,
                port,
                reason
            );
            AsyncUdpTransport::bind_with(
                SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
                SocketOptions::default(),
            )
            .await
        }
        Err(e) => Err(e),
    }
}

async fn receive_loop(
    kind: PortKind,
    transport: AsyncUdpTransport,
    subnet: Subnet,
    tx: mpsc::Sender<Datagram>,
    running: Arc<AtomicBool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    while running.load(Ordering::Acquire) {
        match tokio::time::timeout(RECV_POLL, transport.recv_from(&mut buf)).await {
            Ok(Ok((size, SocketAddr::V4(from)))) => {
                if !subnet.contains(*from.ip()) {
                    transport.record_filtered();
                    tracing::trace!("Dropping {:?} datagram from {} outside {}", kind, from, subnet);
                    continue;
                }
                let datagram = Datagram {
                    port: kind,
                    from,
                    data: buf[..size].to_vec(),
                };
                if tx.send(datagram).await.is_err() {
                    break;
                }
            }
            Ok(Ok((_, from))) => {
                tracing::trace!("Ignoring non-IPv4 datagram from {}", from);
            }
            Ok(Err(TransportError::Closed)) => break,
            Ok(Err(e)) => {
                tracing::warn!("Error receiving on {:?} endpoint: {}", kind, e);
            }
            Err(_) => continue,
        }
    }
    tracing::trace!("{:?} receive loop exiting", kind);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU16;

    static NEXT_PORT: AtomicU16 = AtomicU16::new(46100);

    fn ports() -> PortSet {
        let base = NEXT_PORT.fetch_add(3, Ordering::SeqCst);
        PortSet {
            discovery: base,
            secure: base + 1,
            data: base + 2,
        }
    }

    fn config(host: [u8; 4], peer: [u8; 4], ports: PortSet) -> EndpointConfig {
        EndpointConfig {
            host_addr: Ipv4Addr::from(host),
            broadcast_addr: Ipv4Addr::from(peer),
            subnet: Subnet::new(Ipv4Addr::LOCALHOST, 8),
            ports,
            bind_broadcast: false,
            ephemeral_unicast: false,
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_peer() {
        let ports = ports();
        let a = EndpointSet::bind(config([127, 0, 0, 1], [127, 0, 0, 2], ports))
            .await
            .unwrap();
        let b = EndpointSet::bind(config([127, 0, 0, 2], [127, 0, 0, 1], ports))
            .await
            .unwrap();

        let running = Arc::new(AtomicBool::new(true));
        let (mut rx, handles) = b.spawn_receivers(running.clone());
        assert_eq!(handles.len(), 3);

        a.broadcast(PortKind::Discovery, &[1, 0, 5, 0]).await.unwrap();
        let got = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.port, PortKind::Discovery);
        assert_eq!(*got.from.ip(), Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(got.data, vec![1, 0, 5, 0]);

        running.store(false, Ordering::Release);
        for h in handles {
            let _ = h.await;
        }
        assert_eq!(a.stats(PortKind::Discovery).packets_sent, 1);
    }

    #[tokio::test]
    async fn test_subnet_filter_drops() {
        let ports = ports();
        let mut cfg = config([127, 0, 0, 3], [127, 0, 0, 4], ports);
        cfg.subnet = Subnet::new(Ipv4Addr::new(127, 0, 0, 3), 32);
        let receiver = EndpointSet::bind(cfg).await.unwrap();
        let sender = EndpointSet::bind(config([127, 0, 0, 4], [127, 0, 0, 3], ports))
            .await
            .unwrap();

        let running = Arc::new(AtomicBool::new(true));
        let (mut rx, _handles) = receiver.spawn_receivers(running.clone());

        sender.broadcast(PortKind::Data, b"F\0\0\0").await.unwrap();
        let got = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await;
        assert!(got.is_err());
        assert_eq!(receiver.stats(PortKind::Data).filtered, 1);
        running.store(false, Ordering::Release);
    }

    #[tokio::test]
    async fn test_ephemeral_unicast() {
        let ports = ports();
        let mut cfg = config([127, 0, 0, 5], [127, 0, 0, 6], ports);
        cfg.ephemeral_unicast = true;
        let set = EndpointSet::bind(cfg).await.unwrap();
        let addr = set.local_addr(PortKind::Data).unwrap();
        assert_ne!(addr.port(), ports.data);
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn test_port_lookup() {
        let p = PortSet::default();
        assert_eq!(p.port(PortKind::Discovery), 32770);
        assert_eq!(p.port(PortKind::Secure), 32771);
        assert_eq!(p.port(PortKind::Data), 49171);
    }
}
