//! Async UDP transport implementation.

use crate::SEND_ATTEMPTS;
use crate::transport::{Transport, TransportError, TransportResult, TransportStats};
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::UdpSocket;

/// How long one send attempt waits for buffer space
const WRITABLE_WAIT: Duration = Duration::from_millis(20);

/// Socket options applied before binding
#[derive(Debug, Clone, Copy)]
pub struct SocketOptions {
    /// Set `SO_BROADCAST`
    pub broadcast: bool,
    /// Set `SO_REUSEADDR` so the unicast and broadcast binds can share a port
    pub reuse_addr: bool,
    /// Receive buffer size in bytes
    pub recv_buffer_size: usize,
    /// Send buffer size in bytes
    pub send_buffer_size: usize,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            broadcast: true,
            reuse_addr: true,
            recv_buffer_size: 256 * 1024,
            send_buffer_size: 256 * 1024,
        }
    }
}

/// Async UDP transport using Tokio.
#[derive(Clone)]
pub struct AsyncUdpTransport {
    socket: Arc<UdpSocket>,
    closed: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    send_errors: AtomicU64,
    recv_errors: AtomicU64,
    filtered: AtomicU64,
}

impl AsyncUdpTransport {
    /// Bind with default options (`SO_BROADCAST` and `SO_REUSEADDR` set).
    ///
    /// # Errors
    /// Returns `TransportError::BindFailed` if the socket cannot be created or bound
    pub async fn bind<A: Into<SocketAddr>>(addr: A) -> TransportResult<Self> {
        Self::bind_with(addr, SocketOptions::default()).await
    }

    /// Bind with explicit socket options.
    ///
    /// # Errors
    /// Returns `TransportError::BindFailed` if the socket cannot be created or bound
    pub async fn bind_with<A: Into<SocketAddr>>(
        addr: A,
        options: SocketOptions,
    ) -> TransportResult<Self> {
        let addr = addr.into();
        let fail = |e: io::Error| TransportError::BindFailed {
            addr,
            reason: e.to_string(),
        };

        let domain = if addr.is_ipv4() {
            socket2::Domain::IPV4
        } else {
            socket2::Domain::IPV6
        };

        let socket2 =
            socket2::Socket::new(domain, socket2::Type::DGRAM, Some(socket2::Protocol::UDP))
                .map_err(fail)?;

        if options.reuse_addr {
            socket2.set_reuse_address(true).map_err(fail)?;
        }
        if options.broadcast {
            socket2.set_broadcast(true).map_err(fail)?;
        }
        socket2
            .set_recv_buffer_size(options.recv_buffer_size)
            .map_err(fail)?;
        socket2
            .set_send_buffer_size(options.send_buffer_size)
            .map_err(fail)?;

        socket2.bind(&addr.into()).map_err(fail)?;

        socket2.set_nonblocking(true).map_err(fail)?;
        let std_socket: std::net::UdpSocket = socket2.into();
        let socket = UdpSocket::from_std(std_socket).map_err(fail)?;

        Ok(Self::from_socket(socket))
    }

    /// Wrap an already-bound Tokio socket
    #[must_use]
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self {
            socket: Arc::new(socket),
            closed: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Count a datagram discarded by an upstream filter
    pub fn record_filtered(&self) {
        self.counters.filtered.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl Transport for AsyncUdpTransport {
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> TransportResult<usize> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::Closed);
        }

        for attempt in 1..=SEND_ATTEMPTS {
            match self.socket.try_send_to(buf, addr) {
                Ok(sent) => {
                    self.counters
                        .bytes_sent
                        .fetch_add(sent as u64, Ordering::Relaxed);
                    self.counters.packets_sent.fetch_add(1, Ordering::Relaxed);
                    return Ok(sent);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    tracing::trace!("send to {} would block (attempt {})", addr, attempt);
                    let _ = tokio::time::timeout(WRITABLE_WAIT, self.socket.writable()).await;
                }
                Err(e) => {
                    self.counters.send_errors.fetch_add(1, Ordering::Relaxed);
                    return Err(TransportError::Io(e));
                }
            }
        }

        self.counters.send_errors.fetch_add(1, Ordering::Relaxed);
        Err(TransportError::SendDropped(addr))
    }

    async fn recv_from(&self, buf: &mut [u8]) -> TransportResult<(usize, SocketAddr)> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::Closed);
        }

        match self.socket.recv_from(buf).await {
            Ok((size, addr)) => {
                self.counters
                    .bytes_received
                    .fetch_add(size as u64, Ordering::Relaxed);
                self.counters
                    .packets_received
                    .fetch_add(1, Ordering::Relaxed);
                Ok((size, addr))
            }
            Err(e) => {
                self.counters.recv_errors.fetch_add(1, Ordering::Relaxed);
                Err(TransportError::Io(e))
            }
        }
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        self.socket.local_addr().map_err(TransportError::Io)
    }

    async fn close(&self) -> TransportResult<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    fn stats(&self) -> TransportStats {
        let c = &self.counters;
        TransportStats {
            bytes_sent: c.bytes_sent.load(Ordering::Relaxed),
            bytes_received: c.bytes_received.load(Ordering::Relaxed),
            packets_sent: c.packets_sent.load(Ordering::Relaxed),
            packets_received: c.packets_received.load(Ordering::Relaxed),
            send_errors: c.send_errors.load(Ordering::Relaxed),
            recv_errors: c.recv_errors.load(Ordering::Relaxed),
            filtered: c.filtered.load(Ordering::Relaxed),
        }
    }
}
