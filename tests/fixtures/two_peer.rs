//! Two-peer test fixture
//!
//! A serving peer and a browsing peer on distinct loopback addresses that
//! use the same port triple. Each peer's broadcast address is the other
//! peer's host address, so adverts and queries cross over without a real
//! broadcast domain.
//!
//! # Example
//!
//! ```no_run
//! use sharefs_integration_tests::fixtures::TwoPeerFixture;
//! use sharefs_files::Presentation;
//!
//! #[tokio::test]
//! async fn test_listing() {
//!     let fixture = TwoPeerFixture::new().await.unwrap();
//!     fixture.add_share(Presentation::Suffix).await.unwrap();
//!
//!     let entries = fixture.share_client().catalogue("docs").await.unwrap();
//!     assert!(entries.is_empty());
//!
//!     fixture.cleanup().await;
//! }
//! ```

use sharefs_core::{Peer, PeerConfig, ShareClient};
use sharefs_files::{Presentation, Share, ShareConfig, StaticMimeMap};
use sharefs_transport::PortSet;
use sharefs_wire::Frame;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::net::UdpSocket;

/// Global port allocator for concurrent test execution
static NEXT_PORT: AtomicU16 = AtomicU16::new(47000);

/// Host of the serving peer
pub const SERVER_HOST: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 2);

/// Host of the browsing peer
pub const CLIENT_HOST: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 3);

/// Host raw wire clients bind to
pub const RAW_HOST: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 4);

/// Name of the fixture share
pub const SHARE: &str = "docs";

/// Allocate a unique port triple for a test
pub fn allocate_ports() -> PortSet {
    let base = NEXT_PORT.fetch_add(3, Ordering::SeqCst);
    PortSet {
        discovery: base,
        secure: base + 1,
        data: base + 2,
    }
}

/// Configuration for a peer on `host` whose broadcasts reach `broadcast_to`
pub fn loopback_config(host: Ipv4Addr, broadcast_to: Ipv4Addr, ports: PortSet) -> PeerConfig {
    let mut config = PeerConfig::default();
    config.hostname = format!("peer{}", host.octets()[3]);
    config.network.host_addr = host;
    config.network.broadcast_addr = broadcast_to;
    config.network.bind_broadcast = false;
    config.ports = ports;
    config.timings.heartbeat_interval = Duration::from_secs(1);
    config.timings.watch_interval = Duration::from_millis(200);
    config.timings.reply_timeout = Duration::from_millis(300);
    config
}

/// Poll `cond` until it holds or `timeout` passes
pub async fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    cond()
}

/// A serving peer and a browsing peer
pub struct TwoPeerFixture {
    /// Peer that owns the shares
    pub server: Peer,
    /// Peer that browses them
    pub client: Peer,
    /// Port triple both peers use
    pub ports: PortSet,
    root: TempDir,
}

impl TwoPeerFixture {
    /// Start both peers with fixture defaults
    ///
    /// # Errors
    ///
    /// Returns an error if either peer cannot bind its sockets.
    pub async fn new() -> sharefs_core::Result<Self> {
        Self::with_configs(|_| {}, |_| {}).await
    }

    /// Start both peers, letting the caller adjust each configuration
    ///
    /// # Errors
    ///
    /// Returns an error if either peer cannot bind its sockets.
    pub async fn with_configs(
        server_tweak: impl FnOnce(&mut PeerConfig),
        client_tweak: impl FnOnce(&mut PeerConfig),
    ) -> sharefs_core::Result<Self> {
        let ports = allocate_ports();
        let root = tempfile::tempdir()?;

        let mut server_config = loopback_config(SERVER_HOST, CLIENT_HOST, ports);
        server_tweak(&mut server_config);
        let mut client_config = loopback_config(CLIENT_HOST, SERVER_HOST, ports);
        client_tweak(&mut client_config);

        let server = Peer::start(server_config, Arc::new(StaticMimeMap::default())).await?;
        let client = Peer::start(client_config, Arc::new(StaticMimeMap::default())).await?;

        Ok(Self {
            server,
            client,
            ports,
            root,
        })
    }

    /// Directory behind the fixture share
    pub fn share_dir(&self) -> PathBuf {
        self.root.path().join(SHARE)
    }

    /// Add the `docs` share to the server
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or share cannot be created.
    pub async fn add_share(&self, presentation: Presentation) -> sharefs_core::Result<Arc<Share>> {
        self.add_share_masked(presentation, 0o777).await
    }

    /// Add the `docs` share to the server with `mode_mask` applied
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or share cannot be created.
    pub async fn add_share_masked(
        &self,
        presentation: Presentation,
        mode_mask: u32,
    ) -> sharefs_core::Result<Arc<Share>> {
        let dir = self.share_dir();
        std::fs::create_dir_all(&dir)?;
        let mut config = ShareConfig::new(SHARE, dir);
        config.presentation = presentation;
        config.mode_mask = mode_mask;
        self.server.add_share(config).await
    }

    /// Client for the server's shares
    pub fn share_client(&self) -> ShareClient {
        self.client.client(SERVER_HOST)
    }

    /// Address of the server's data port
    pub fn server_data_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(SERVER_HOST, self.ports.data)
    }

    /// A raw wire client talking to the server's data port
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound.
    pub async fn raw(&self) -> std::io::Result<RawClient> {
        RawClient::bind(self.server_data_addr()).await
    }

    /// Stop both peers
    pub async fn cleanup(self) {
        self.client.shutdown().await;
        self.server.shutdown().await;
    }
}

/// A bare UDP socket speaking the data protocol by hand
pub struct RawClient {
    socket: UdpSocket,
    server: SocketAddr,
}

impl RawClient {
    /// Bind an ephemeral port on [`RAW_HOST`]
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound.
    pub async fn bind(server: SocketAddrV4) -> std::io::Result<Self> {
        Self::bind_from(RAW_HOST, server).await
    }

    /// Bind an ephemeral port on `host`, so the server sees a distinct peer
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound.
    pub async fn bind_from(host: Ipv4Addr, server: SocketAddrV4) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(SocketAddrV4::new(host, 0)).await?;
        Ok(Self {
            socket,
            server: SocketAddr::V4(server),
        })
    }

    /// Send a frame to the server
    pub async fn send(&self, frame: &[u8]) {
        self.socket
            .send_to(frame, self.server)
            .await
            .expect("send to server");
    }

    /// Next datagram, or `None` after `timeout`
    pub async fn recv(&self, timeout: Duration) -> Option<Vec<u8>> {
        let mut buf = vec![0u8; 65536];
        match tokio::time::timeout(timeout, self.socket.recv_from(&mut buf)).await {
            Ok(Ok((n, _))) => {
                buf.truncate(n);
                Some(buf)
            }
            _ => None,
        }
    }

    /// Next datagram carrying correlation id `id`
    pub async fn recv_id(&self, id: u32, timeout: Duration) -> Option<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            let data = self.recv(left).await?;
            if matches!(Frame::parse(&data), Ok(f) if f.id() == id) {
                return Some(data);
            }
        }
    }

    /// Send `frame` and wait for the first datagram with the same id
    pub async fn call(&self, frame: &[u8]) -> Vec<u8> {
        let id = Frame::parse(frame).expect("valid request").id();
        self.send(frame).await;
        self.recv_id(id, Duration::from_secs(3))
            .await
            .expect("reply from server")
    }
}
