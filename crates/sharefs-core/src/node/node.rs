//! Peer implementation - the protocol orchestrator
//!
//! A [`Peer`] owns every table the engine needs: the endpoint set, the
//! discovery registry, the share manager, the pending-reply inbox and the
//! transfer locks. Actors (router, heartbeat, adverts, housekeeping) and
//! request tasks each hold a clone of the peer.
//!
//! # Example
//!
//! ```no_run
//! use sharefs_core::node::{Peer, PeerConfig};
//! use sharefs_files::{ShareConfig, StaticMimeMap};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let peer = Peer::start(PeerConfig::default(), Arc::new(StaticMimeMap::default())).await?;
//!     peer.add_share(ShareConfig::new("docs", "/srv/docs")).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     peer.shutdown().await;
//!     Ok(())
//! }
//! ```

use crate::node::client::ShareClient;
use crate::node::config::{PeerConfig, PrinterConfig};
use crate::node::error::{NodeError, Result};
use crate::node::inbox::Inbox;
use crate::node::transfer::{TaskRegistry, TransferLocks};
use dashmap::DashMap;
use parking_lot::Mutex;
use sharefs_discovery::{
    Class, DiscoveryMessage, HostInfo, PeerEntry, Phase, PrinterAdvert, Registry, RemotePrinter,
    RemoteShare, SecureRequest, ShareAdvert,
};
use sharefs_files::{
    BroadcastDelay, FiletypeMapper, Presentation, Share, ShareConfig, ShareError, ShareKind,
    ShareManager,
};
use sharefs_transport::{EndpointSet, PortKind, TransportStats};
use sharefs_wire::{CorrelationIds, WireError, error_frame};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};

/// Longest uninterrupted sleep of a periodic loop
const MAX_SLEEP: Duration = Duration::from_secs(1);

/// Mode of the print-share alias
const PRINT_SHARE_MODE: u32 = 0o666;

/// Which local resource an advert loop announces
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum AdvertKey {
    Share(String),
    Printer(String),
}

/// A running advert loop with its encoded messages
pub(crate) struct Advert {
    active: Arc<AtomicBool>,
    handle: JoinHandle<()>,
    /// Answer to queries
    pub(crate) available: Vec<u8>,
    withdrawn: Vec<u8>,
}

/// Peer inner state
pub(crate) struct PeerInner {
    /// Configuration the peer was started with
    pub(crate) config: PeerConfig,
    /// Identity and name announced in peer broadcasts
    pub(crate) host: HostInfo,
    /// Bound sockets
    pub(crate) endpoints: EndpointSet,
    /// Remote peers, shares and printers
    pub(crate) registry: Registry,
    /// Local shares and open handles
    pub(crate) manager: ShareManager,
    /// Frames awaiting collection
    pub(crate) inbox: Arc<Inbox>,
    /// Correlation ids for outbound requests
    pub(crate) ids: CorrelationIds,
    /// Per-path transfer serialization
    pub(crate) transfers: TransferLocks,
    /// Transfer tasks in flight
    pub(crate) tasks: Arc<TaskRegistry>,
    /// Local printers
    pub(crate) printers: DashMap<String, PrinterConfig>,
    /// Advert loops (keyed by lowercase name)
    pub(crate) adverts: DashMap<AdvertKey, Advert>,
    /// Cleared on shutdown
    pub(crate) running: Arc<AtomicBool>,
    /// Long-lived loops
    pub(crate) actors: Mutex<Vec<JoinHandle<()>>>,
    /// Request handler tasks
    pub(crate) requests: Mutex<JoinSet<()>>,
}

/// A ShareFS peer: server for local shares and client of remote ones
#[derive(Clone)]
pub struct Peer {
    pub(crate) inner: Arc<PeerInner>,
}

/// Name of the hidden share print jobs are sent to, derived from the host
/// address read as a big-endian integer
pub fn print_share_name(host: Ipv4Addr) -> String {
    format!("_S{:08X}", u32::from(host))
}

/// Sleep for `interval` in slices of at most a second while `running` stays
/// set. Returns whether it is still set.
pub(crate) async fn wait_while(running: &AtomicBool, interval: Duration) -> bool {
    let mut left = interval;
    while running.load(Ordering::Acquire) {
        if left.is_zero() {
            return true;
        }
        let slice = left.min(MAX_SLEEP);
        tokio::time::sleep(slice).await;
        left -= slice;
    }
    false
}

// ═══════════════════════════════════════════════════════════════════════════
// Lifecycle Methods
// ═══════════════════════════════════════════════════════════════════════════

impl Peer {
    /// Bind the endpoints and start every actor.
    ///
    /// Shares and printers from the configuration are added afterwards; a
    /// record that fails validation is logged and skipped.
    ///
    /// # Errors
    /// Invalid configuration or sockets that cannot be bound
    pub async fn start(config: PeerConfig, mapper: Arc<dyn FiletypeMapper>) -> Result<Self> {
        config.validate()?;
        let endpoints = EndpointSet::bind(config.endpoint_config()).await?;
        let host = HostInfo {
            identity: rand::random(),
            hostname: config.hostname.clone(),
        };
        let registry = Registry::new(config.network.host_addr, config.timings.peer_ttl);
        let running = Arc::new(AtomicBool::new(true));
        let (rx, receivers) = endpoints.spawn_receivers(running.clone());

        let peer = Self {
            inner: Arc::new(PeerInner {
                config,
                host,
                endpoints,
                registry,
                manager: ShareManager::new(mapper),
                inbox: Inbox::new(),
                ids: CorrelationIds::new(),
                transfers: TransferLocks::new(),
                tasks: TaskRegistry::new(),
                printers: DashMap::new(),
                adverts: DashMap::new(),
                running,
                actors: Mutex::new(receivers),
                requests: Mutex::new(JoinSet::new()),
            }),
        };

        tracing::info!(
            "Starting peer {} ({}) on {}",
            peer.hostname(),
            hex::encode(peer.identity()),
            peer.host_addr()
        );

        let router = peer.clone();
        peer.spawn_actor(async move { router.router_loop(rx).await });

        if peer.inner.config.announce {
            peer.send_hello().await;
            let heartbeat = peer.clone();
            peer.spawn_actor(async move { heartbeat.heartbeat_loop().await });
        }
        let housekeeping = peer.clone();
        peer.spawn_actor(async move { housekeeping.housekeeping_loop().await });

        for share in peer.inner.config.shares.clone() {
            let name = share.name.clone();
            if let Err(e) = peer.add_share(share).await {
                tracing::warn!("Skipping share {}: {}", name, e);
            }
        }
        for printer in peer.inner.config.printers.clone() {
            let name = printer.name.clone();
            if let Err(e) = peer.add_printer(printer).await {
                tracing::warn!("Skipping printer {}: {}", name, e);
            }
        }

        Ok(peer)
    }

    /// Withdraw everything this peer announced, cancel every task and wait
    /// for all of them. A second call does nothing.
    pub async fn shutdown(&self) {
        if self
            .inner
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        tracing::info!("Stopping peer {}", self.hostname());

        let keys: Vec<AdvertKey> = self.inner.adverts.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.stop_advert(&key).await;
        }
        if self.inner.config.announce {
            self.broadcast_discovery(&DiscoveryMessage::Peer {
                phase: Phase::Withdrawn,
                host: self.inner.host.clone(),
            })
            .await;
        }

        self.inner.tasks.cancel_all();

        let actors = std::mem::take(&mut *self.inner.actors.lock());
        for actor in actors {
            if let Err(e) = actor.await {
                tracing::warn!("Actor ended abnormally: {}", e);
            }
        }
        let mut requests = std::mem::take(&mut *self.inner.requests.lock());
        while requests.join_next().await.is_some() {}

        let released = self.inner.manager.release_all();
        if released > 0 {
            tracing::debug!("Closed {} handles at shutdown", released);
        }
        self.inner.endpoints.close().await;
        tracing::info!("Peer {} stopped", self.hostname());
    }

    /// Whether the peer is running
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub(crate) fn spawn_actor<F>(&self, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.inner.actors.lock().push(tokio::spawn(fut));
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Accessors
// ═══════════════════════════════════════════════════════════════════════════

impl Peer {
    /// This host's address
    pub fn host_addr(&self) -> Ipv4Addr {
        self.inner.endpoints.host_addr()
    }

    /// Announced host name
    pub fn hostname(&self) -> &str {
        &self.inner.host.hostname
    }

    /// Random identity drawn at startup
    pub fn identity(&self) -> [u8; 4] {
        self.inner.host.identity
    }

    /// Configuration the peer was started with
    pub fn config(&self) -> &PeerConfig {
        &self.inner.config
    }

    /// Local address of the unicast socket for `kind`
    ///
    /// # Errors
    /// Returns `NodeError::Transport` if the address cannot be determined
    pub fn local_addr(&self, kind: PortKind) -> Result<SocketAddr> {
        Ok(self.inner.endpoints.local_addr(kind)?)
    }

    /// Socket statistics for `kind`
    pub fn stats(&self, kind: PortKind) -> TransportStats {
        self.inner.endpoints.stats(kind)
    }

    /// The share manager
    pub fn manager(&self) -> &ShareManager {
        &self.inner.manager
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Local Shares and Printers
// ═══════════════════════════════════════════════════════════════════════════

impl Peer {
    /// Local shares, sorted by name
    pub fn shares(&self) -> Vec<Arc<Share>> {
        self.inner.manager.shares()
    }

    /// Serve a new share and start advertising it unless it is secure or
    /// its delay is off
    ///
    /// # Errors
    /// Invalid records and duplicate names
    pub async fn add_share(&self, config: ShareConfig) -> Result<Arc<Share>> {
        let share = self.inner.manager.add_share(config)?;
        tracing::info!(
            "Sharing {} from {} ({})",
            share.name(),
            share.root().display(),
            share.kind()
        );
        if !share.is_secure() {
            if let Some(interval) = self.advert_interval(share.delay()) {
                let advert = ShareAdvert {
                    name: share.name().to_string(),
                    kind: share.kind().bits(),
                };
                let message = |phase| DiscoveryMessage::Share {
                    phase,
                    share: advert.clone(),
                };
                if let Err(e) = self.start_advert(
                    AdvertKey::Share(share.key_name().to_string()),
                    [message(Phase::Available), message(Phase::Heartbeat), message(Phase::Withdrawn)],
                    interval,
                ) {
                    self.inner.manager.remove_share(share.name());
                    return Err(e);
                }
            }
        }
        Ok(share)
    }

    /// Stop serving a share. Open handles stay valid until closed.
    ///
    /// # Errors
    /// Returns `ShareError::ShareUnavailable` for an unknown share
    pub async fn remove_share(&self, name: &str) -> Result<()> {
        let share = self
            .inner
            .manager
            .remove_share(name)
            .ok_or_else(|| ShareError::ShareUnavailable(name.to_string()))?;
        self.stop_advert(&AdvertKey::Share(share.key_name().to_string()))
            .await;
        tracing::info!("Share {} removed", share.name());
        Ok(())
    }

    /// Accept print jobs for a printer. The print-share alias is created on
    /// the first call.
    ///
    /// # Errors
    /// Invalid records and duplicate names
    pub async fn add_printer(&self, config: PrinterConfig) -> Result<()> {
        config.validate()?;
        let key = config.name.to_lowercase();
        if self.inner.printers.contains_key(&key) {
            return Err(NodeError::InvalidConfig(
                format!("printer {} already exists", config.name).into(),
            ));
        }

        let alias = print_share_name(self.host_addr());
        if self.inner.manager.share(&alias).is_none() {
            let mut share = ShareConfig::new(alias.clone(), config.path.clone());
            share.mode_mask = PRINT_SHARE_MODE;
            share.presentation = Presentation::Truncate;
            share.kind = ShareKind::HIDDEN;
            share.delay = BroadcastDelay::Off;
            share.default_filetype = config.filetype;
            share.spool = true;
            self.inner.manager.add_share(share)?;
            tracing::debug!("Created print share {}", alias);
        }

        if let Some(interval) = self.advert_interval(config.delay) {
            let advert = PrinterAdvert {
                name: config.name.clone(),
                description: config.description.clone(),
            };
            let message = |phase| DiscoveryMessage::Printer {
                phase,
                printer: advert.clone(),
            };
            self.start_advert(
                AdvertKey::Printer(key.clone()),
                [message(Phase::Available), message(Phase::Heartbeat), message(Phase::Withdrawn)],
                interval,
            )?;
        }
        tracing::info!("Printer {} spooling into {}", config.name, config.path.display());
        self.inner.printers.insert(key, config);
        Ok(())
    }

    /// Stop accepting jobs for a printer. The print share goes with the
    /// last printer.
    ///
    /// # Errors
    /// Returns `NodeError::InvalidConfig` for an unknown printer
    pub async fn remove_printer(&self, name: &str) -> Result<()> {
        let key = name.to_lowercase();
        if self.inner.printers.remove(&key).is_none() {
            return Err(NodeError::InvalidConfig(format!("no printer named {}", name).into()));
        }
        self.stop_advert(&AdvertKey::Printer(key)).await;
        if self.inner.printers.is_empty() {
            self.inner.manager.remove_share(&print_share_name(self.host_addr()));
        }
        tracing::info!("Printer {} removed", name);
        Ok(())
    }

    /// Local printers, sorted by name
    pub fn printers(&self) -> Vec<PrinterConfig> {
        let mut v: Vec<_> = self.inner.printers.iter().map(|e| e.value().clone()).collect();
        v.sort_by(|a, b| a.name.cmp(&b.name));
        v
    }

    fn advert_interval(&self, delay: BroadcastDelay) -> Option<Duration> {
        if !self.inner.config.announce {
            return None;
        }
        self.inner.config.advert_interval(delay)
    }

    /// Start an advert loop from `[available, heartbeat, withdrawn]`
    fn start_advert(
        &self,
        key: AdvertKey,
        messages: [DiscoveryMessage; 3],
        interval: Duration,
    ) -> Result<()> {
        let [available, heartbeat, withdrawn] = messages;
        let available = available.encode()?;
        let heartbeat = heartbeat.encode()?;
        let withdrawn = withdrawn.encode()?;

        let active = Arc::new(AtomicBool::new(true));
        let peer = self.clone();
        let flag = active.clone();
        let first = available.clone();
        let handle = tokio::spawn(async move {
            peer.advert_loop(first, heartbeat, interval, flag).await;
        });
        if let Some(old) = self.inner.adverts.insert(
            key,
            Advert {
                active,
                handle,
                available,
                withdrawn,
            },
        ) {
            old.active.store(false, Ordering::Release);
            old.handle.abort();
        }
        Ok(())
    }

    /// Stop an advert loop and broadcast its withdrawal
    async fn stop_advert(&self, key: &AdvertKey) {
        let Some((_, advert)) = self.inner.adverts.remove(key) else {
            return;
        };
        advert.active.store(false, Ordering::Release);
        if let Err(e) = advert.handle.await {
            tracing::warn!("Advert loop for {:?} ended abnormally: {}", key, e);
        }
        self.broadcast_raw(PortKind::Discovery, &advert.withdrawn).await;
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Remote Peers and Shares
// ═══════════════════════════════════════════════════════════════════════════

impl Peer {
    /// Known remote peers
    pub fn remote_peers(&self) -> Vec<PeerEntry> {
        self.inner.registry.peers()
    }

    /// Known remote shares
    pub fn remote_shares(&self) -> Vec<RemoteShare> {
        self.inner.registry.shares()
    }

    /// Known remote printers
    pub fn remote_printers(&self) -> Vec<RemotePrinter> {
        self.inner.registry.printers()
    }

    /// Ask every listener to announce its peers and shares
    pub async fn query(&self) {
        self.broadcast_discovery(&DiscoveryMessage::Query(Class::Share))
            .await;
        self.broadcast_discovery(&DiscoveryMessage::Query(Class::Peer))
            .await;
    }

    /// Broadcast a secure-share lookup for `key` and collect the replies
    /// that arrive within one reply timeout
    ///
    /// # Errors
    /// Returns `NodeError::Transport` if the lookup cannot be sent
    pub async fn find_secure_shares(&self, key: u32) -> Result<Vec<RemoteShare>> {
        let request = SecureRequest { key }.encode();
        self.inner
            .endpoints
            .broadcast(PortKind::Secure, &request)
            .await?;
        tokio::time::sleep(self.inner.config.timings.reply_timeout).await;
        Ok(self
            .inner
            .registry
            .shares()
            .into_iter()
            .filter(|s| s.key == key)
            .collect())
    }

    /// Client for the shares of `host`
    pub fn client(&self, host: Ipv4Addr) -> ShareClient {
        ShareClient::new(self.clone(), host)
    }

    /// Client for the host offering share `name`
    ///
    /// # Errors
    /// Returns `NodeError::ShareNotFound` if no known host offers it
    pub fn client_for_share(&self, name: &str) -> Result<ShareClient> {
        let host = self
            .inner
            .registry
            .find_share(name)
            .first()
            .map(|s| s.host)
            .ok_or_else(|| NodeError::ShareNotFound(name.to_string()))?;
        Ok(self.client(host))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Sending
// ═══════════════════════════════════════════════════════════════════════════

impl Peer {
    /// Send a frame from the data port, logging failures
    pub(crate) async fn send_frame(&self, to: SocketAddrV4, frame: &[u8]) {
        if let Err(e) = self
            .inner
            .endpoints
            .send(PortKind::Data, frame, SocketAddr::V4(to))
            .await
        {
            tracing::warn!("Send to {} failed: {}", to, e);
        }
    }

    /// Send an `E` packet
    pub(crate) async fn send_error(&self, to: SocketAddrV4, id: u32, err: &WireError) {
        self.send_frame(to, &error_frame(id, err)).await;
    }

    /// Broadcast raw bytes on `kind`, logging failures
    pub(crate) async fn broadcast_raw(&self, kind: PortKind, data: &[u8]) {
        if let Err(e) = self.inner.endpoints.broadcast(kind, data).await {
            tracing::warn!("Broadcast on {:?} failed: {}", kind, e);
        }
    }

    /// Encode and broadcast a discovery message
    pub(crate) async fn broadcast_discovery(&self, msg: &DiscoveryMessage) {
        match msg.encode() {
            Ok(bytes) => self.broadcast_raw(PortKind::Discovery, &bytes).await,
            Err(e) => tracing::warn!("Cannot encode {:?}: {}", msg, e),
        }
    }
}
