//! Discovery actors
//!
//! Hello and heartbeat broadcasts, one advert loop per local share and
//! printer, the housekeeping tick (peer sweeps, directory watches, lock
//! collection) and handling of inbound discovery and secure-share datagrams.

use crate::node::node::{AdvertKey, Peer, wait_while};
use sharefs_discovery::{
    Class, DiscoveryMessage, Phase, RegistryEvent, SecureReply, SecureRequest, ShareAdvert,
};
use sharefs_transport::PortKind;
use sharefs_wire::{Command, FrameBuilder};
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Sub-code of the directory-changed notification
const UPDATE_DIRECTORY: u32 = 0x13;

impl Peer {
    fn presence(&self, phase: Phase) -> DiscoveryMessage {
        DiscoveryMessage::Peer {
            phase,
            host: self.inner.host.clone(),
        }
    }

    /// Ask for shares and peers, then announce this peer
    pub(crate) async fn send_hello(&self) {
        self.broadcast_discovery(&DiscoveryMessage::Query(Class::Share))
            .await;
        self.broadcast_discovery(&DiscoveryMessage::Query(Class::Peer))
            .await;
        self.broadcast_discovery(&self.presence(Phase::Available))
            .await;
    }

    /// Broadcast a peer heartbeat every heartbeat interval
    pub(crate) async fn heartbeat_loop(self) {
        let interval = self.inner.config.timings.heartbeat_interval;
        while wait_while(&self.inner.running, interval).await {
            self.broadcast_discovery(&self.presence(Phase::Heartbeat))
                .await;
        }
        tracing::debug!("Heartbeat loop stopped");
    }

    /// Broadcast `available` once, then `heartbeat` every `interval` until
    /// `active` or the peer stops
    pub(crate) async fn advert_loop(
        self,
        available: Vec<u8>,
        heartbeat: Vec<u8>,
        interval: Duration,
        active: Arc<AtomicBool>,
    ) {
        self.broadcast_raw(PortKind::Discovery, &available).await;
        loop {
            let mut left = interval;
            while !left.is_zero() {
                if !active.load(Ordering::Acquire) || !self.is_running() {
                    return;
                }
                let slice = left.min(Duration::from_secs(1));
                tokio::time::sleep(slice).await;
                left -= slice;
            }
            if !active.load(Ordering::Acquire) {
                return;
            }
            self.broadcast_raw(PortKind::Discovery, &heartbeat).await;
        }
    }

    /// Sweep lapsed peers, poll directory watches and collect idle
    /// transfer locks
    pub(crate) async fn housekeeping_loop(self) {
        let timings = self.inner.config.timings.clone();
        let mut last_gc = Instant::now();
        while wait_while(&self.inner.running, timings.watch_interval).await {
            let report = self.inner.registry.sweep(Instant::now());
            for peer in &report.peers {
                self.inner.manager.release_user(peer.addr);
            }

            for dir_handle in self.inner.manager.poll_watches() {
                tracing::debug!("Directory {:#010x} changed", dir_handle);
                let frame = FrameBuilder::new(Command::Updated, 0)
                    .words(&[UPDATE_DIRECTORY, dir_handle])
                    .build();
                self.broadcast_raw(PortKind::Data, &frame).await;
            }

            if last_gc.elapsed() >= timings.transfer_gc_interval {
                last_gc = Instant::now();
                let removed = self.inner.transfers.gc();
                let mut requests = self.inner.requests.lock();
                while requests.try_join_next().is_some() {}
                tracing::trace!(
                    "Collected {} transfer locks, {} requests in flight",
                    removed,
                    requests.len()
                );
            }
        }
        tracing::debug!("Housekeeping loop stopped");
    }

    /// Apply a datagram from the discovery port
    pub(crate) async fn handle_discovery(&self, from: SocketAddrV4, data: &[u8]) {
        let msg = match DiscoveryMessage::decode(data) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::trace!("Ignoring discovery datagram from {}: {}", from, e);
                return;
            }
        };
        match self.inner.registry.apply(&msg, *from.ip(), Instant::now()) {
            RegistryEvent::Query(class) => self.answer_query(class).await,
            RegistryEvent::PeerWithdrawn(peer) => {
                tracing::info!("Peer {} ({}) withdrew", peer.hostname, peer.addr);
                self.inner.manager.release_user(peer.addr);
            }
            RegistryEvent::PeerJoined(peer) => {
                tracing::debug!("Peer {} ({}) joined", peer.hostname, peer.addr);
            }
            RegistryEvent::SelfBroadcast | RegistryEvent::Unknown => {}
            event => tracing::trace!("Discovery from {}: {:?}", from, event),
        }
    }

    async fn answer_query(&self, class: Class) {
        if !self.inner.config.announce {
            return;
        }
        match class {
            Class::Peer => {
                self.broadcast_discovery(&self.presence(Phase::Available))
                    .await
            }
            Class::Share | Class::Printer => {
                let answers: Vec<Vec<u8>> = self
                    .inner
                    .adverts
                    .iter()
                    .filter(|e| match e.key() {
                        AdvertKey::Share(_) => class == Class::Share,
                        AdvertKey::Printer(_) => class == Class::Printer,
                    })
                    .map(|e| e.value().available.clone())
                    .collect();
                for bytes in answers {
                    self.broadcast_raw(PortKind::Discovery, &bytes).await;
                }
            }
        }
    }

    /// Apply a datagram from the secure-share port: answer lookups for our
    /// keyed shares, record answers to our own lookups
    pub(crate) async fn handle_secure(&self, from: SocketAddrV4, data: &[u8]) {
        if let Ok(request) = SecureRequest::decode(data) {
            if request.key == 0 {
                return;
            }
            for share in self.inner.manager.shares_with_key(request.key) {
                let reply = SecureReply {
                    key: request.key,
                    share: ShareAdvert {
                        name: share.name().to_string(),
                        kind: share.kind().bits(),
                    },
                };
                let bytes = match reply.encode() {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::warn!("Cannot encode secure reply for {}: {}", share.name(), e);
                        continue;
                    }
                };
                tracing::debug!("Revealing secure share {} to {}", share.name(), from);
                if let Err(e) = self
                    .inner
                    .endpoints
                    .send(PortKind::Secure, &bytes, SocketAddr::V4(from))
                    .await
                {
                    tracing::warn!("Secure reply to {} failed: {}", from, e);
                }
            }
            return;
        }

        match SecureReply::decode(data) {
            Ok(reply) => {
                let event = self.inner.registry.insert_secure_share(
                    &reply.share,
                    reply.key,
                    *from.ip(),
                    Instant::now(),
                );
                tracing::trace!("Secure reply from {}: {:?}", from, event);
            }
            Err(e) => tracing::trace!("Ignoring secure datagram from {}: {}", from, e),
        }
    }
}
