//! Remote peer, share and printer registries.
//!
//! All three tables are keyed so that repeated adverts are absorbed. Entries
//! carry an expiry; [`Registry::sweep`] drops what has lapsed and reports
//! evicted peers so the caller can release their handles.

use crate::message::{Class, DiscoveryMessage, Phase, PrinterAdvert, ShareAdvert};
use dashmap::DashMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

/// A known remote peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEntry {
    /// Host name
    pub hostname: String,
    /// Address the peer broadcasts from
    pub addr: Ipv4Addr,
    /// Identity from its last message
    pub identity: [u8; 4],
    /// When the entry lapses without a heartbeat
    pub expires: Instant,
}

/// A share offered by another peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteShare {
    /// Share name as advertised
    pub name: String,
    /// Owning host
    pub host: Ipv4Addr,
    /// Share-kind bits
    pub kind: u8,
    /// Key that revealed it; 0 for public shares
    pub key: u32,
    /// When the entry lapses without a refresh
    pub expires: Instant,
}

/// A printer offered by another peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePrinter {
    /// Printer name
    pub name: String,
    /// Description
    pub description: String,
    /// Owning host
    pub host: Ipv4Addr,
    /// When the entry lapses without a refresh
    pub expires: Instant,
}

/// What a received message changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// The message came from this host
    SelfBroadcast,
    /// Somebody asked for adverts of a class
    Query(Class),
    /// A previously unknown (or lapsed) peer appeared
    PeerJoined(PeerEntry),
    /// A live peer's expiry was extended
    PeerRefreshed(PeerEntry),
    /// A peer announced its departure
    PeerWithdrawn(PeerEntry),
    /// A share was added to the registry
    ShareAdded(RemoteShare),
    /// A known share was re-advertised
    ShareRefreshed(RemoteShare),
    /// A share was withdrawn
    ShareWithdrawn(RemoteShare),
    /// A printer was added
    PrinterAdded(RemotePrinter),
    /// A known printer was re-advertised
    PrinterRefreshed(RemotePrinter),
    /// A printer was withdrawn
    PrinterWithdrawn(RemotePrinter),
    /// Withdrawal for something never seen
    Unknown,
}

/// Outcome of a sweep
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Peers whose entries lapsed
    pub peers: Vec<PeerEntry>,
    /// Shares removed (lapsed or owned by an evicted peer)
    pub shares: Vec<RemoteShare>,
    /// Printers removed
    pub printers: Vec<RemotePrinter>,
}

/// Discovery state for one local peer
pub struct Registry {
    local: Ipv4Addr,
    ttl: Duration,
    peers: DashMap<(String, Ipv4Addr), PeerEntry>,
    shares: DashMap<(String, Ipv4Addr), RemoteShare>,
    printers: DashMap<(String, Ipv4Addr), RemotePrinter>,
}

impl Registry {
    /// Create a registry for the host at `local`
    pub fn new(local: Ipv4Addr, ttl: Duration) -> Self {
        Self {
            local,
            ttl,
            peers: DashMap::new(),
            shares: DashMap::new(),
            printers: DashMap::new(),
        }
    }

    /// Entry lifetime
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Apply a discovery message received from `from` at `now`
    pub fn apply(&self, msg: &DiscoveryMessage, from: Ipv4Addr, now: Instant) -> RegistryEvent {
        if from == self.local {
            return RegistryEvent::SelfBroadcast;
        }
        match msg {
            DiscoveryMessage::Query(class) => RegistryEvent::Query(*class),
            DiscoveryMessage::Peer { phase, host } => {
                let key = (host.hostname.to_lowercase(), from);
                if *phase == Phase::Withdrawn {
                    return match self.peers.remove(&key) {
                        Some((_, entry)) => {
                            self.forget_host(from);
                            RegistryEvent::PeerWithdrawn(entry)
                        }
                        None => RegistryEvent::Unknown,
                    };
                }
                let expires = now + self.ttl;
                let mut slot = self.peers.entry(key).or_insert_with(|| PeerEntry {
                    hostname: host.hostname.clone(),
                    addr: from,
                    identity: host.identity,
                    expires: now,
                });
                let lapsed = slot.expires <= now;
                slot.identity = host.identity;
                slot.expires = expires;
                let entry = slot.clone();
                drop(slot);
                if lapsed {
                    tracing::info!("Peer {} joined from {}", entry.hostname, from);
                    RegistryEvent::PeerJoined(entry)
                } else {
                    RegistryEvent::PeerRefreshed(entry)
                }
            }
            DiscoveryMessage::Share { phase, share } => self.apply_share(*phase, share, from, 0, now),
            DiscoveryMessage::Printer { phase, printer } => {
                self.apply_printer(*phase, printer, from, now)
            }
        }
    }

    /// Record a share revealed by a secure-share reply
    pub fn insert_secure_share(
        &self,
        share: &ShareAdvert,
        key: u32,
        from: Ipv4Addr,
        now: Instant,
    ) -> RegistryEvent {
        if from == self.local {
            return RegistryEvent::SelfBroadcast;
        }
        self.apply_share(Phase::Available, share, from, key, now)
    }

    fn apply_share(
        &self,
        phase: Phase,
        share: &ShareAdvert,
        from: Ipv4Addr,
        key: u32,
        now: Instant,
    ) -> RegistryEvent {
        let k = (share.name.to_lowercase(), from);
        if phase == Phase::Withdrawn {
            return match self.shares.remove(&k) {
                Some((_, s)) => {
                    tracing::info!("Share {} on {} withdrawn", s.name, from);
                    RegistryEvent::ShareWithdrawn(s)
                }
                None => RegistryEvent::Unknown,
            };
        }
        let expires = now + self.ttl;
        if let Some(mut existing) = self.shares.get_mut(&k) {
            existing.kind = share.kind;
            existing.expires = expires;
            if key != 0 {
                existing.key = key;
            }
            return RegistryEvent::ShareRefreshed(existing.clone());
        }
        let entry = RemoteShare {
            name: share.name.clone(),
            host: from,
            kind: share.kind,
            key,
            expires,
        };
        self.shares.insert(k, entry.clone());
        tracing::info!("Share {} on {} available", entry.name, from);
        RegistryEvent::ShareAdded(entry)
    }

    fn apply_printer(
        &self,
        phase: Phase,
        printer: &PrinterAdvert,
        from: Ipv4Addr,
        now: Instant,
    ) -> RegistryEvent {
        let k = (printer.name.to_lowercase(), from);
        if phase == Phase::Withdrawn {
            return match self.printers.remove(&k) {
                Some((_, p)) => RegistryEvent::PrinterWithdrawn(p),
                None => RegistryEvent::Unknown,
            };
        }
        let expires = now + self.ttl;
        if let Some(mut existing) = self.printers.get_mut(&k) {
            existing.description = printer.description.clone();
            existing.expires = expires;
            return RegistryEvent::PrinterRefreshed(existing.clone());
        }
        let entry = RemotePrinter {
            name: printer.name.clone(),
            description: printer.description.clone(),
            host: from,
            expires,
        };
        self.printers.insert(k, entry.clone());
        RegistryEvent::PrinterAdded(entry)
    }

    /// Drop everything that lapsed before `now`; shares and printers of
    /// evicted peers go with them
    pub fn sweep(&self, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();

        let lapsed: Vec<_> = self
            .peers
            .iter()
            .filter(|e| e.expires <= now)
            .map(|e| e.key().clone())
            .collect();
        for key in lapsed {
            if let Some((_, entry)) = self.peers.remove_if(&key, |_, e| e.expires <= now) {
                tracing::info!("Evicting peer {} ({})", entry.hostname, entry.addr);
                report.peers.push(entry);
            }
        }

        let evicted: Vec<Ipv4Addr> = report.peers.iter().map(|p| p.addr).collect();
        let gone = |host: &Ipv4Addr, expires: Instant| expires <= now || evicted.contains(host);

        self.shares.retain(|_, s| {
            let keep = !gone(&s.host, s.expires);
            if !keep {
                report.shares.push(s.clone());
            }
            keep
        });
        self.printers.retain(|_, p| {
            let keep = !gone(&p.host, p.expires);
            if !keep {
                report.printers.push(p.clone());
            }
            keep
        });

        report
    }

    fn forget_host(&self, host: Ipv4Addr) {
        self.shares.retain(|_, s| s.host != host);
        self.printers.retain(|_, p| p.host != host);
    }

    /// Snapshot of live peers
    pub fn peers(&self) -> Vec<PeerEntry> {
        let mut v: Vec<_> = self.peers.iter().map(|e| e.value().clone()).collect();
        v.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        v
    }

    /// Snapshot of known remote shares
    pub fn shares(&self) -> Vec<RemoteShare> {
        let mut v: Vec<_> = self.shares.iter().map(|e| e.value().clone()).collect();
        v.sort_by(|a, b| a.name.cmp(&b.name).then(a.host.cmp(&b.host)));
        v
    }

    /// Snapshot of known remote printers
    pub fn printers(&self) -> Vec<RemotePrinter> {
        let mut v: Vec<_> = self.printers.iter().map(|e| e.value().clone()).collect();
        v.sort_by(|a, b| a.name.cmp(&b.name));
        v
    }

    /// Hosts offering a share called `name` (case-insensitive)
    pub fn find_share(&self, name: &str) -> Vec<RemoteShare> {
        let wanted = name.to_lowercase();
        self.shares()
            .into_iter()
            .filter(|s| s.name.to_lowercase() == wanted)
            .collect()
    }
}
