//! Peer configuration

use crate::node::error::{NodeError, Result};
use sharefs_files::{BroadcastDelay, ShareConfig};
use sharefs_transport::{EndpointConfig, PortSet, Subnet};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

/// Everything a [`crate::Peer`] needs to start
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Name announced in peer broadcasts
    pub hostname: String,

    /// Addressing
    pub network: NetworkConfig,

    /// Port numbers
    pub ports: PortSet,

    /// Intervals, lifetimes and retry budget
    pub timings: TimingConfig,

    /// Announce this peer and its shares. Client-only peers stay silent.
    pub announce: bool,

    /// Shares added at startup
    pub shares: Vec<ShareConfig>,

    /// Printers added at startup
    pub printers: Vec<PrinterConfig>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            hostname: "sharefs".to_string(),
            network: NetworkConfig::default(),
            ports: PortSet::default(),
            timings: TimingConfig::default(),
            announce: true,
            shares: Vec::new(),
            printers: Vec::new(),
        }
    }
}

impl PeerConfig {
    /// A silent peer that binds ephemeral unicast ports, for one-shot
    /// client commands next to a running daemon
    pub fn client_only(mut self) -> Self {
        self.announce = false;
        self.network.ephemeral_unicast = true;
        self
    }

    /// Check the configuration for values the engine cannot run with
    ///
    /// # Errors
    /// Returns `NodeError::InvalidConfig` describing the first problem
    pub fn validate(&self) -> Result<()> {
        if self.hostname.is_empty() || self.hostname.len() > 255 {
            return Err(NodeError::InvalidConfig(
                format!("hostname must be 1-255 bytes, got {}", self.hostname.len()).into(),
            ));
        }
        if self.timings.max_attempts == 0 {
            return Err(NodeError::InvalidConfig("max_attempts must be at least 1".into()));
        }
        if self.timings.reply_timeout.is_zero() || self.timings.heartbeat_interval.is_zero() {
            return Err(NodeError::InvalidConfig(
                "reply_timeout and heartbeat_interval must be non-zero".into(),
            ));
        }
        if !self.network.subnet.contains(self.network.host_addr) {
            return Err(NodeError::InvalidConfig(
                format!(
                    "host address {} is outside subnet {}",
                    self.network.host_addr, self.network.subnet
                )
                .into(),
            ));
        }
        Ok(())
    }

    /// Endpoint addressing derived from this configuration
    pub fn endpoint_config(&self) -> EndpointConfig {
        EndpointConfig {
            host_addr: self.network.host_addr,
            broadcast_addr: self.network.broadcast_addr,
            subnet: self.network.subnet,
            ports: self.ports,
            bind_broadcast: self.network.bind_broadcast,
            ephemeral_unicast: self.network.ephemeral_unicast,
        }
    }

    /// Advert interval for a share or printer delay setting; `None` means
    /// never advertised
    pub fn advert_interval(&self, delay: BroadcastDelay) -> Option<Duration> {
        match delay {
            BroadcastDelay::Off => None,
            BroadcastDelay::Default => Some(self.timings.heartbeat_interval),
            BroadcastDelay::Every(d) if d.is_zero() => None,
            BroadcastDelay::Every(d) => Some(d),
        }
    }
}

/// Addressing on the LAN
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// This host's address
    pub host_addr: Ipv4Addr,

    /// Where broadcasts are sent
    pub broadcast_addr: Ipv4Addr,

    /// Datagrams from outside this network are dropped
    pub subnet: Subnet,

    /// Bind a socket to the broadcast address as well
    pub bind_broadcast: bool,

    /// Bind unicast sockets to ephemeral ports
    pub ephemeral_unicast: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host_addr: Ipv4Addr::LOCALHOST,
            broadcast_addr: Ipv4Addr::new(127, 255, 255, 255),
            subnet: Subnet::new(Ipv4Addr::LOCALHOST, 8),
            bind_broadcast: false,
            ephemeral_unicast: false,
        }
    }
}

impl NetworkConfig {
    /// Addressing for `host_addr` with `netmask`; the broadcast address is
    /// derived from the mask
    ///
    /// # Errors
    /// Rejects non-contiguous masks
    pub fn from_netmask(host_addr: Ipv4Addr, netmask: Ipv4Addr) -> Result<Self> {
        let subnet = Subnet::from_netmask(host_addr, netmask)
            .map_err(|e| NodeError::InvalidConfig(e.to_string().into()))?;
        Ok(Self {
            host_addr,
            broadcast_addr: subnet.broadcast(),
            subnet,
            bind_broadcast: true,
            ephemeral_unicast: false,
        })
    }
}

/// Timers and retry budget
#[derive(Debug, Clone)]
pub struct TimingConfig {
    /// Peer heartbeat period, also the default advert interval
    pub heartbeat_interval: Duration,

    /// Lifetime of a remote peer entry without a heartbeat
    pub peer_ttl: Duration,

    /// Period of the housekeeping tick (sweeps and directory watches)
    pub watch_interval: Duration,

    /// Period of transfer-lock garbage collection
    pub transfer_gc_interval: Duration,

    /// Wait per request attempt
    pub reply_timeout: Duration,

    /// Attempts per request before the peer counts as unresponsive
    pub max_attempts: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            peer_ttl: sharefs_discovery::DEFAULT_PEER_TTL,
            watch_interval: Duration::from_secs(5),
            transfer_gc_interval: Duration::from_secs(60),
            reply_timeout: Duration::from_secs(1),
            max_attempts: 5,
        }
    }
}

/// A printer served by this peer
#[derive(Debug, Clone)]
pub struct PrinterConfig {
    /// Printer name
    pub name: String,

    /// Spool directory print jobs land in
    pub path: PathBuf,

    /// Printer definition file offered to clients
    pub definition_file: Option<PathBuf>,

    /// Advert interval
    pub delay: BroadcastDelay,

    /// Filetype of spooled jobs
    pub filetype: u16,

    /// Free-text description
    pub description: String,

    /// Command run on spooled jobs (post-processing is external)
    pub command: Option<String>,
}

impl PrinterConfig {
    /// A printer spooling into `path` with defaults
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            definition_file: None,
            delay: BroadcastDelay::Default,
            filetype: 0xFF5,
            description: String::new(),
            command: None,
        }
    }

    /// Check the record
    ///
    /// # Errors
    /// Returns `NodeError::InvalidConfig` for an empty name, an oversized
    /// description or a missing spool directory
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.len() > 255 {
            return Err(NodeError::InvalidConfig(
                format!("printer name must be 1-255 bytes: {:?}", self.name).into(),
            ));
        }
        if self.description.len() > 255 {
            return Err(NodeError::InvalidConfig(
                format!("description of printer {} is too long", self.name).into(),
            ));
        }
        if !self.path.is_dir() {
            return Err(NodeError::InvalidConfig(
                format!("spool directory {} does not exist", self.path.display()).into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timings() {
        let t = TimingConfig::default();
        assert_eq!(t.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(t.peer_ttl, Duration::from_secs(600));
        assert_eq!(t.transfer_gc_interval, Duration::from_secs(60));
        assert_eq!(t.max_attempts, 5);
    }

    #[test]
    fn test_default_validates() {
        assert!(PeerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_host_outside_subnet() {
        let mut cfg = PeerConfig::default();
        cfg.network.host_addr = Ipv4Addr::new(10, 0, 0, 1);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_from_netmask() {
        let net =
            NetworkConfig::from_netmask(Ipv4Addr::new(192, 168, 1, 20), Ipv4Addr::new(255, 255, 255, 0))
                .unwrap();
        assert_eq!(net.broadcast_addr, Ipv4Addr::new(192, 168, 1, 255));
        assert!(net.subnet.contains(Ipv4Addr::new(192, 168, 1, 7)));
        assert!(NetworkConfig::from_netmask(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(255, 0, 255, 0)).is_err());
    }

    #[test]
    fn test_advert_interval() {
        let cfg = PeerConfig::default();
        assert_eq!(cfg.advert_interval(BroadcastDelay::Off), None);
        assert_eq!(
            cfg.advert_interval(BroadcastDelay::Default),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            cfg.advert_interval(BroadcastDelay::Every(Duration::from_millis(2500))),
            Some(Duration::from_millis(2500))
        );
    }

    #[test]
    fn test_client_only() {
        let cfg = PeerConfig::default().client_only();
        assert!(!cfg.announce);
        assert!(cfg.endpoint_config().ephemeral_unicast);
    }

    #[test]
    fn test_printer_validate() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PrinterConfig::new("laser", dir.path()).validate().is_ok());
        assert!(PrinterConfig::new("", dir.path()).validate().is_err());
        assert!(PrinterConfig::new("laser", dir.path().join("missing")).validate().is_err());
    }
}
