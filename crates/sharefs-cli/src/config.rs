//! Configuration system for the ShareFS CLI.

use serde::{Deserialize, Serialize};
use sharefs_core::{PeerConfig, PrinterConfig, TimingConfig};
use sharefs_files::{BroadcastDelay, Presentation, ShareConfig, ShareKind};
use sharefs_transport::PortSet;
use std::collections::HashSet;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// ShareFS configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Network configuration
    #[serde(default)]
    pub network: NetworkConfig,
    /// Discovery and timing configuration
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Shares served by `sharefs serve`
    #[serde(default, rename = "share", skip_serializing_if = "Vec::is_empty")]
    pub shares: Vec<ShareEntry>,
    /// Printers served by `sharefs serve`
    #[serde(default, rename = "printer", skip_serializing_if = "Vec::is_empty")]
    pub printers: Vec<PrinterEntry>,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Announced hostname; the system hostname when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Address of this host on the LAN
    #[serde(default = "default_host_addr")]
    pub host_addr: String,
    /// Netmask of the LAN
    #[serde(default = "default_netmask")]
    pub netmask: String,
    /// Broadcast address; derived from the netmask when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broadcast_addr: Option<String>,
    /// Also bind the broadcast address of each port
    #[serde(default = "default_true")]
    pub bind_broadcast: bool,
    /// Discovery port
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Secure-share port
    #[serde(default = "default_secure_port")]
    pub secure_port: u16,
    /// Data port
    #[serde(default = "default_data_port")]
    pub data_port: u16,
}

/// Discovery and timing configuration; durations in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Announce this peer and its shares
    #[serde(default = "default_true")]
    pub announce: bool,
    /// Peer heartbeat period
    #[serde(default = "default_heartbeat")]
    pub heartbeat_interval: f64,
    /// Lifetime of a silent remote peer
    #[serde(default = "default_peer_ttl")]
    pub peer_ttl: f64,
    /// Housekeeping period
    #[serde(default = "default_watch_interval")]
    pub watch_interval: f64,
    /// Transfer-lock collection period
    #[serde(default = "default_gc_interval")]
    pub transfer_gc_interval: f64,
    /// Wait per request attempt
    #[serde(default = "default_reply_timeout")]
    pub reply_timeout: f64,
    /// Attempts before a peer counts as unresponsive
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log file path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

/// Advert interval: seconds, `"off"` or `"default"`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Delay {
    /// Broadcast every this many seconds
    Seconds(f64),
    /// `"off"` or `"default"`
    Keyword(String),
}

impl Default for Delay {
    fn default() -> Self {
        Delay::Keyword("default".to_string())
    }
}

impl Delay {
    fn to_broadcast_delay(&self) -> anyhow::Result<BroadcastDelay> {
        match self {
            Delay::Seconds(secs) if secs.is_finite() && *secs >= 0.0 => {
                Ok(BroadcastDelay::Every(Duration::from_secs_f64(*secs)))
            }
            Delay::Seconds(secs) => anyhow::bail!("Invalid delay: {}", secs),
            Delay::Keyword(word) => match word.to_ascii_lowercase().as_str() {
                "off" => Ok(BroadcastDelay::Off),
                "default" => Ok(BroadcastDelay::Default),
                _ => anyhow::bail!(
                    "Invalid delay: {:?}. Must be seconds, \"off\" or \"default\"",
                    word
                ),
            },
        }
    }
}

/// A `[[share]]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareEntry {
    /// Share name
    pub name: String,
    /// Directory exported
    pub path: PathBuf,
    /// Octal mode mask
    #[serde(default = "default_mode")]
    pub mode: String,
    /// Advert interval
    #[serde(default)]
    pub delay: Delay,
    /// `"suffix"` or `"truncate"`
    #[serde(default = "default_presentation")]
    pub presentation: String,
    /// Hex filetype for files without a known type
    #[serde(default = "default_filetype")]
    pub default_filetype: String,
    /// Hex share key; makes the share secure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Read-only share
    #[serde(default)]
    pub protected: bool,
    /// Application share
    #[serde(default)]
    pub app: bool,
    /// Hidden from share lists
    #[serde(default)]
    pub hidden: bool,
    /// CD-ROM share
    #[serde(default)]
    pub cdrom: bool,
    /// Buffer created files until close
    #[serde(default)]
    pub spool: bool,
}

/// A `[[printer]]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrinterEntry {
    /// Printer name
    pub name: String,
    /// Spool directory
    pub path: PathBuf,
    /// Printer definition file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<PathBuf>,
    /// Advert interval
    #[serde(default)]
    pub delay: Delay,
    /// Hex filetype of print jobs
    #[serde(default = "default_print_filetype")]
    pub filetype: String,
    /// Free-text description
    #[serde(default)]
    pub description: String,
    /// Command run on spooled jobs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

// Default values

fn default_true() -> bool {
    true
}

fn default_host_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_netmask() -> String {
    "255.0.0.0".to_string()
}

fn default_discovery_port() -> u16 {
    PortSet::default().discovery
}

fn default_secure_port() -> u16 {
    PortSet::default().secure
}

fn default_data_port() -> u16 {
    PortSet::default().data
}

fn default_heartbeat() -> f64 {
    TimingConfig::default().heartbeat_interval.as_secs_f64()
}

fn default_peer_ttl() -> f64 {
    TimingConfig::default().peer_ttl.as_secs_f64()
}

fn default_watch_interval() -> f64 {
    TimingConfig::default().watch_interval.as_secs_f64()
}

fn default_gc_interval() -> f64 {
    TimingConfig::default().transfer_gc_interval.as_secs_f64()
}

fn default_reply_timeout() -> f64 {
    TimingConfig::default().reply_timeout.as_secs_f64()
}

fn default_max_attempts() -> u32 {
    TimingConfig::default().max_attempts
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_mode() -> String {
    "777".to_string()
}

fn default_presentation() -> String {
    "suffix".to_string()
}

fn default_filetype() -> String {
    "fff".to_string()
}

fn default_print_filetype() -> String {
    "ff5".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            hostname: None,
            host_addr: default_host_addr(),
            netmask: default_netmask(),
            broadcast_addr: None,
            bind_broadcast: true,
            discovery_port: default_discovery_port(),
            secure_port: default_secure_port(),
            data_port: default_data_port(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            announce: true,
            heartbeat_interval: default_heartbeat(),
            peer_ttl: default_peer_ttl(),
            watch_interval: default_watch_interval(),
            transfer_gc_interval: default_gc_interval(),
            reply_timeout: default_reply_timeout(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn parse_hex(value: &str, what: &str) -> anyhow::Result<u32> {
    let digits = value
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X")
        .trim_start_matches('&');
    u32::from_str_radix(digits, 16).map_err(|_| anyhow::anyhow!("Invalid {}: {:?}", what, value))
}

fn parse_filetype(value: &str) -> anyhow::Result<u16> {
    let ft = parse_hex(value, "filetype")?;
    if ft > 0xFFF {
        anyhow::bail!("Filetype {:?} is wider than three hex digits", value);
    }
    Ok(ft as u16)
}

fn parse_seconds(secs: f64, what: &str) -> anyhow::Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        anyhow::bail!("{} must be a positive number of seconds, got {}", what, secs);
    }
    Ok(Duration::from_secs_f64(secs))
}

fn parse_addr(value: &str, what: &str) -> anyhow::Result<Ipv4Addr> {
    value
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid {}: {:?}", what, value))
}

impl ShareEntry {
    /// Convert to the engine's share record
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed mode, filetype, key or delay.
    pub fn to_share_config(&self) -> anyhow::Result<ShareConfig> {
        if self.name.is_empty() || self.name.len() > 255 || self.name.contains('.') {
            anyhow::bail!("Invalid share name: {:?}", self.name);
        }
        let mode_mask = u32::from_str_radix(self.mode.trim_start_matches("0o"), 8)
            .map_err(|_| anyhow::anyhow!("Share {}: invalid octal mode {:?}", self.name, self.mode))?;
        if mode_mask > 0o777 {
            anyhow::bail!("Share {}: mode {:?} out of range", self.name, self.mode);
        }
        let presentation = match self.presentation.to_ascii_lowercase().as_str() {
            "suffix" => Presentation::Suffix,
            "truncate" => Presentation::Truncate,
            other => anyhow::bail!(
                "Share {}: presentation must be \"suffix\" or \"truncate\", got {:?}",
                self.name,
                other
            ),
        };
        let key = match &self.key {
            Some(key) => parse_hex(key, "share key")?,
            None => 0,
        };

        let flags = [
            (self.protected, ShareKind::PROTECTED),
            (self.app, ShareKind::APP),
            (self.hidden, ShareKind::HIDDEN),
            (self.cdrom, ShareKind::CDROM),
        ];
        let kind = flags
            .iter()
            .filter(|(set, _)| *set)
            .fold(ShareKind::NORMAL, |acc, (_, k)| acc | *k);

        let mut config = ShareConfig::new(&self.name, &self.path);
        config.mode_mask = mode_mask;
        config.delay = self.delay.to_broadcast_delay()?;
        config.presentation = presentation;
        config.default_filetype = parse_filetype(&self.default_filetype)?;
        config.key = key;
        config.kind = kind;
        config.spool = self.spool;
        Ok(config)
    }
}

impl PrinterEntry {
    /// Convert to the engine's printer record
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed filetype or delay.
    pub fn to_printer_config(&self) -> anyhow::Result<PrinterConfig> {
        let mut config = PrinterConfig::new(&self.name, &self.path);
        config.definition_file = self.definition.clone();
        config.delay = self.delay.to_broadcast_delay()?;
        config.filetype = parse_filetype(&self.filetype)?;
        config.description = self.description.clone();
        config.command = self.command.clone();
        Ok(config)
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("sharefs/config.toml")
    }

    /// Load config from default path, or create default if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();

        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        let net = &self.network;
        let ports = [net.discovery_port, net.secure_port, net.data_port];
        if ports.contains(&0) {
            anyhow::bail!("Ports must be non-zero");
        }
        if ports.iter().collect::<HashSet<_>>().len() != ports.len() {
            anyhow::bail!("Discovery, secure and data ports must differ");
        }

        if self.discovery.max_attempts == 0 {
            anyhow::bail!("max_attempts must be at least 1");
        }

        let mut names = HashSet::new();
        for share in &self.shares {
            share.to_share_config()?;
            if !names.insert(share.name.to_lowercase()) {
                anyhow::bail!("Duplicate share name: {}", share.name);
            }
        }

        let mut printers = HashSet::new();
        for printer in &self.printers {
            printer.to_printer_config()?;
            if !printers.insert(printer.name.as_str()) {
                anyhow::bail!("Duplicate printer name: {}", printer.name);
            }
        }

        self.to_peer_config()?.validate()?;
        Ok(())
    }

    /// Build the engine configuration
    ///
    /// # Errors
    ///
    /// Returns an error for unparsable addresses or durations.
    pub fn to_peer_config(&self) -> anyhow::Result<PeerConfig> {
        let net = &self.network;
        let host_addr = parse_addr(&net.host_addr, "host address")?;
        let netmask = parse_addr(&net.netmask, "netmask")?;
        let mut network = sharefs_core::NetworkConfig::from_netmask(host_addr, netmask)?;
        if let Some(broadcast) = &net.broadcast_addr {
            network.broadcast_addr = parse_addr(broadcast, "broadcast address")?;
        }
        network.bind_broadcast = net.bind_broadcast;

        let disc = &self.discovery;
        let timings = TimingConfig {
            heartbeat_interval: parse_seconds(disc.heartbeat_interval, "heartbeat_interval")?,
            peer_ttl: parse_seconds(disc.peer_ttl, "peer_ttl")?,
            watch_interval: parse_seconds(disc.watch_interval, "watch_interval")?,
            transfer_gc_interval: parse_seconds(disc.transfer_gc_interval, "transfer_gc_interval")?,
            reply_timeout: parse_seconds(disc.reply_timeout, "reply_timeout")?,
            max_attempts: disc.max_attempts,
        };

        Ok(PeerConfig {
            hostname: net.hostname.clone().unwrap_or_else(local_hostname),
            network,
            ports: PortSet {
                discovery: net.discovery_port,
                secure: net.secure_port,
                data: net.data_port,
            },
            timings,
            announce: disc.announce,
            shares: self
                .shares
                .iter()
                .map(ShareEntry::to_share_config)
                .collect::<anyhow::Result<_>>()?,
            printers: self
                .printers
                .iter()
                .map(PrinterEntry::to_printer_config)
                .collect::<anyhow::Result<_>>()?,
        })
    }
}

/// The system hostname, or `"sharefs"` when it cannot be read
pub fn local_hostname() -> String {
    let name = match hostname::get() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            tracing::debug!("Cannot read hostname: {}", e);
            return "sharefs".to_string();
        }
    };
    short_hostname(&name)
}

/// First label of `name`; RISC OS clients show the short name
fn short_hostname(name: &str) -> String {
    match name.split('.').next() {
        Some(short) if !short.is_empty() => short.to_string(),
        _ => "sharefs".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[network]
hostname = "archive"
host_addr = "192.168.1.20"
netmask = "255.255.255.0"

[discovery]
heartbeat_interval = 10
reply_timeout = 0.5

[logging]
level = "debug"

[[share]]
name = "Public"
path = "/srv/public"
mode = "755"
delay = 2.5
presentation = "truncate"

[[share]]
name = "Vault"
path = "/srv/vault"
key = "1a2b3c4d"
delay = "off"
protected = true

[[printer]]
name = "Laser"
path = "/var/spool/sharefs"
description = "Office laser"
"#;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.host_addr, "127.0.0.1");
        assert_eq!(config.network.discovery_port, 32770);
        assert_eq!(config.network.secure_port, 32771);
        assert_eq!(config.network.data_port, 49171);
        assert_eq!(config.discovery.max_attempts, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_sample() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert!(config.validate().is_ok());
        let peer = config.to_peer_config().unwrap();

        assert_eq!(peer.hostname, "archive");
        assert_eq!(peer.network.broadcast_addr, Ipv4Addr::new(192, 168, 1, 255));
        assert_eq!(peer.timings.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(peer.timings.reply_timeout, Duration::from_millis(500));

        let public = &peer.shares[0];
        assert_eq!(public.mode_mask, 0o755);
        assert_eq!(public.delay, BroadcastDelay::Every(Duration::from_millis(2500)));
        assert_eq!(public.presentation, Presentation::Truncate);

        let vault = &peer.shares[1];
        assert_eq!(vault.key, 0x1a2b_3c4d);
        assert_eq!(vault.delay, BroadcastDelay::Off);
        assert!(vault.kind.contains(ShareKind::PROTECTED));

        assert_eq!(peer.printers[0].filetype, 0xFF5);
        assert_eq!(peer.printers[0].description, "Office laser");
    }

    #[test]
    fn test_config_validation() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.shares[0].mode = "9".to_string();
        assert!(config.validate().is_err());

        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.shares[1].name = "PUBLIC".to_string();
        assert!(config.validate().is_err());

        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.network.data_port = config.network.discovery_port;
        assert!(config.validate().is_err());

        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.network.netmask = "255.0.255.0".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_delay_keywords() {
        assert_eq!(Delay::default().to_broadcast_delay().unwrap(), BroadcastDelay::Default);
        assert_eq!(
            Delay::Keyword("OFF".into()).to_broadcast_delay().unwrap(),
            BroadcastDelay::Off
        );
        assert!(Delay::Keyword("sometimes".into()).to_broadcast_delay().is_err());
        assert!(Delay::Seconds(-1.0).to_broadcast_delay().is_err());
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("0xFF5", "x").unwrap(), 0xFF5);
        assert_eq!(parse_hex("&fff", "x").unwrap(), 0xFFF);
        assert!(parse_filetype("1000").is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");
        let config: Config = toml::from_str(SAMPLE).unwrap();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.shares.len(), 2);
        assert_eq!(loaded.shares[0].delay, Delay::Seconds(2.5));
        assert_eq!(loaded.printers[0].name, "Laser");
    }

    #[test]
    fn test_local_hostname() {
        let name = local_hostname();
        assert!(!name.is_empty());
        assert!(!name.contains('.'));
    }

    #[test]
    fn test_short_hostname() {
        assert_eq!(short_hostname("archive.lan.example"), "archive");
        assert_eq!(short_hostname("archive"), "archive");
        assert_eq!(short_hostname(".lan"), "sharefs");
        assert_eq!(short_hostname(""), "sharefs");
    }
}
