//! Local share records.

use crate::error::ShareError;
use std::fmt;
use std::ops::BitOr;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Share-kind bits as advertised on the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ShareKind(u8);

impl ShareKind {
    /// Plain share
    pub const NORMAL: ShareKind = ShareKind(0x00);
    /// Read-only
    pub const PROTECTED: ShareKind = ShareKind(0x01);
    /// Application share
    pub const APP: ShareKind = ShareKind(0x02);
    /// Not shown in share lists
    pub const HIDDEN: ShareKind = ShareKind(0x04);
    /// Directory share
    pub const DIRECTORY: ShareKind = ShareKind(0x08);
    /// CD-ROM share
    pub const CDROM: ShareKind = ShareKind(0x10);

    /// From raw bits
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw bits
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether every bit of `other` is set
    pub const fn contains(self, other: ShareKind) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ShareKind {
    type Output = ShareKind;

    fn bitor(self, rhs: ShareKind) -> ShareKind {
        ShareKind(self.0 | rhs.0)
    }
}

impl fmt::Display for ShareKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::PROTECTED, "protected"),
            (Self::APP, "app"),
            (Self::HIDDEN, "hidden"),
            (Self::DIRECTORY, "directory"),
            (Self::CDROM, "cdrom"),
        ];
        let set: Vec<_> = names
            .iter()
            .filter(|(k, _)| self.contains(*k))
            .map(|(_, n)| *n)
            .collect();
        if set.is_empty() {
            f.write_str("normal")
        } else {
            f.write_str(&set.join(","))
        }
    }
}

/// How on-disk filetype suffixes are shown to clients
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Presentation {
    /// Names are shown exactly as stored
    #[default]
    Suffix,
    /// `,xxx` and `,llllllll-eeeeeeee` suffixes are hidden and drive the filetype
    Truncate,
}

/// How often a share is advertised
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum BroadcastDelay {
    /// Never broadcast (secure or silent share)
    Off,
    /// Use the peer heartbeat interval
    #[default]
    Default,
    /// Broadcast at this interval
    Every(Duration),
}

/// Share descriptor supplied by the caller
#[derive(Debug, Clone)]
pub struct ShareConfig {
    /// Share name
    pub name: String,
    /// Directory on the host filesystem
    pub root: PathBuf,
    /// Mode bits ANDed into every exposed mode
    pub mode_mask: u32,
    /// Advert interval
    pub delay: BroadcastDelay,
    /// Suffix presentation
    pub presentation: Presentation,
    /// Filetype for files without a suffix or known extension
    pub default_filetype: u16,
    /// Share key; 0 means public
    pub key: u32,
    /// Advertised kind bits
    pub kind: ShareKind,
    /// Hold created files in memory and write them out on close
    pub spool: bool,
}

impl ShareConfig {
    /// A public, read-write share with defaults
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            mode_mask: 0o777,
            delay: BroadcastDelay::Default,
            presentation: Presentation::Suffix,
            default_filetype: sharefs_wire::riscos::FILETYPE_TEXT,
            key: 0,
            kind: ShareKind::NORMAL,
            spool: false,
        }
    }
}

/// A share served by this peer
#[derive(Debug)]
pub struct Share {
    config: ShareConfig,
    key_name: String,
    created: SystemTime,
}

impl Share {
    /// Validate a descriptor and create the share record
    ///
    /// # Errors
    /// Fails when the name is empty or contains a separator, or the root is
    /// not a directory
    pub fn new(config: ShareConfig) -> Result<Self, ShareError> {
        if config.name.is_empty() || config.name.contains(['.', ':', ' ']) {
            return Err(ShareError::InvalidConfig(format!(
                "share name {:?} must be non-empty without '.', ':' or spaces",
                config.name
            )));
        }
        if config.default_filetype > 0xFFF {
            return Err(ShareError::InvalidConfig(format!(
                "default filetype {:#x} exceeds 12 bits",
                config.default_filetype
            )));
        }
        let meta = std::fs::metadata(&config.root).map_err(|e| {
            ShareError::InvalidConfig(format!("{}: {e}", config.root.display()))
        })?;
        if !meta.is_dir() {
            return Err(ShareError::InvalidConfig(format!(
                "{} is not a directory",
                config.root.display()
            )));
        }
        Ok(Self {
            key_name: config.name.to_lowercase(),
            config,
            created: SystemTime::now(),
        })
    }

    /// Name as configured
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Lower-cased name used for lookups
    pub fn key_name(&self) -> &str {
        &self.key_name
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// Mode mask
    pub fn mode_mask(&self) -> u32 {
        self.config.mode_mask
    }

    /// Suffix presentation
    pub fn presentation(&self) -> Presentation {
        self.config.presentation
    }

    /// Default filetype
    pub fn default_filetype(&self) -> u16 {
        self.config.default_filetype
    }

    /// Share key
    pub fn key(&self) -> u32 {
        self.config.key
    }

    /// Whether the share is only revealed by key
    pub fn is_secure(&self) -> bool {
        self.config.key != 0
    }

    /// Whether created files go to spool buffers
    pub fn is_spool(&self) -> bool {
        self.config.spool
    }

    /// Advert interval
    pub fn delay(&self) -> BroadcastDelay {
        self.config.delay
    }

    /// When the share was added
    pub fn created(&self) -> SystemTime {
        self.created
    }

    /// Kind bits as advertised; a mask without world-write implies PROTECTED
    pub fn kind(&self) -> ShareKind {
        if self.config.mode_mask & 0o002 == 0 {
            self.config.kind | ShareKind::PROTECTED
        } else {
            self.config.kind
        }
    }

    /// The descriptor this share was created from
    pub fn config(&self) -> &ShareConfig {
        &self.config
    }
}
