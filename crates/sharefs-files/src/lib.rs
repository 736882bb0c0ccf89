//! # ShareFS Files
//!
//! The share manager: everything between a RISC OS path on the wire and a
//! POSIX file on disk.
//!
//! This crate provides:
//! - Share records and the filetype mapper interface
//! - RISC OS ↔ local name translation, including `,xxx` filetype suffixes
//! - Access descent from the share root with per-share mode masks
//! - The handle table (files, directories, spool buffers) with a free-list
//! - Catalogue encoding in 2 KiB chunks and the continuation cache
//! - Watches on catalogued directories

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalogue;
pub mod error;
pub mod filetype;
pub mod handles;
pub mod info;
pub mod manager;
pub mod names;
pub mod path;
pub mod share;
pub mod watch;

pub use catalogue::{CatalogueCache, Continuation};
pub use error::ShareError;
pub use filetype::{FiletypeMapper, StaticMimeMap};
pub use handles::{HandleTable, OpenObject, Role};
pub use info::{ObjectInfo, ObjectType};
pub use manager::{Opened, ShareManager};
pub use share::{BroadcastDelay, Presentation, Share, ShareConfig, ShareKind};
pub use watch::WatchTable;

/// Mode bits that count as readable during access descent
pub const PROTECTED_READ: u32 = 0o444;

/// Mode bits that count as writable during access descent
pub const PROTECTED_WRITE: u32 = 0o222;

/// Execute bits forced onto directories
pub const DIR_EXEC: u32 = 0o111;

/// Length reported for directories and share roots
pub const DIRECTORY_LENGTH: u32 = 0x800;

/// Largest print job a spool buffer holds before writes fail with disc full
pub const SPOOL_LIMIT: u64 = 64 * 1024 * 1024;
