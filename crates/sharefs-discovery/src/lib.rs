//! # ShareFS Discovery
//!
//! Broadcast discovery for the ShareFS protocol engine.
//!
//! This crate provides:
//! - Encoding and decoding of peer, share and printer discovery messages
//! - The secure-share key exchange messages
//! - Registries of remote peers, shares and printers with TTL eviction
//!
//! Discovery messages open with a class word `major << 16 | minor`:
//!
//! | major | class   | minor 1 | minor 2   | minor 3   | minor 4   |
//! |-------|---------|---------|-----------|-----------|-----------|
//! | 1     | share   | startup | available | withdrawn | heartbeat |
//! | 2     | printer | startup | available | withdrawn | heartbeat |
//! | 5     | peer    | startup | available | withdrawn | heartbeat |
//!
//! A startup message without a body is a query: every listener answers with
//! an *available* broadcast.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod message;
pub mod registry;

pub use error::DiscoveryError;
pub use message::{
    Class, DiscoveryMessage, HostInfo, Phase, PrinterAdvert, SecureReply, SecureRequest,
    ShareAdvert,
};
pub use registry::{PeerEntry, Registry, RegistryEvent, RemotePrinter, RemoteShare, SweepReport};

/// Default lifetime of a peer entry without a heartbeat
pub const DEFAULT_PEER_TTL: std::time::Duration = std::time::Duration::from_secs(600);
