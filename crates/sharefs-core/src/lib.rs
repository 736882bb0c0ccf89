//! # ShareFS Core
//!
//! The protocol engine of an Access+/ShareFS peer.
//!
//! This crate provides:
//! - The `Peer` orchestrator owning every registry and table
//! - The router loop and the per-`(peer, id)` pending-reply inbox
//! - Discovery actors: hello, heartbeat, per-share and per-printer adverts,
//!   peer sweeps and directory-change notifications
//! - The transfer engine (simple and pipelined reads and writes, renames)
//! - The client-side share API driving the same protocol outward
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                             Peer                                │
//! │  (config, identity, registries, share manager, endpoint set)    │
//! ├──────────────┬──────────────┬───────────────┬───────────────────┤
//! │    Router    │  Discovery   │   Transfers   │   ShareClient     │
//! │ (dispatch +  │  (adverts,   │ (send/receive │ (open, catalogue, │
//! │   inbox)     │   sweeps)    │    tasks)     │  get, put, ...)   │
//! ├──────────────┴──────────────┴───────────────┴───────────────────┤
//! │        sharefs-transport  │  sharefs-discovery  │  sharefs-files │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod node;

pub use node::{
    NetworkConfig, NodeError, Peer, PeerConfig, PrinterConfig, RemoteEntry, RemoteObject,
    Result, ShareClient, TimingConfig,
};

/// Window of bytes a pipelined reader asks for in one `r` frame
pub const READ_WINDOW: u32 = 4 * sharefs_wire::MAX_BLOCK as u32;

/// Blocks a pipelined writer sends ahead of each `w` request
pub const WRITE_AHEAD: usize = 2;
