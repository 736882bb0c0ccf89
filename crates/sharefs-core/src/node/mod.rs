//! Peer orchestration layer for ShareFS
//!
//! This module ties the protocol components together:
//! - Endpoints and datagram routing (sharefs-transport)
//! - Peer, share and printer discovery (sharefs-discovery)
//! - Shares, handles and catalogues (sharefs-files)
//! - Wire frames and correlation ids (sharefs-wire)
//!
//! # Example
//!
//! ```no_run
//! use sharefs_core::node::{Peer, PeerConfig};
//! use sharefs_files::StaticMimeMap;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let peer = Peer::start(PeerConfig::default(), Arc::new(StaticMimeMap::default())).await?;
//!
//!     for share in peer.remote_shares() {
//!         println!("{} on {}", share.name, share.host);
//!     }
//!
//!     peer.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod handlers;
pub mod inbox;
#[allow(clippy::module_inception)]
pub mod node;
pub mod router;
pub mod transfer;

pub use client::{RemoteEntry, RemoteObject, ShareClient};
pub use config::{NetworkConfig, PeerConfig, PrinterConfig, TimingConfig};
pub use error::{NodeError, Result};
pub use inbox::{Inbox, InboxKey, Waiter};
pub use node::{Peer, print_share_name};
pub use transfer::TransferLocks;
