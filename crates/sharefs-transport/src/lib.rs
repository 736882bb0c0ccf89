//! # ShareFS Transport
//!
//! UDP plumbing for the ShareFS protocol engine.
//!
//! This crate provides:
//! - The `Transport` trait and a tokio-backed `AsyncUdpTransport`
//! - The three-port `EndpointSet` (discovery, secure-share, data), each with
//!   a unicast socket and an optional broadcast socket
//! - CIDR subnet filtering of inbound datagrams
//! - Send with bounded retry when the socket buffer is full

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod endpoint;
pub mod subnet;
pub mod transport;
pub mod udp_async;

pub use endpoint::{Datagram, EndpointConfig, EndpointSet, PortKind, PortSet};
pub use subnet::Subnet;
pub use transport::{Transport, TransportError, TransportResult, TransportStats};
pub use udp_async::{AsyncUdpTransport, SocketOptions};

/// Largest datagram the receive loops accept
pub const MAX_DATAGRAM: usize = 65536;

/// Attempts made when a send hits a full socket buffer
pub const SEND_ATTEMPTS: usize = 5;
