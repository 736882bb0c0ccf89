//! Error types for the peer engine
//!
//! Errors fall into a few groups so callers can decide what to do:
//!
//! - **Transient**: the remote peer did not answer in time, or a datagram
//!   could not be queued; retrying later may succeed
//! - **Remote**: the remote peer answered with an `E` packet; retrying the
//!   same request will fail the same way
//! - **Local**: configuration, share or I/O problems on this host

use sharefs_discovery::DiscoveryError;
use sharefs_files::ShareError;
use sharefs_transport::TransportError;
use sharefs_wire::{FrameError, WireError};
use std::borrow::Cow;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Errors that can occur in peer operations
#[derive(Debug, Error)]
pub enum NodeError {
    // ============ Transport Errors ============
    /// Socket setup or send failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Every attempt of a request went unanswered
    #[error("Peer {peer} unresponsive after {attempts} attempts")]
    PeerUnresponsive {
        /// Remote host
        peer: Ipv4Addr,
        /// Attempts made
        attempts: u32,
    },

    // ============ Protocol Errors ============
    /// Remote peer answered with an error packet
    #[error("Remote error 0x{code:X}: {message}")]
    Remote {
        /// RISC OS error number
        code: u32,
        /// Message text
        message: String,
    },

    /// A reply could not be decoded
    #[error("Malformed frame: {0}")]
    Frame(#[from] FrameError),

    /// A reply of the wrong kind arrived
    #[error("Unexpected reply: {0}")]
    UnexpectedReply(Cow<'static, str>),

    /// A discovery message could not be encoded or decoded
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    // ============ Local Errors ============
    /// Share manager failure
    #[error("Share error: {0}")]
    Share(#[from] ShareError),

    /// No known remote share by that name
    #[error("Remote share not found: {0}")]
    ShareNotFound(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),

    /// Invalid state transition
    #[error("Invalid state: {0}")]
    InvalidState(Cow<'static, str>),

    /// Local file I/O
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeError {
    /// Returns true if this error is transient and may succeed on retry
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            NodeError::PeerUnresponsive { .. }
                | NodeError::Transport(TransportError::SendDropped(_))
        )
    }

    /// Returns true if the remote peer rejected the request
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, NodeError::Remote { .. })
    }

    /// Create an invalid state error with static context
    #[must_use]
    pub const fn invalid_state(context: &'static str) -> Self {
        NodeError::InvalidState(Cow::Borrowed(context))
    }

    /// Create an unexpected reply error with static context
    #[must_use]
    pub const fn unexpected(context: &'static str) -> Self {
        NodeError::UnexpectedReply(Cow::Borrowed(context))
    }
}

impl From<WireError> for NodeError {
    fn from(err: WireError) -> Self {
        NodeError::Remote {
            code: err.code,
            message: err.message,
        }
    }
}

/// Result type for peer operations
pub type Result<T> = std::result::Result<T, NodeError>;
