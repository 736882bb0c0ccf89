//! Share manager errors.
//!
//! Every variant maps onto a RISC OS error number so a failed handler can be
//! answered with an `E` packet.

use sharefs_wire::{FrameError, WireError, error_code};
use std::io;
use thiserror::Error;

/// Share manager errors
#[derive(Debug, Error)]
pub enum ShareError {
    /// Object does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// No local share by that name
    #[error("share not available: {0}")]
    ShareUnavailable(String),

    /// A path element that must be a directory is not one
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Create would replace a directory
    #[error("directory exists: {0}")]
    DirectoryExists(String),

    /// Mode bits or the share mask forbid the operation
    #[error("access violation: {0}")]
    AccessViolation(String),

    /// Handle unknown, or owned by another peer
    #[error("unknown handle: {0}")]
    BadHandle(u32),

    /// Name cannot be represented on disk
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// Free space queries are not answered
    #[error("free space not available")]
    FreeSpaceUnavailable,

    /// Spool buffer would grow past its limit
    #[error("disc full: {0}")]
    DiscFull(String),

    /// Share configuration rejected
    #[error("invalid share configuration: {0}")]
    InvalidConfig(String),

    /// Request parameters could not be decoded
    #[error("malformed request: {0}")]
    Malformed(#[from] FrameError),

    /// Underlying filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ShareError {
    /// RISC OS error number sent on the wire
    pub fn code(&self) -> u32 {
        match self {
            Self::ShareUnavailable(_) => error_code::SHARE_UNAVAILABLE,
            Self::NotADirectory(_) => error_code::NOT_A_DIRECTORY,
            Self::DirectoryExists(_) => error_code::DIRECTORY_EXISTS,
            Self::AccessViolation(_) => error_code::ACCESS_VIOLATION,
            Self::FreeSpaceUnavailable => error_code::FREE_SPACE_UNAVAILABLE,
            Self::DiscFull(_) => error_code::DISC_FULL,
            Self::NotFound(_)
            | Self::BadHandle(_)
            | Self::InvalidName(_)
            | Self::InvalidConfig(_)
            | Self::Malformed(_)
            | Self::Io(_) => error_code::NOT_FOUND,
        }
    }

    /// Message text sent on the wire
    pub fn wire_message(&self) -> String {
        match self {
            Self::ShareUnavailable(_) => "Shared disc not available".to_string(),
            Self::NotADirectory(_) => "Not a Directory".to_string(),
            Self::DirectoryExists(name) => format!(
                "'{name}' cannot be created - a directory with that name already exists"
            ),
            Self::AccessViolation(_) => "Access violation".to_string(),
            Self::FreeSpaceUnavailable => "Free space not available".to_string(),
            Self::DiscFull(_) => "Disc full".to_string(),
            _ => "Not found".to_string(),
        }
    }

    /// The `E` packet body for this error
    pub fn to_wire(&self) -> WireError {
        WireError::new(self.code(), self.wire_message())
    }

    pub(crate) fn from_io(err: io::Error, what: &str) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(what.to_string()),
            io::ErrorKind::PermissionDenied => Self::AccessViolation(what.to_string()),
            _ => Self::Io(err),
        }
    }
}
