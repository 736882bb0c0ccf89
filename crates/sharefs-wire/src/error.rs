//! Error types for the ShareFS wire codec.

use thiserror::Error;

/// Frame-level errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Frame too short to parse
    #[error("frame too short: expected at least {expected}, got {actual}")]
    TooShort {
        /// Expected minimum size
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Unknown command letter
    #[error("invalid command byte: 0x{0:02X}")]
    InvalidCommand(u8),

    /// Unknown request sub-code
    #[error("invalid request code: 0x{0:X}")]
    InvalidOpcode(u32),

    /// String ran off the end of the frame without a terminator
    #[error("unterminated string at offset {0}")]
    UnterminatedString(usize),

    /// Counted field claims more bytes than the frame holds
    #[error("length field {claimed} exceeds remaining {remaining} bytes")]
    LengthOverflow {
        /// Length the field claimed
        claimed: usize,
        /// Bytes actually left
        remaining: usize,
    },
}

/// Error carried by an `E` packet
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (0x{code:X})")]
pub struct WireError {
    /// RISC OS error number
    pub code: u32,
    /// Human-readable message
    pub message: String,
}

impl WireError {
    /// Create a new wire error
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The canonical "Not found" error
    pub fn not_found() -> Self {
        Self::new(error_code::NOT_FOUND, "Not found")
    }
}

/// Well-known RISC OS error numbers used by the engine
pub mod error_code {
    /// Object or handle not found
    pub const NOT_FOUND: u32 = 0x100D6;
    /// Share is not available on this host
    pub const SHARE_UNAVAILABLE: u32 = 0x163AC;
    /// Path element is not a directory
    pub const NOT_A_DIRECTORY: u32 = 0x163C5;
    /// A directory with that name already exists
    pub const DIRECTORY_EXISTS: u32 = 0xAF;
    /// Free space query unsupported
    pub const FREE_SPACE_UNAVAILABLE: u32 = 0x806C11;
    /// Access violation (mode or share mask forbids the operation)
    pub const ACCESS_VIOLATION: u32 = 0xBD;
    /// No room left for the object
    pub const DISC_FULL: u32 = 0x100C6;
}
