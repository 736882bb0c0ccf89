//! Discovery errors.

use sharefs_wire::FrameError;
use thiserror::Error;

/// Discovery errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    /// Message body could not be decoded
    #[error("malformed discovery message: {0}")]
    Malformed(#[from] FrameError),

    /// Class word names an unknown major/minor pair
    #[error("unknown discovery class {major:#x}/{minor:#x}")]
    UnknownClass {
        /// Major code
        major: u16,
        /// Minor code
        minor: u16,
    },

    /// Secure-share message with an unexpected header
    #[error("unexpected secure-share header {0:#010x}")]
    UnexpectedSecureHeader(u32),

    /// Name too long to encode in a single byte length field
    #[error("name too long for discovery: {0} bytes")]
    NameTooLong(usize),
}
