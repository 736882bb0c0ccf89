//! # ShareFS Wire
//!
//! Wire codec for the Access+/ShareFS protocol.
//!
//! This crate provides:
//! - Little-endian 32-bit word packing with 4-byte string padding
//! - Frame header encoding (command letter + 3-byte correlation id)
//! - Request sub-codes and well-known error codes
//! - RISC OS filetype/date words and access bits translation
//! - Jenkins one-at-a-time hashing for stable directory handles
//! - The shared correlation id generator
//!
//! ## Frame Layout
//!
//! ```text
//! ┌─────────┬──────────────────────┬──────────┬──────────────────────┐
//! │ cmd (1) │ correlation id (3)   │ word 1   │ parameters ...       │
//! └─────────┴──────────────────────┴──────────┴──────────────────────┘
//! ```
//!
//! All words are little-endian. Strings are NUL-terminated and padded with
//! NULs to the next 4-byte boundary.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod frame;
pub mod hash;
pub mod ids;
pub mod riscos;

pub use codec::{WordReader, WordWriter, pad_len};
pub use error::{FrameError, WireError, error_code};
pub use frame::{Command, Direction, Frame, FrameBuilder, Opcode, error_frame};
pub use hash::jenkins_one_at_a_time;
pub use ids::CorrelationIds;
pub use riscos::{Stamp, pack_filetype_date, unpack_filetype_date};

/// Discovery port (peer, share and printer broadcasts)
pub const DISCOVERY_PORT: u16 = 32770;

/// Secure-share key exchange port
pub const SECURE_PORT: u16 = 32771;

/// Data and control port
pub const DATA_PORT: u16 = 49171;

/// Largest block carried by one pipelined data frame
pub const MAX_BLOCK: usize = 8192;

/// Largest payload returned by a simple (`B`) read
pub const MAX_SIMPLE_READ: usize = 16 * 1024;
