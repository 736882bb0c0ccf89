//! Directory catalogues.
//!
//! A listing is a run of entries packed into chunks of at most
//! [`CHUNK_LIMIT`] entry bytes. The first chunk travels with a trailer
//! describing the directory; the rest wait in the [`CatalogueCache`] until
//! the client asks for them with continuation requests.
//!
//! ```text
//! chunk:   entry_bytes | 0x00000001 | entry ...
//! entry:   ft | date | length | access | type | name\0 pad
//! trailer: 0xFFFFCD00 | date | rounded_len | access | share_ctx | dir_handle | first_len | marker
//! ```

use crate::info::ObjectInfo;
use sharefs_wire::{WordWriter, pad_len};
use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;

/// Largest number of entry bytes in one chunk
pub const CHUNK_LIMIT: usize = 2048;

/// Second word of every chunk header
pub const CHUNK_TAG: u32 = 0x0000_0001;

/// Filetype word of the directory trailer
pub const TRAILER_FILETYPE: u32 = 0xFFFF_CD00;

/// Marker sent when no chunks remain
pub const FINAL_MARKER: u32 = 0xFFFF_FFFF;

/// Marker sent with the first chunk when more follow
pub const FIRST_MARKER: u32 = 0x0000_0055;

/// Markers for successive continuation chunks
pub const MARKER_CYCLE: [u32; 4] = [0x5500_0000, 0x0000_00AA, 0x0000_0055, 0xAA00_0000];

/// Constant folded into the share context word
pub const SHARE_CONTEXT_XOR: u32 = 0xFFFF_FF02;

/// One directory entry ready for encoding
#[derive(Debug, Clone)]
pub struct CatalogueEntry {
    /// Object description
    pub info: ObjectInfo,
    /// Presented name in RISC OS bytes
    pub name: Vec<u8>,
}

impl CatalogueEntry {
    /// Encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        ObjectInfo::WIRE_SIZE + self.name.len() + 1 + pad_len(self.name.len() + 1)
    }

    fn encode(&self, w: &mut WordWriter) {
        self.info.encode(w);
        w.string(&self.name);
    }
}

/// A listing split into chunks
#[derive(Debug, Clone)]
pub struct Listing {
    /// Encoded chunks, header included
    pub chunks: Vec<Vec<u8>>,
    /// Entry bytes per chunk
    pub chunk_lens: Vec<usize>,
    /// Entry bytes across all chunks
    pub total_entry_bytes: usize,
}

impl Listing {
    /// Pack `entries` greedily into chunks. An empty listing still yields one
    /// empty chunk.
    pub fn build(entries: &[CatalogueEntry]) -> Self {
        let mut groups: Vec<Vec<&CatalogueEntry>> = vec![Vec::new()];
        let mut lens = vec![0usize];
        for entry in entries {
            let len = entry.encoded_len();
            let last = lens.len() - 1;
            if lens[last] + len > CHUNK_LIMIT && !groups[last].is_empty() {
                groups.push(Vec::new());
                lens.push(0);
            }
            let last = lens.len() - 1;
            groups[last].push(entry);
            lens[last] += len;
        }

        let chunks = groups
            .iter()
            .zip(&lens)
            .map(|(group, len)| {
                let mut w = WordWriter::with_capacity(8 + len);
                w.word(*len as u32).word(CHUNK_TAG);
                for entry in group {
                    entry.encode(&mut w);
                }
                w.finish()
            })
            .collect();

        Self {
            chunks,
            total_entry_bytes: lens.iter().sum(),
            chunk_lens: lens,
        }
    }

    /// Total length rounded up to whole chunks
    pub fn rounded_length(&self) -> u32 {
        rounded_length(self.total_entry_bytes)
    }
}

/// `ceil(total / 2048) * 2048`
pub fn rounded_length(total: usize) -> u32 {
    (total.div_ceil(CHUNK_LIMIT) * CHUNK_LIMIT) as u32
}

/// Share context word for a directory handle
pub fn share_context(dir_handle: u32) -> u32 {
    (dir_handle & 0xFFFF_FF00) ^ SHARE_CONTEXT_XOR
}

/// The directory description that follows the first chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trailer {
    /// Date word of the directory
    pub date_word: u32,
    /// Rounded listing length
    pub rounded_len: u32,
    /// Access bits of the directory
    pub access: u32,
    /// Share context word
    pub share_context: u32,
    /// Stable directory handle
    pub dir_handle: u32,
    /// Entry bytes in the first chunk
    pub first_len: u32,
    /// Continuation marker
    pub marker: u32,
}

impl Trailer {
    /// Append the eight trailer words
    pub fn encode(&self, w: &mut WordWriter) {
        w.words(&[
            TRAILER_FILETYPE,
            self.date_word,
            self.rounded_len,
            self.access,
            self.share_context,
            self.dir_handle,
            self.first_len,
            self.marker,
        ]);
    }

    /// Decode the eight trailer words
    ///
    /// # Errors
    /// Fails on a short body
    pub fn decode(r: &mut sharefs_wire::WordReader<'_>) -> Result<Self, sharefs_wire::FrameError> {
        let _ft = r.word()?;
        Ok(Self {
            date_word: r.word()?,
            rounded_len: r.word()?,
            access: r.word()?,
            share_context: r.word()?,
            dir_handle: r.word()?,
            first_len: r.word()?,
            marker: r.word()?,
        })
    }
}

/// Result of a continuation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    /// Next chunk and the marker to send with it
    Chunk {
        /// Encoded chunk
        bytes: Vec<u8>,
        /// Marker the client must echo next time
        marker: u32,
    },
    /// Echo did not match; a retransmit of an already answered request
    Duplicate,
    /// Nothing pending for this directory and peer
    Exhausted,
}

#[derive(Debug)]
struct Pending {
    chunks: VecDeque<Vec<u8>>,
    marker: u32,
    served: usize,
}

/// Chunks waiting for continuation, keyed by `(dir_handle, peer)`
#[derive(Debug, Default)]
pub struct CatalogueCache {
    pending: HashMap<(u32, Ipv4Addr), Pending>,
}

impl CatalogueCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Park the chunks after the first and return the marker for the first
    /// reply. Any earlier listing for the same key is replaced.
    pub fn store(&mut self, dir_handle: u32, peer: Ipv4Addr, rest: Vec<Vec<u8>>) -> u32 {
        if rest.is_empty() {
            self.pending.remove(&(dir_handle, peer));
            return FINAL_MARKER;
        }
        self.pending.insert(
            (dir_handle, peer),
            Pending {
                chunks: rest.into(),
                marker: FIRST_MARKER,
                served: 0,
            },
        );
        FIRST_MARKER
    }

    /// Serve the next chunk if `echo` matches the last marker sent
    pub fn next(&mut self, dir_handle: u32, peer: Ipv4Addr, echo: u32) -> Continuation {
        let key = (dir_handle, peer);
        let Some(pending) = self.pending.get_mut(&key) else {
            return Continuation::Exhausted;
        };
        if echo != pending.marker {
            tracing::debug!(
                "Discarding catalogue continuation from {} (echo {:#x}, expected {:#x})",
                peer,
                echo,
                pending.marker
            );
            return Continuation::Duplicate;
        }
        let Some(bytes) = pending.chunks.pop_front() else {
            self.pending.remove(&key);
            return Continuation::Exhausted;
        };
        if pending.chunks.is_empty() {
            self.pending.remove(&key);
            return Continuation::Chunk {
                bytes,
                marker: FINAL_MARKER,
            };
        }
        let marker = MARKER_CYCLE[pending.served % MARKER_CYCLE.len()];
        pending.served += 1;
        pending.marker = marker;
        Continuation::Chunk { bytes, marker }
    }

    /// Drop everything pending for `peer`
    pub fn forget_peer(&mut self, peer: Ipv4Addr) {
        self.pending.retain(|(_, p), _| *p != peer);
    }

    /// Number of pending listings
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// An empty chunk, sent when a continuation finds nothing pending
pub fn empty_chunk() -> Vec<u8> {
    let mut w = WordWriter::with_capacity(8);
    w.word(0).word(CHUNK_TAG);
    w.finish()
}
