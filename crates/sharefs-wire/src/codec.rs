//! Little-endian word packing.
//!
//! Every message is a sequence of 32-bit little-endian words, optionally
//! followed by raw bytes. Strings are NUL-terminated and padded to a 4-byte
//! boundary; counted strings (discovery) carry their length in a preceding
//! word and are padded the same way.

use crate::error::FrameError;

/// Number of NUL bytes needed to pad `len` to a 4-byte boundary
#[inline]
pub fn pad_len(len: usize) -> usize {
    (4 - (len % 4)) % 4
}

/// Append-only word writer
#[derive(Debug, Default, Clone)]
pub struct WordWriter {
    buf: Vec<u8>,
}

impl WordWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with preallocated capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Append a 32-bit little-endian word
    pub fn word(&mut self, w: u32) -> &mut Self {
        self.buf.extend_from_slice(&w.to_le_bytes());
        self
    }

    /// Append several words
    pub fn words(&mut self, ws: &[u32]) -> &mut Self {
        for w in ws {
            self.word(*w);
        }
        self
    }

    /// Append raw bytes without padding
    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(data);
        self
    }

    /// Append bytes followed by NUL padding to a 4-byte boundary
    pub fn padded(&mut self, data: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(data);
        self.buf.extend(std::iter::repeat_n(0u8, pad_len(data.len())));
        self
    }

    /// Append a NUL-terminated string padded to a 4-byte boundary
    pub fn string(&mut self, s: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(s);
        self.buf.push(0);
        self.buf.extend(std::iter::repeat_n(0u8, pad_len(s.len() + 1)));
        self
    }

    /// Append a NUL-terminated string without alignment padding
    pub fn terminated(&mut self, s: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(s);
        self.buf.push(0);
        self
    }

    /// Current length in bytes
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consume the writer and return the encoded bytes
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over an encoded message
#[derive(Debug, Clone)]
pub struct WordReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WordReader<'a> {
    /// Start reading at the beginning of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Read one 32-bit little-endian word
    pub fn word(&mut self) -> Result<u32, FrameError> {
        let end = self.pos + 4;
        if end > self.data.len() {
            return Err(FrameError::TooShort {
                expected: end,
                actual: self.data.len(),
            });
        }
        let w = u32::from_le_bytes([
            self.data[self.pos],
            self.data[self.pos + 1],
            self.data[self.pos + 2],
            self.data[self.pos + 3],
        ]);
        self.pos = end;
        Ok(w)
    }

    /// Read one word if present
    pub fn optional_word(&mut self) -> Option<u32> {
        if self.remaining_len() >= 4 {
            self.word().ok()
        } else {
            None
        }
    }

    /// Read a NUL-terminated string; the cursor skips the terminator and any
    /// alignment padding that follows it
    pub fn string(&mut self) -> Result<&'a [u8], FrameError> {
        let start = self.pos;
        let rest = &self.data[start..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(FrameError::UnterminatedString(start))?;
        let s = &rest[..nul];
        let consumed = nul + 1;
        self.pos = (start + consumed + pad_len(consumed)).min(self.data.len());
        Ok(s)
    }

    /// Read a string that may run to the end of the frame without a terminator
    pub fn lenient_string(&mut self) -> &'a [u8] {
        let start = self.pos;
        let rest = &self.data[start..];
        match rest.iter().position(|&b| b == 0) {
            Some(nul) => {
                let consumed = nul + 1;
                self.pos = (start + consumed + pad_len(consumed)).min(self.data.len());
                &rest[..nul]
            }
            None => {
                self.pos = self.data.len();
                rest
            }
        }
    }

    /// Read `len` bytes followed by alignment padding
    pub fn counted(&mut self, len: usize) -> Result<&'a [u8], FrameError> {
        let remaining = self.remaining_len();
        if len > remaining {
            return Err(FrameError::LengthOverflow {
                claimed: len,
                remaining,
            });
        }
        let s = &self.data[self.pos..self.pos + len];
        self.pos = (self.pos + len + pad_len(len)).min(self.data.len());
        Ok(s)
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    /// Number of bytes not yet consumed
    pub fn remaining_len(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Whether the cursor reached the end
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Current offset
    pub fn position(&self) -> usize {
        self.pos
    }
}

/// Convert a local (UTF-8) name to wire bytes (Latin-1).
///
/// Characters outside Latin-1 become `?`.
pub fn latin1_encode(s: &str) -> Vec<u8> {
    s.chars()
        .map(|c| if (c as u32) < 0x100 { c as u8 } else { b'?' })
        .collect()
}

/// Convert wire bytes (Latin-1) to a Rust string
pub fn latin1_decode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}
