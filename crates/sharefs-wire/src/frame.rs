//! Frame header encoding and decoding.
//!
//! Byte 0 is the ASCII command letter, bytes 1..4 the correlation id. Taken
//! together they form the first little-endian word: `command | (id << 8)`.

use crate::codec::{WordReader, WordWriter};
use crate::error::{FrameError, WireError};

/// Size of the command + correlation id header
pub const HEADER_SIZE: usize = 4;

/// Mask for the 24-bit correlation id
pub const ID_MASK: u32 = 0x00FF_FFFF;

/// Command letters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Request (pipelined transfers, most operations)
    Request = b'A',
    /// Simple request (one-shot read, catalogue)
    SimpleRequest = b'B',
    /// Read data or read control, server to client
    Data = b'D',
    /// Reply to an `A` request
    Reply = b'R',
    /// Reply to a `B` request
    SimpleReply = b'S',
    /// Error reply
    Error = b'E',
    /// Write data, client to server
    WriteData = b'd',
    /// Read window, client to server
    ReadWindow = b'r',
    /// Write window request, server to client
    WriteWindow = b'w',
    /// Resource updated notification
    Updated = b'F',
}

impl TryFrom<u8> for Command {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, FrameError> {
        match value {
            b'A' => Ok(Self::Request),
            b'B' => Ok(Self::SimpleRequest),
            b'D' => Ok(Self::Data),
            b'R' => Ok(Self::Reply),
            b'S' => Ok(Self::SimpleReply),
            b'E' => Ok(Self::Error),
            b'd' => Ok(Self::WriteData),
            b'r' => Ok(Self::ReadWindow),
            b'w' => Ok(Self::WriteWindow),
            b'F' => Ok(Self::Updated),
            other => Err(FrameError::InvalidCommand(other)),
        }
    }
}

/// Which side of an exchange a frame is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Frames the requesting peer waits for (`D R S E w`)
    ToRequester,
    /// Frames a serving transfer task waits for (`d r`)
    ToResponder,
}

impl Command {
    /// Inbox direction for reply-class frames; `None` for requests and notifications
    pub fn direction(self) -> Option<Direction> {
        match self {
            Self::Data | Self::Reply | Self::SimpleReply | Self::Error | Self::WriteWindow => {
                Some(Direction::ToRequester)
            }
            Self::WriteData | Self::ReadWindow => Some(Direction::ToResponder),
            Self::Request | Self::SimpleRequest | Self::Updated => None,
        }
    }

    /// Whether this letter opens a new exchange
    pub fn is_request(self) -> bool {
        matches!(self, Self::Request | Self::SimpleRequest)
    }

    /// The reply letter matching a request letter
    pub fn reply_letter(self) -> Self {
        match self {
            Self::SimpleRequest => Self::SimpleReply,
            _ => Self::Reply,
        }
    }

    /// Raw byte value
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Request sub-codes (word 1 of `A`/`B` frames)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Opcode {
    /// Open existing object for reading
    OpenRead = 0x1,
    /// Open existing object for reading and writing
    OpenUpdate = 0x2,
    /// Catalogue a directory
    Catalogue = 0x3,
    /// Create and open a file
    CreateFile = 0x4,
    /// Create a directory
    CreateDirectory = 0x5,
    /// Delete an object
    Delete = 0x6,
    /// Set access bits
    SetAccess = 0x7,
    /// Free space query
    FreeSpace = 0x8,
    /// Rename an object
    Rename = 0x9,
    /// Close a handle
    Close = 0xA,
    /// Read from a handle
    Read = 0xB,
    /// Write to a handle
    Write = 0xC,
    /// Next catalogue chunk
    CatalogueContinue = 0xD,
    /// Set file length
    SetLength = 0xE,
    /// Set file length (alternate code)
    SetLengthAlt = 0xF,
    /// Set filetype and date
    SetFiletype = 0x10,
    /// Free space query (alternate code)
    FreeSpaceAlt = 0x16,
}

impl TryFrom<u32> for Opcode {
    type Error = FrameError;

    fn try_from(value: u32) -> Result<Self, FrameError> {
        Ok(match value {
            0x1 => Self::OpenRead,
            0x2 => Self::OpenUpdate,
            0x3 => Self::Catalogue,
            0x4 => Self::CreateFile,
            0x5 => Self::CreateDirectory,
            0x6 => Self::Delete,
            0x7 => Self::SetAccess,
            0x8 => Self::FreeSpace,
            0x9 => Self::Rename,
            0xA => Self::Close,
            0xB => Self::Read,
            0xC => Self::Write,
            0xD => Self::CatalogueContinue,
            0xE => Self::SetLength,
            0xF => Self::SetLengthAlt,
            0x10 => Self::SetFiletype,
            0x16 => Self::FreeSpaceAlt,
            other => return Err(FrameError::InvalidOpcode(other)),
        })
    }
}

/// Zero-copy view of a received datagram
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    raw: &'a [u8],
    command: Command,
    id: u32,
}

impl<'a> Frame<'a> {
    /// Parse the header of a datagram
    pub fn parse(data: &'a [u8]) -> Result<Self, FrameError> {
        if data.len() < HEADER_SIZE {
            return Err(FrameError::TooShort {
                expected: HEADER_SIZE,
                actual: data.len(),
            });
        }
        let command = Command::try_from(data[0])?;
        let id = u32::from_le_bytes([data[1], data[2], data[3], 0]);
        Ok(Self {
            raw: data,
            command,
            id,
        })
    }

    /// Command letter
    pub fn command(&self) -> Command {
        self.command
    }

    /// 24-bit correlation id
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Bytes after the header
    pub fn payload(&self) -> &'a [u8] {
        &self.raw[HEADER_SIZE..]
    }

    /// Entire datagram
    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }

    /// Cursor over the payload
    pub fn reader(&self) -> WordReader<'a> {
        WordReader::new(self.payload())
    }

    /// Request sub-code (word 1); only meaningful for `A`/`B` frames
    pub fn opcode(&self) -> Result<Opcode, FrameError> {
        let mut r = self.reader();
        Opcode::try_from(r.word()?)
    }

    /// Decode the body of an `E` frame
    pub fn wire_error(&self) -> Result<WireError, FrameError> {
        let mut r = self.reader();
        let code = r.word()?;
        let message = crate::codec::latin1_decode(r.lenient_string());
        Ok(WireError { code, message })
    }
}

/// Builder for outbound frames
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    writer: WordWriter,
}

impl FrameBuilder {
    /// Start a frame with the given command and correlation id
    pub fn new(command: Command, id: u32) -> Self {
        let mut writer = WordWriter::with_capacity(64);
        writer.word(command.as_u8() as u32 | ((id & ID_MASK) << 8));
        Self { writer }
    }

    /// Start a request frame with a sub-code
    pub fn request(command: Command, id: u32, opcode: Opcode) -> Self {
        Self::new(command, id).word(opcode as u32)
    }

    /// Append a word
    pub fn word(mut self, w: u32) -> Self {
        self.writer.word(w);
        self
    }

    /// Append several words
    pub fn words(mut self, ws: &[u32]) -> Self {
        self.writer.words(ws);
        self
    }

    /// Append a NUL-terminated, padded string
    pub fn string(mut self, s: &[u8]) -> Self {
        self.writer.string(s);
        self
    }

    /// Append raw bytes
    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.writer.bytes(data);
        self
    }

    /// Finish the frame
    pub fn build(self) -> Vec<u8> {
        self.writer.finish()
    }
}

/// Encode an `E` packet
pub fn error_frame(id: u32, err: &WireError) -> Vec<u8> {
    let mut writer = WordWriter::with_capacity(16 + err.message.len());
    writer.word(Command::Error.as_u8() as u32 | ((id & ID_MASK) << 8));
    writer.word(err.code);
    writer.terminated(&crate::codec::latin1_encode(&err.message));
    writer.finish()
}
