//! Discovery message codec.

use crate::error::DiscoveryError;
use sharefs_wire::codec::{latin1_decode, latin1_encode};
use sharefs_wire::{WordReader, WordWriter};

/// Share type word carried by share adverts and secure replies
pub const SHARE_TYPE_WORD: u32 = 0x0001_0001;

/// Tag in the high half of a share name length word
const SHARE_LEN_TAG: u32 = 0x0001_0000;

/// Header of a secure-share request
pub const SECURE_REQUEST: u32 = 0x0001_0001;

/// Header of a secure-share reply
pub const SECURE_REPLY: u32 = 0x0001_0004;

/// Discovery class (major code)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Class {
    /// Share adverts
    Share = 0x1,
    /// Printer adverts
    Printer = 0x2,
    /// Peer presence
    Peer = 0x5,
}

impl TryFrom<u16> for Class {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, u16> {
        match value {
            0x1 => Ok(Self::Share),
            0x2 => Ok(Self::Printer),
            0x5 => Ok(Self::Peer),
            other => Err(other),
        }
    }
}

/// Lifecycle phase (minor code)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Phase {
    /// Sent once when the object appears
    Startup = 0x1,
    /// Answer to a query, or first advert
    Available = 0x2,
    /// Sent once when the object goes away
    Withdrawn = 0x3,
    /// Periodic refresh
    Heartbeat = 0x4,
}

impl TryFrom<u16> for Phase {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, u16> {
        match value {
            0x1 => Ok(Self::Startup),
            0x2 => Ok(Self::Available),
            0x3 => Ok(Self::Withdrawn),
            0x4 => Ok(Self::Heartbeat),
            other => Err(other),
        }
    }
}

fn class_word(class: Class, phase: Phase) -> u32 {
    ((class as u32) << 16) | phase as u32
}

/// Identity and name of a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    /// Random identity drawn at startup
    pub identity: [u8; 4],
    /// Host name
    pub hostname: String,
}

/// A share as advertised on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareAdvert {
    /// Share name
    pub name: String,
    /// Share-kind bits
    pub kind: u8,
}

/// A printer as advertised on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrinterAdvert {
    /// Printer name
    pub name: String,
    /// Free-text description
    pub description: String,
}

/// A decoded discovery broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryMessage {
    /// Bare startup word asking listeners to announce themselves
    Query(Class),
    /// Peer presence
    Peer {
        /// Lifecycle phase
        phase: Phase,
        /// Sender identity
        host: HostInfo,
    },
    /// Share advert
    Share {
        /// Lifecycle phase
        phase: Phase,
        /// The share
        share: ShareAdvert,
    },
    /// Printer advert
    Printer {
        /// Lifecycle phase
        phase: Phase,
        /// The printer
        printer: PrinterAdvert,
    },
}

impl DiscoveryMessage {
    /// Encode to wire bytes
    ///
    /// # Errors
    /// Fails when a name does not fit its length field
    pub fn encode(&self) -> Result<Vec<u8>, DiscoveryError> {
        let mut w = WordWriter::with_capacity(64);
        match self {
            Self::Query(class) => {
                w.word(class_word(*class, Phase::Startup));
            }
            Self::Peer { phase, host } => {
                w.word(class_word(Class::Peer, *phase));
                write_host(&mut w, host)?;
            }
            Self::Share { phase, share } => {
                w.word(class_word(Class::Share, *phase));
                w.word(SHARE_TYPE_WORD);
                write_share_name(&mut w, &share.name, share.kind)?;
            }
            Self::Printer { phase, printer } => {
                w.word(class_word(Class::Printer, *phase));
                write_counted(&mut w, &printer.name)?;
                write_counted(&mut w, &printer.description)?;
            }
        }
        Ok(w.finish())
    }

    /// Decode a datagram received on the discovery port
    ///
    /// # Errors
    /// Fails on unknown class words or truncated bodies
    pub fn decode(data: &[u8]) -> Result<Self, DiscoveryError> {
        let mut r = WordReader::new(data);
        let head = r.word()?;
        let (major, minor) = ((head >> 16) as u16, (head & 0xFFFF) as u16);
        let unknown = || DiscoveryError::UnknownClass { major, minor };
        let class = Class::try_from(major).map_err(|_| unknown())?;
        let phase = Phase::try_from(minor).map_err(|_| unknown())?;

        if phase == Phase::Startup && r.is_empty() {
            return Ok(Self::Query(class));
        }

        Ok(match class {
            Class::Peer => Self::Peer {
                phase,
                host: read_host(&mut r)?,
            },
            Class::Share => {
                let _share_type = r.word()?;
                let (name, kind) = read_share_name(&mut r)?;
                Self::Share {
                    phase,
                    share: ShareAdvert { name, kind },
                }
            }
            Class::Printer => Self::Printer {
                phase,
                printer: PrinterAdvert {
                    name: read_counted(&mut r)?,
                    description: read_counted(&mut r)?,
                },
            },
        })
    }
}

/// Secure-share lookup sent on the secure port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecureRequest {
    /// Share key being looked up
    pub key: u32,
}

impl SecureRequest {
    /// Encode to wire bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WordWriter::with_capacity(12);
        w.words(&[SECURE_REQUEST, SHARE_TYPE_WORD, self.key]);
        w.finish()
    }

    /// Decode from wire bytes
    ///
    /// # Errors
    /// Fails when the header is not a secure request or the body is short
    pub fn decode(data: &[u8]) -> Result<Self, DiscoveryError> {
        let mut r = WordReader::new(data);
        let head = r.word()?;
        if head != SECURE_REQUEST {
            return Err(DiscoveryError::UnexpectedSecureHeader(head));
        }
        let _share_type = r.word()?;
        Ok(Self { key: r.word()? })
    }
}

/// Answer to a secure-share lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureReply {
    /// Key that matched
    pub key: u32,
    /// The matching share
    pub share: ShareAdvert,
}

impl SecureReply {
    /// Encode to wire bytes
    ///
    /// # Errors
    /// Fails when the share name does not fit its length field
    pub fn encode(&self) -> Result<Vec<u8>, DiscoveryError> {
        let name = latin1_encode(&self.share.name);
        let len = u16::try_from(name.len()).map_err(|_| DiscoveryError::NameTooLong(name.len()))?;
        let mut w = WordWriter::with_capacity(20 + name.len());
        w.words(&[
            SECURE_REPLY,
            SHARE_TYPE_WORD,
            SHARE_LEN_TAG | len as u32,
            self.key,
        ]);
        let mut body = name;
        body.push(self.share.kind);
        w.padded(&body);
        Ok(w.finish())
    }

    /// Decode from wire bytes
    ///
    /// # Errors
    /// Fails when the header is not a secure reply or the body is short
    pub fn decode(data: &[u8]) -> Result<Self, DiscoveryError> {
        let mut r = WordReader::new(data);
        let head = r.word()?;
        if head != SECURE_REPLY {
            return Err(DiscoveryError::UnexpectedSecureHeader(head));
        }
        let _share_type = r.word()?;
        let len = (r.word()? & 0xFFFF) as usize;
        let key = r.word()?;
        let body = r.counted(len + 1)?;
        Ok(Self {
            key,
            share: ShareAdvert {
                name: latin1_decode(&body[..len]),
                kind: body[len],
            },
        })
    }
}

fn write_host(w: &mut WordWriter, host: &HostInfo) -> Result<(), DiscoveryError> {
    w.word(u32::from_le_bytes(host.identity));
    write_counted(w, &host.hostname)
}

fn read_host(r: &mut WordReader<'_>) -> Result<HostInfo, DiscoveryError> {
    let identity = r.word()?.to_le_bytes();
    let hostname = read_counted(r)?;
    Ok(HostInfo { identity, hostname })
}

fn write_counted(w: &mut WordWriter, s: &str) -> Result<(), DiscoveryError> {
    let bytes = latin1_encode(s);
    let len = u32::try_from(bytes.len()).map_err(|_| DiscoveryError::NameTooLong(bytes.len()))?;
    w.word(len);
    w.padded(&bytes);
    Ok(())
}

fn read_counted(r: &mut WordReader<'_>) -> Result<String, DiscoveryError> {
    let len = r.word()? as usize;
    Ok(latin1_decode(r.counted(len)?))
}

fn write_share_name(w: &mut WordWriter, name: &str, kind: u8) -> Result<(), DiscoveryError> {
    let mut bytes = latin1_encode(name);
    let len = u16::try_from(bytes.len()).map_err(|_| DiscoveryError::NameTooLong(bytes.len()))?;
    w.word(SHARE_LEN_TAG | len as u32);
    bytes.push(kind);
    w.padded(&bytes);
    Ok(())
}

fn read_share_name(r: &mut WordReader<'_>) -> Result<(String, u8), DiscoveryError> {
    let len = (r.word()? & 0xFFFF) as usize;
    let body = r.counted(len + 1)?;
    Ok((latin1_decode(&body[..len]), body[len]))
}
