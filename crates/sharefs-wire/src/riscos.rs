//! RISC OS filetype, date and access translation.
//!
//! RISC OS stamps a file with two words. In the usual *typed* form the first
//! word holds `0xFFF` in bits 31:20, the 12-bit filetype in bits 19:8 and the
//! top byte of a 40-bit centisecond date in bits 7:0; the second word holds
//! the low 32 bits of the date. Any other value in bits 31:20 means both
//! words are raw load/exec addresses.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Centiseconds between 1900-01-01 and 1970-01-01
pub const BETWEEN_EPOCHS: u64 = ((365 * 70) + 17) * 24 * 360_000;

/// Largest representable centisecond value (40 bits)
pub const MAX_CENTIS: u64 = 0xFF_FFFF_FFFF;

/// Marker in bits 31:20 of a typed filetype word
pub const TYPED_MARKER: u32 = 0xFFF;

/// Plain text
pub const FILETYPE_TEXT: u16 = 0xFFF;
/// Untyped data
pub const FILETYPE_DATA: u16 = 0xFFD;
/// Share / directory pseudo-type
pub const FILETYPE_SHARE: u16 = 0xFCD;

/// Owner read
pub const ACCESS_OWNER_READ: u32 = 0x01;
/// Owner write
pub const ACCESS_OWNER_WRITE: u32 = 0x02;
/// Owner execute
pub const ACCESS_OWNER_EXEC: u32 = 0x04;
/// Public read
pub const ACCESS_PUBLIC_READ: u32 = 0x10;
/// Public write
pub const ACCESS_PUBLIC_WRITE: u32 = 0x20;

/// Decoded filetype/date word pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stamp {
    /// Filetype plus centisecond date
    Typed {
        /// 12-bit filetype
        filetype: u16,
        /// Centiseconds since 1900-01-01
        centis: u64,
    },
    /// Raw load and exec addresses
    LoadExec {
        /// Load address
        load: u32,
        /// Exec address
        exec: u32,
    },
}

impl Stamp {
    /// Typed stamp for a filetype at the given POSIX time
    pub fn typed(filetype: u16, time: SystemTime) -> Self {
        Self::Typed {
            filetype: filetype & 0xFFF,
            centis: centis_from_system_time(time),
        }
    }

    /// Encode to `(filetype_word, date_word)`
    pub fn to_words(self) -> (u32, u32) {
        match self {
            Self::Typed { filetype, centis } => pack_filetype_date(filetype, centis),
            Self::LoadExec { load, exec } => (load, exec),
        }
    }

    /// Filetype, when typed
    pub fn filetype(&self) -> Option<u16> {
        match self {
            Self::Typed { filetype, .. } => Some(*filetype),
            Self::LoadExec { .. } => None,
        }
    }

    /// POSIX time, when typed
    pub fn posix_time(&self) -> Option<SystemTime> {
        match self {
            Self::Typed { centis, .. } => Some(system_time_from_centis(*centis)),
            Self::LoadExec { .. } => None,
        }
    }
}

/// Pack a filetype and centisecond date into `(filetype_word, date_word)`
pub fn pack_filetype_date(filetype: u16, centis: u64) -> (u32, u32) {
    let centis = centis & MAX_CENTIS;
    let ft_word = (TYPED_MARKER << 20) | ((filetype as u32 & 0xFFF) << 8) | ((centis >> 32) as u32);
    (ft_word, centis as u32)
}

/// Unpack a filetype/date word pair, detecting load/exec addressing
pub fn unpack_filetype_date(ft_word: u32, date_word: u32) -> Stamp {
    if ft_word >> 20 != TYPED_MARKER {
        return Stamp::LoadExec {
            load: ft_word,
            exec: date_word,
        };
    }
    Stamp::Typed {
        filetype: ((ft_word >> 8) & 0xFFF) as u16,
        centis: (((ft_word & 0xFF) as u64) << 32) | date_word as u64,
    }
}

/// Convert a POSIX time to RISC OS centiseconds, truncating to centisecond
/// resolution and clamping to the 40-bit range
pub fn centis_from_system_time(time: SystemTime) -> u64 {
    let centis = match time.duration_since(UNIX_EPOCH) {
        Ok(since) => BETWEEN_EPOCHS.saturating_add((since.as_nanos() / 10_000_000) as u64),
        Err(before) => {
            let back = before.duration().as_nanos().div_ceil(10_000_000) as u64;
            BETWEEN_EPOCHS.saturating_sub(back)
        }
    };
    centis.min(MAX_CENTIS)
}

/// Convert RISC OS centiseconds to a POSIX time
pub fn system_time_from_centis(centis: u64) -> SystemTime {
    if centis >= BETWEEN_EPOCHS {
        UNIX_EPOCH + Duration::from_millis((centis - BETWEEN_EPOCHS) * 10)
    } else {
        UNIX_EPOCH - Duration::from_millis((BETWEEN_EPOCHS - centis) * 10)
    }
}

/// POSIX mode to RISC OS access bits.
///
/// Owner r/w/x map to bits 0/1/2, other r/w to bits 4/5.
pub fn access_from_mode(mode: u32) -> u32 {
    let mut access = 0;
    if mode & 0o400 != 0 {
        access |= ACCESS_OWNER_READ;
    }
    if mode & 0o200 != 0 {
        access |= ACCESS_OWNER_WRITE;
    }
    if mode & 0o100 != 0 {
        access |= ACCESS_OWNER_EXEC;
    }
    if mode & 0o004 != 0 {
        access |= ACCESS_PUBLIC_READ;
    }
    if mode & 0o002 != 0 {
        access |= ACCESS_PUBLIC_WRITE;
    }
    access
}

/// RISC OS access bits to a POSIX mode; public bits mirror to group and other
pub fn mode_from_access(access: u32) -> u32 {
    let mut mode = 0;
    if access & ACCESS_OWNER_READ != 0 {
        mode |= 0o400;
    }
    if access & ACCESS_OWNER_WRITE != 0 {
        mode |= 0o200;
    }
    if access & ACCESS_OWNER_EXEC != 0 {
        mode |= 0o100;
    }
    if access & ACCESS_PUBLIC_READ != 0 {
        mode |= 0o044;
    }
    if access & ACCESS_PUBLIC_WRITE != 0 {
        mode |= 0o022;
    }
    mode
}
