//! Name translation between RISC OS and the host filesystem.
//!
//! RISC OS uses `.` as its path separator and `/` where POSIX names use a
//! dot, and clients send hard spaces (0xA0) for spaces. Names travel as
//! Latin-1.

use crate::error::ShareError;
use crate::share::Presentation;
use std::io;
use std::path::Path;

/// Filetype information carried in an on-disk name suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameStamp {
    /// `,xxx`
    Filetype(u16),
    /// `,llllllll-eeeeeeee`
    LoadExec {
        /// Load address
        load: u32,
        /// Exec address
        exec: u32,
    },
}

impl NameStamp {
    /// Suffix text for this stamp, including the comma
    pub fn suffix(&self) -> String {
        match self {
            Self::Filetype(ft) => format!(",{:03x}", ft & 0xFFF),
            Self::LoadExec { load, exec } => format!(",{load:08x}-{exec:08x}"),
        }
    }
}

fn parse_hex(s: &str, digits: usize) -> Option<u32> {
    if s.len() == digits && s.bytes().all(|b| b.is_ascii_hexdigit()) {
        u32::from_str_radix(s, 16).ok()
    } else {
        None
    }
}

/// Split a disk name into base and filetype suffix
pub fn split_suffix(name: &str) -> (&str, Option<NameStamp>) {
    let Some(comma) = name.rfind(',') else {
        return (name, None);
    };
    let (base, tail) = (&name[..comma], &name[comma + 1..]);
    if base.is_empty() {
        return (name, None);
    }
    if let Some(ft) = parse_hex(tail, 3) {
        return (base, Some(NameStamp::Filetype(ft as u16)));
    }
    if let Some((l, e)) = tail.split_once('-') {
        if let (Some(load), Some(exec)) = (parse_hex(l, 8), parse_hex(e, 8)) {
            return (base, Some(NameStamp::LoadExec { load, exec }));
        }
    }
    (name, None)
}

/// The name a client sees for a disk name, plus any suffix stamp
pub fn present(disk: &str, presentation: Presentation) -> (&str, Option<NameStamp>) {
    let (base, stamp) = split_suffix(disk);
    match presentation {
        Presentation::Truncate => (base, stamp),
        Presentation::Suffix => (disk, stamp),
    }
}

/// Translate one RISC OS path element to a local name
///
/// # Errors
/// Rejects empty names and the special names `.` and `..`
pub fn riscos_to_local(element: &[u8]) -> Result<String, ShareError> {
    let name: String = element
        .iter()
        .map(|&b| match b {
            b'/' => '.',
            0xA0 => ' ',
            other => other as char,
        })
        .collect();
    if name.is_empty() || name == "." || name == ".." || name.contains(['\0', '/']) {
        return Err(ShareError::InvalidName(name));
    }
    Ok(name)
}

/// Translate a local name to RISC OS bytes
pub fn local_to_riscos(name: &str) -> Vec<u8> {
    name.chars()
        .map(|c| match c {
            '.' => b'/',
            ' ' => 0xA0,
            c if (c as u32) < 0x100 => c as u8,
            _ => b'?',
        })
        .collect()
}

/// Split a wire path into the share name and translated interior elements.
///
/// A leading `$` interior element (the share root) is dropped.
///
/// # Errors
/// Fails on an empty share name or an untranslatable element
pub fn split_path(path: &[u8]) -> Result<(String, Vec<String>), ShareError> {
    let mut parts = path.split(|&b| b == b'.');
    let share = parts.next().unwrap_or_default();
    if share.is_empty() {
        return Err(ShareError::ShareUnavailable(String::new()));
    }
    let share = sharefs_wire::codec::latin1_decode(share).to_lowercase();

    let mut elements = Vec::new();
    let rest: Vec<&[u8]> = parts.collect();
    for (i, part) in rest.iter().enumerate() {
        if part.is_empty() && i + 1 == rest.len() {
            break;
        }
        if i == 0 && *part == b"$" {
            continue;
        }
        elements.push(riscos_to_local(part)?);
    }
    Ok((share, elements))
}

/// Find the disk name in `dir` that a client means by `want`.
///
/// An exact disk name wins; then an exact presented name; then a
/// case-insensitive presented name.
pub fn find_entry(dir: &Path, want: &str, presentation: Presentation) -> io::Result<Option<String>> {
    if dir.join(want).symlink_metadata().is_ok() {
        return Ok(Some(want.to_string()));
    }
    let want_folded = want.to_lowercase();
    let mut folded_match = None;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let Ok(disk) = entry.file_name().into_string() else {
            continue;
        };
        let (shown, _) = present(&disk, presentation);
        if shown == want {
            return Ok(Some(disk));
        }
        if folded_match.is_none() && shown.to_lowercase() == want_folded {
            folded_match = Some(disk);
        }
    }
    Ok(folded_match)
}
