//! Object info records.

use crate::filetype::FiletypeMapper;
use crate::names::{self, NameStamp};
use crate::share::Share;
use crate::DIRECTORY_LENGTH;
use sharefs_wire::WordWriter;
use sharefs_wire::riscos::{self, FILETYPE_SHARE};
use std::fs::Metadata;
use std::os::unix::fs::PermissionsExt;
use std::time::UNIX_EPOCH;

/// Object type word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ObjectType {
    /// Regular file
    File = 1,
    /// Directory
    Directory = 2,
    /// The root of a share
    ShareRoot = 0x102,
}

/// The five-word description of a file, directory or share root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Filetype word (or load address)
    pub ft_word: u32,
    /// Date word (or exec address)
    pub date_word: u32,
    /// Length in bytes; `0x800` for directories
    pub length: u32,
    /// RISC OS access bits
    pub access: u32,
    /// Object type
    pub object_type: ObjectType,
}

impl ObjectInfo {
    /// Number of bytes [`ObjectInfo::encode`] writes
    pub const WIRE_SIZE: usize = 20;

    /// Describe `disk_name` with metadata `meta` inside `share`
    pub fn describe(share: &Share, disk_name: &str, meta: &Metadata, mapper: &dyn FiletypeMapper) -> Self {
        let mode = meta.permissions().mode() & share.mode_mask();
        let access = riscos::access_from_mode(mode);
        let mtime = meta.modified().unwrap_or(UNIX_EPOCH);

        if meta.is_dir() {
            let (ft_word, date_word) =
                riscos::pack_filetype_date(FILETYPE_SHARE, riscos::centis_from_system_time(mtime));
            return Self {
                ft_word,
                date_word,
                length: DIRECTORY_LENGTH,
                access,
                object_type: ObjectType::Directory,
            };
        }

        let (_, stamp) = names::split_suffix(disk_name);
        let (ft_word, date_word) = match stamp {
            Some(NameStamp::LoadExec { load, exec }) => (load, exec),
            Some(NameStamp::Filetype(ft)) => {
                riscos::pack_filetype_date(ft, riscos::centis_from_system_time(mtime))
            }
            None => {
                let ft = disk_name
                    .rsplit_once('.')
                    .and_then(|(_, ext)| mapper.filetype_for_extension(&ext.to_ascii_lowercase()))
                    .unwrap_or(share.default_filetype());
                riscos::pack_filetype_date(ft, riscos::centis_from_system_time(mtime))
            }
        };

        Self {
            ft_word,
            date_word,
            length: u32::try_from(meta.len()).unwrap_or(u32::MAX),
            access,
            object_type: ObjectType::File,
        }
    }

    /// The synthetic record for a share's root
    pub fn share_root(share: &Share) -> Self {
        let (ft_word, date_word) = riscos::pack_filetype_date(
            FILETYPE_SHARE,
            riscos::centis_from_system_time(share.created()),
        );
        Self {
            ft_word,
            date_word,
            length: DIRECTORY_LENGTH,
            access: riscos::access_from_mode(share.mode_mask()),
            object_type: ObjectType::ShareRoot,
        }
    }

    /// Append the five words
    pub fn encode(&self, w: &mut WordWriter) {
        w.words(&[
            self.ft_word,
            self.date_word,
            self.length,
            self.access,
            self.object_type as u32,
        ]);
    }

    /// Decode five words
    ///
    /// # Errors
    /// Fails on a short body or an unknown object type
    pub fn decode(r: &mut sharefs_wire::WordReader<'_>) -> Result<Self, sharefs_wire::FrameError> {
        let ft_word = r.word()?;
        let date_word = r.word()?;
        let length = r.word()?;
        let access = r.word()?;
        let object_type = match r.word()? {
            1 => ObjectType::File,
            2 => ObjectType::Directory,
            0x102 => ObjectType::ShareRoot,
            other => return Err(sharefs_wire::FrameError::InvalidOpcode(other)),
        };
        Ok(Self {
            ft_word,
            date_word,
            length,
            access,
            object_type,
        })
    }

    /// Decoded filetype/date pair
    pub fn stamp(&self) -> riscos::Stamp {
        riscos::unpack_filetype_date(self.ft_word, self.date_word)
    }

    /// Whether this is a directory or share root
    pub fn is_directory(&self) -> bool {
        matches!(self.object_type, ObjectType::Directory | ObjectType::ShareRoot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filetype::StaticMimeMap;
    use crate::share::{Presentation, ShareConfig};
    use sharefs_wire::WordReader;

    fn share(dir: &std::path::Path, mask: u32) -> Share {
        let mut cfg = ShareConfig::new("docs", dir);
        cfg.mode_mask = mask;
        cfg.presentation = Presentation::Truncate;
        cfg.default_filetype = 0xFFD;
        Share::new(cfg).unwrap()
    }

    #[test]
    fn test_file_with_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello,c85");
        std::fs::write(&path, b"Hello").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        let share = share(dir.path(), 0o777);
        let meta = std::fs::metadata(&path).unwrap();
        let info = ObjectInfo::describe(&share, "hello,c85", &meta, &StaticMimeMap::default());
        assert_eq!(info.length, 5);
        assert_eq!(info.object_type, ObjectType::File);
        assert_eq!(info.stamp().filetype(), Some(0xC85));
        assert_eq!(info.access, 0x13);
    }

    #[test]
    fn test_mask_applies_and_extension_maps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.html");
        std::fs::write(&path, b"<p>").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o666)).unwrap();
        let share = share(dir.path(), 0o755);
        let meta = std::fs::metadata(&path).unwrap();
        let info = ObjectInfo::describe(&share, "page.html", &meta, &StaticMimeMap::default());
        assert_eq!(info.stamp().filetype(), Some(0xFAF));
        assert_eq!(info.access & riscos::ACCESS_PUBLIC_WRITE, 0);
    }

    /// Mapper that only knows lower-case extensions
    struct LowerOnly;

    impl FiletypeMapper for LowerOnly {
        fn filetype_for_extension(&self, ext: &str) -> Option<u16> {
            (ext == "html").then_some(0xFAF)
        }

        fn extension_for_filetype(&self, filetype: u16) -> Option<&str> {
            (filetype == 0xFAF).then_some("html")
        }
    }

    #[test]
    fn test_extension_folded_before_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.HTML");
        std::fs::write(&path, b"<p>").unwrap();
        let share = share(dir.path(), 0o777);
        let meta = std::fs::metadata(&path).unwrap();
        let info = ObjectInfo::describe(&share, "page.HTML", &meta, &LowerOnly);
        assert_eq!(info.stamp().filetype(), Some(0xFAF));
    }

    #[test]
    fn test_default_filetype_and_load_exec() {
        let dir = tempfile::tempdir().unwrap();
        let share = share(dir.path(), 0o777);
        std::fs::write(dir.path().join("blob"), b"").unwrap();
        std::fs::write(dir.path().join("prog,00008000-00008004"), b"").unwrap();
        let map = StaticMimeMap::default();

        let meta = std::fs::metadata(dir.path().join("blob")).unwrap();
        assert_eq!(ObjectInfo::describe(&share, "blob", &meta, &map).stamp().filetype(), Some(0xFFD));

        let meta = std::fs::metadata(dir.path().join("prog,00008000-00008004")).unwrap();
        let info = ObjectInfo::describe(&share, "prog,00008000-00008004", &meta, &map);
        assert_eq!((info.ft_word, info.date_word), (0x8000, 0x8004));
    }

    #[test]
    fn test_share_root_and_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let share = share(dir.path(), 0o777);
        let info = ObjectInfo::share_root(&share);
        assert_eq!(info.object_type, ObjectType::ShareRoot);
        assert_eq!(info.length, 0x800);
        assert_eq!(info.ft_word >> 8, 0xFFFFCD);

        let mut w = WordWriter::new();
        info.encode(&mut w);
        let bytes = w.finish();
        assert_eq!(bytes.len(), ObjectInfo::WIRE_SIZE);
        let back = ObjectInfo::decode(&mut WordReader::new(&bytes)).unwrap();
        assert_eq!(back, info);
    }
}
