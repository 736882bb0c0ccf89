//! The share manager.
//!
//! Owns the local shares and every table that hangs off them: handles,
//! pending catalogue chunks and directory watches. Each table sits behind
//! its own lock; no method holds two table locks at once.

use crate::catalogue::{self, CatalogueCache, CatalogueEntry, Continuation, Listing, Trailer};
use crate::error::ShareError;
use crate::filetype::FiletypeMapper;
use crate::handles::{HandleTable, OpenBuffer, OpenDirectory, OpenFile, OpenObject, Role};
use crate::info::{ObjectInfo, ObjectType};
use crate::names::{self, NameStamp};
use crate::path::{self, Resolved};
use crate::share::{Presentation, Share, ShareConfig};
use crate::watch::WatchTable;
use crate::{DIR_EXEC, PROTECTED_READ, PROTECTED_WRITE};
use dashmap::DashMap;
use parking_lot::Mutex;
use sharefs_wire::codec::latin1_decode;
use sharefs_wire::riscos::{self, FILETYPE_SHARE, Stamp};
use sharefs_wire::{WordWriter, jenkins_one_at_a_time};
use std::fs::{self, OpenOptions};
use std::net::Ipv4Addr;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Whether `path` passes the write check under `share`'s mask
fn writable(share: &Share, path: &Path) -> Result<bool, ShareError> {
    let meta = fs::metadata(path).map_err(|e| ShareError::from_io(e, &path.display().to_string()))?;
    Ok(meta.permissions().mode() & PROTECTED_WRITE & share.mode_mask() != 0)
}

/// A handle together with the object it opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opened {
    /// Allocated handle
    pub handle: u32,
    /// Object description
    pub info: ObjectInfo,
}

/// Local shares and their open objects
pub struct ShareManager {
    shares: DashMap<String, Arc<Share>>,
    handles: Mutex<HandleTable>,
    catalogues: Mutex<CatalogueCache>,
    watches: Mutex<WatchTable>,
    mapper: Arc<dyn FiletypeMapper>,
}

impl ShareManager {
    /// Create a manager using `mapper` for extension lookups
    pub fn new(mapper: Arc<dyn FiletypeMapper>) -> Self {
        Self {
            shares: DashMap::new(),
            handles: Mutex::new(HandleTable::new()),
            catalogues: Mutex::new(CatalogueCache::new()),
            watches: Mutex::new(WatchTable::new()),
            mapper,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Share registry
    // ═══════════════════════════════════════════════════════════════════════

    /// Add a share
    ///
    /// # Errors
    /// Fails if the descriptor is invalid or the name is taken
    pub fn add_share(&self, config: ShareConfig) -> Result<Arc<Share>, ShareError> {
        let share = Arc::new(Share::new(config)?);
        let key = share.key_name().to_string();
        if self.shares.contains_key(&key) {
            return Err(ShareError::InvalidConfig(format!(
                "share {} already exists",
                share.name()
            )));
        }
        self.shares.insert(key, share.clone());
        tracing::info!("Sharing {} as {}", share.root().display(), share.name());
        Ok(share)
    }

    /// Remove a share; open handles keep working until closed
    pub fn remove_share(&self, name: &str) -> Option<Arc<Share>> {
        let removed = self.shares.remove(&name.to_lowercase()).map(|(_, s)| s);
        if let Some(share) = &removed {
            tracing::info!("Stopped sharing {}", share.name());
        }
        removed
    }

    /// Look a share up by name (case-insensitive)
    pub fn share(&self, name: &str) -> Option<Arc<Share>> {
        self.shares.get(&name.to_lowercase()).map(|s| s.clone())
    }

    /// Every local share, sorted by name
    pub fn shares(&self) -> Vec<Arc<Share>> {
        let mut v: Vec<_> = self.shares.iter().map(|e| e.value().clone()).collect();
        v.sort_by(|a, b| a.key_name().cmp(b.key_name()));
        v
    }

    /// Shares revealed by `key`
    pub fn shares_with_key(&self, key: u32) -> Vec<Arc<Share>> {
        self.shares()
            .into_iter()
            .filter(|s| s.is_secure() && s.key() == key)
            .collect()
    }

    /// The filetype mapper
    pub fn mapper(&self) -> &dyn FiletypeMapper {
        self.mapper.as_ref()
    }

    fn locate(&self, path: &[u8]) -> Result<(Arc<Share>, Vec<String>), ShareError> {
        let (name, elements) = names::split_path(path)?;
        let share = self
            .share(&name)
            .ok_or(ShareError::ShareUnavailable(name))?;
        Ok((share, elements))
    }

    fn describe(&self, share: &Share, resolved: &Resolved) -> ObjectInfo {
        if resolved.disk_name.is_empty() {
            ObjectInfo::share_root(share)
        } else {
            ObjectInfo::describe(share, &resolved.disk_name, &resolved.metadata, self.mapper())
        }
    }

    fn describe_path(&self, share: &Share, path: &Path, disk_name: &str) -> Result<ObjectInfo, ShareError> {
        let meta = fs::metadata(path).map_err(|e| ShareError::from_io(e, disk_name))?;
        Ok(ObjectInfo::describe(share, disk_name, &meta, self.mapper()))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Path operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Open an existing object
    ///
    /// # Errors
    /// Descent failures, or I/O errors opening the file
    pub fn open(&self, path: &[u8], user: Ipv4Addr, role: Role) -> Result<Opened, ShareError> {
        let (share, elements) = self.locate(path)?;
        let check = match role {
            Role::Read => PROTECTED_READ,
            Role::ReadWrite => PROTECTED_WRITE,
        };
        let resolved = path::descend(&share, &elements, check)?;
        let info = self.describe(&share, &resolved);

        let object = if resolved.metadata.is_dir() {
            OpenObject::Directory(OpenDirectory {
                path: resolved.path.clone(),
                share: share.clone(),
                user,
            })
        } else {
            let file = OpenOptions::new()
                .read(true)
                .write(role == Role::ReadWrite)
                .open(&resolved.path)
                .map_err(|e| ShareError::from_io(e, &latin1_decode(path)))?;
            OpenObject::File(OpenFile {
                path: resolved.path.clone(),
                share: share.clone(),
                user,
                file,
                role,
            })
        };

        let handle = self.handles.lock().alloc(object);
        tracing::debug!("{} opened {} as handle {}", user, resolved.path.display(), handle);
        Ok(Opened { handle, info })
    }

    /// Create (or truncate) a file and open it read/write
    ///
    /// # Errors
    /// `DirectoryExists` when a directory has the name; descent failures
    pub fn create_file(&self, path: &[u8], user: Ipv4Addr) -> Result<Opened, ShareError> {
        let (share, elements) = self.locate(path)?;
        let (parent, leaf, existing) = path::descend_parent(&share, &elements, PROTECTED_WRITE)?;

        let disk_name = match existing {
            Some(disk) => {
                if parent.path.join(&disk).is_dir() {
                    return Err(ShareError::DirectoryExists(latin1_decode(path)));
                }
                disk
            }
            None => stored_name(&share, &leaf),
        };
        let target = parent.path.join(&disk_name);

        if share.is_spool() {
            let (_, stamp) = names::split_suffix(&disk_name);
            let ft = match stamp {
                Some(NameStamp::Filetype(ft)) => ft,
                _ => share.default_filetype(),
            };
            let (ft_word, date_word) =
                riscos::pack_filetype_date(ft, riscos::centis_from_system_time(SystemTime::now()));
            let info = ObjectInfo {
                ft_word,
                date_word,
                length: 0,
                access: riscos::access_from_mode(share.mode_mask()),
                object_type: ObjectType::File,
            };
            let handle = self.handles.lock().alloc(OpenObject::Buffer(OpenBuffer {
                path: target,
                share: share.clone(),
                user,
                data: Vec::new(),
            }));
            return Ok(Opened { handle, info });
        }

        let fresh = !target.exists();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&target)
            .map_err(|e| ShareError::from_io(e, &disk_name))?;
        if fresh {
            file.set_permissions(fs::Permissions::from_mode(share.mode_mask()))?;
        }
        let info = ObjectInfo::describe(&share, &disk_name, &file.metadata()?, self.mapper());

        let handle = self.handles.lock().alloc(OpenObject::File(OpenFile {
            path: target.clone(),
            share: share.clone(),
            user,
            file,
            role: Role::ReadWrite,
        }));
        tracing::debug!("{} created {} as handle {}", user, target.display(), handle);
        Ok(Opened { handle, info })
    }

    /// Create a directory; an existing directory is not an error
    ///
    /// # Errors
    /// Descent failures, or a file already holding the name
    pub fn create_directory(&self, path: &[u8]) -> Result<ObjectInfo, ShareError> {
        let (share, elements) = self.locate(path)?;
        let (parent, leaf, existing) = path::descend_parent(&share, &elements, PROTECTED_WRITE)?;
        if let Some(disk) = existing {
            let target = parent.path.join(&disk);
            if target.is_dir() {
                return self.describe_path(&share, &target, &disk);
            }
            return Err(ShareError::AccessViolation(latin1_decode(path)));
        }
        let target = parent.path.join(&leaf);
        fs::create_dir(&target).map_err(|e| ShareError::from_io(e, &leaf))?;
        fs::set_permissions(&target, fs::Permissions::from_mode(share.mode_mask() | DIR_EXEC))?;
        tracing::debug!("Created directory {}", target.display());
        self.describe_path(&share, &target, &leaf)
    }

    /// Delete a file or empty directory, returning what it was
    ///
    /// # Errors
    /// Descent failures; I/O errors (e.g. directory not empty)
    pub fn delete(&self, path: &[u8]) -> Result<ObjectInfo, ShareError> {
        let (share, elements) = self.locate(path)?;
        if elements.is_empty() {
            return Err(ShareError::AccessViolation(share.name().to_string()));
        }
        let resolved = path::descend(&share, &elements, PROTECTED_WRITE)?;
        let info = self.describe(&share, &resolved);
        if resolved.metadata.is_dir() {
            fs::remove_dir(&resolved.path)?;
        } else {
            fs::remove_file(&resolved.path)?;
        }
        tracing::debug!("Deleted {}", resolved.path.display());
        Ok(info)
    }

    /// Set RISC OS access bits. Public bits mirror to group and other, the
    /// share mask applies, and directories always get `mask | 0o111`.
    ///
    /// # Errors
    /// Descent failures or a missing target
    pub fn set_access(&self, path: &[u8], access: u32) -> Result<ObjectInfo, ShareError> {
        let (share, elements) = self.locate(path)?;
        let (parent, _leaf, existing) = path::descend_parent(&share, &elements, PROTECTED_WRITE)?;
        let disk = existing.ok_or_else(|| ShareError::NotFound(latin1_decode(path)))?;
        let target = parent.path.join(&disk);
        let mode = if target.is_dir() {
            share.mode_mask() | DIR_EXEC
        } else {
            riscos::mode_from_access(access) & share.mode_mask()
        };
        fs::set_permissions(&target, fs::Permissions::from_mode(mode))?;
        self.describe_path(&share, &target, &disk)
    }

    /// Rename within one share. Under truncate presentation the source's
    /// filetype suffix carries over.
    ///
    /// # Errors
    /// Cross-share renames and occupied destinations are access violations
    pub fn rename(&self, from: &[u8], to: &[u8]) -> Result<ObjectInfo, ShareError> {
        let (share, src_elems) = self.locate(from)?;
        let (dst_share, dst_elems) = self.locate(to)?;
        if share.key_name() != dst_share.key_name() {
            return Err(ShareError::AccessViolation(latin1_decode(to)));
        }

        let (src_parent, _, src_disk) = path::descend_parent(&share, &src_elems, PROTECTED_WRITE)?;
        let src_disk = src_disk.ok_or_else(|| ShareError::NotFound(latin1_decode(from)))?;
        let source = src_parent.path.join(&src_disk);

        let (dst_parent, dst_leaf, dst_existing) =
            path::descend_parent(&share, &dst_elems, PROTECTED_WRITE)?;
        let mut new_disk = dst_leaf;
        if share.presentation() == Presentation::Truncate {
            let (_, src_stamp) = names::split_suffix(&src_disk);
            let (_, dst_stamp) = names::split_suffix(&new_disk);
            if let (Some(stamp), None) = (src_stamp, dst_stamp) {
                new_disk.push_str(&stamp.suffix());
            }
        }
        let target = dst_parent.path.join(&new_disk);

        if let Some(existing) = dst_existing {
            let occupied = dst_parent.path.join(existing);
            if occupied != source {
                return Err(ShareError::AccessViolation(latin1_decode(to)));
            }
        }

        fs::rename(&source, &target)?;
        tracing::debug!("Renamed {} to {}", source.display(), target.display());
        self.describe_path(&share, &target, &new_disk)
    }

    /// Free space is never reported
    ///
    /// # Errors
    /// Always `FreeSpaceUnavailable`
    pub fn free_space(&self, _path: &[u8]) -> Result<u64, ShareError> {
        Err(ShareError::FreeSpaceUnavailable)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Handle operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Close a handle. Unknown handles succeed.
    ///
    /// # Errors
    /// `BadHandle` when another peer owns it; I/O errors committing a buffer
    pub fn close(&self, handle: u32, user: Ipv4Addr) -> Result<(), ShareError> {
        let object = {
            let mut table = self.handles.lock();
            match table.get(handle) {
                None => return Ok(()),
                Some(obj) if obj.user() != user => return Err(ShareError::BadHandle(handle)),
                Some(_) => table.release(handle),
            }
        };
        match object {
            Some(obj) => obj.close(),
            None => Ok(()),
        }
    }

    /// Read up to `len` bytes at `pos`
    ///
    /// # Errors
    /// Unknown handle or I/O failure
    pub fn read_at(&self, handle: u32, user: Ipv4Addr, pos: u64, len: usize) -> Result<Vec<u8>, ShareError> {
        self.handles.lock().get_mut(handle, user)?.read_at(pos, len)
    }

    /// Write `data` at `pos`
    ///
    /// # Errors
    /// Unknown handle, read-only handle or I/O failure
    pub fn write_at(&self, handle: u32, user: Ipv4Addr, pos: u64, data: &[u8]) -> Result<(), ShareError> {
        self.handles.lock().get_mut(handle, user)?.write_at(pos, data)
    }

    /// Current length of the object
    ///
    /// # Errors
    /// Unknown handle or I/O failure
    pub fn length(&self, handle: u32, user: Ipv4Addr) -> Result<u64, ShareError> {
        self.handles.lock().get_mut(handle, user)?.length()
    }

    /// Truncate or extend; returns the new length
    ///
    /// # Errors
    /// Unknown handle, read-only handle or I/O failure
    pub fn set_length(&self, handle: u32, user: Ipv4Addr, len: u64) -> Result<u64, ShareError> {
        let mut table = self.handles.lock();
        let obj = table.get_mut(handle, user)?;
        obj.set_length(len)?;
        obj.length()
    }

    /// Local path behind a handle
    ///
    /// # Errors
    /// Unknown handle
    pub fn handle_path(&self, handle: u32, user: Ipv4Addr) -> Result<PathBuf, ShareError> {
        Ok(self.handles.lock().get_mut(handle, user)?.path().to_path_buf())
    }

    /// Set the filetype and date of an open file.
    ///
    /// Under truncate presentation the file is renamed to carry the new
    /// suffix and a new handle replaces the old one; otherwise the handle is
    /// kept. Typed stamps also set the modification time.
    ///
    /// # Errors
    /// Unknown handle or I/O failure; `AccessViolation` when the file or
    /// share is not writable, or a sibling already holds the new name
    pub fn set_filetype(
        &self,
        handle: u32,
        user: Ipv4Addr,
        ft_word: u32,
        date_word: u32,
    ) -> Result<u32, ShareError> {
        let stamp = riscos::unpack_filetype_date(ft_word, date_word);
        let mut table = self.handles.lock();
        let OpenObject::File(file) = table.get_mut(handle, user)? else {
            return Ok(handle);
        };
        let denied = || ShareError::AccessViolation(file.path.display().to_string());
        if !writable(&file.share, &file.path)? {
            return Err(denied());
        }

        let retype = if file.share.presentation() == Presentation::Truncate {
            let current = file
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let (base, _) = names::split_suffix(&current);
            let suffix = match stamp {
                Stamp::Typed { filetype, .. } => NameStamp::Filetype(filetype),
                Stamp::LoadExec { load, exec } => NameStamp::LoadExec { load, exec },
            };
            let renamed = format!("{base}{}", suffix.suffix());
            if renamed == current {
                None
            } else {
                let target = file.path.with_file_name(&renamed);
                let parent = file.path.parent().unwrap_or(file.share.root());
                if !writable(&file.share, parent)? || target.symlink_metadata().is_ok() {
                    return Err(denied());
                }
                Some((current, renamed, target))
            }
        } else {
            None
        };

        if let Some(time) = stamp.posix_time() {
            file.file.set_modified(time)?;
        }

        let Some((current, renamed, target)) = retype else {
            return Ok(handle);
        };
        fs::rename(&file.path, &target)?;
        let reopened = OpenOptions::new()
            .read(true)
            .write(file.role == Role::ReadWrite)
            .open(&target)?;
        let replacement = OpenObject::File(OpenFile {
            path: target.clone(),
            share: file.share.clone(),
            user,
            file: reopened,
            role: file.role,
        });

        let new_handle = table.alloc(replacement);
        if let Some(old) = table.release(handle) {
            old.close()?;
        }
        tracing::debug!(
            "Retyped {} as {} (handle {} -> {})",
            current,
            renamed,
            handle,
            new_handle
        );
        Ok(new_handle)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Catalogues
    // ═══════════════════════════════════════════════════════════════════════

    /// List a directory. Returns the first chunk followed by the trailer;
    /// later chunks wait for [`ShareManager::catalogue_continue`].
    ///
    /// # Errors
    /// Descent failures, or the target is not a directory
    pub fn catalogue(&self, path: &[u8], user: Ipv4Addr) -> Result<Vec<u8>, ShareError> {
        let (share, elements) = self.locate(path)?;
        let resolved = path::descend(&share, &elements, PROTECTED_READ)?;
        if !resolved.metadata.is_dir() {
            return Err(ShareError::NotADirectory(latin1_decode(path)));
        }

        let entries = self.list_entries(&share, &resolved.path)?;
        let listing = Listing::build(&entries);

        let dir_handle = jenkins_one_at_a_time(resolved.path.as_os_str().as_bytes());
        let rest = listing.chunks[1..].to_vec();
        let marker = self.catalogues.lock().store(dir_handle, user, rest);

        let mtime = resolved.metadata.modified().unwrap_or(UNIX_EPOCH);
        self.watches
            .lock()
            .observe(dir_handle, resolved.path.clone(), mtime, user);

        let (_, date_word) =
            riscos::pack_filetype_date(FILETYPE_SHARE, riscos::centis_from_system_time(mtime));
        let mode = resolved.metadata.permissions().mode() & share.mode_mask();
        let trailer = Trailer {
            date_word,
            rounded_len: listing.rounded_length(),
            access: riscos::access_from_mode(mode),
            share_context: catalogue::share_context(dir_handle),
            dir_handle,
            first_len: listing.chunk_lens[0] as u32,
            marker,
        };

        let mut w = WordWriter::with_capacity(listing.chunks[0].len() + 32);
        w.bytes(&listing.chunks[0]);
        trailer.encode(&mut w);
        tracing::debug!(
            "Catalogue of {} for {}: {} entries in {} chunks",
            resolved.path.display(),
            user,
            entries.len(),
            listing.chunks.len()
        );
        Ok(w.finish())
    }

    fn list_entries(&self, share: &Share, dir: &Path) -> Result<Vec<CatalogueEntry>, ShareError> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let Ok(disk) = entry.file_name().into_string() else {
                continue;
            };
            if disk.starts_with('.') {
                continue;
            }
            let Ok(meta) = fs::metadata(entry.path()) else {
                continue;
            };
            if meta.permissions().mode() & share.mode_mask() & 0o004 == 0 {
                continue;
            }
            let (shown, _) = names::present(&disk, share.presentation());
            entries.push(CatalogueEntry {
                info: ObjectInfo::describe(share, &disk, &meta, self.mapper()),
                name: names::local_to_riscos(shown),
            });
        }
        entries.sort_by_cached_key(|e| e.name.to_ascii_lowercase());
        Ok(entries)
    }

    /// Serve the next catalogue chunk followed by its marker word.
    ///
    /// Returns `None` for a retransmitted request whose echo no longer
    /// matches; the caller stays silent. When nothing is pending an empty
    /// chunk with the final marker is returned.
    pub fn catalogue_continue(&self, dir_handle: u32, user: Ipv4Addr, echo: u32) -> Option<Vec<u8>> {
        let next = self.catalogues.lock().next(dir_handle, user, echo);
        let (bytes, marker) = match next {
            Continuation::Chunk { bytes, marker } => (bytes, marker),
            Continuation::Duplicate => return None,
            Continuation::Exhausted => (catalogue::empty_chunk(), catalogue::FINAL_MARKER),
        };
        let mut w = WordWriter::with_capacity(bytes.len() + 4);
        w.bytes(&bytes).word(marker);
        Some(w.finish())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Peer lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Close every handle `user` holds and drop its catalogue state.
    /// Returns the number of handles closed.
    pub fn release_user(&self, user: Ipv4Addr) -> usize {
        let released = self.handles.lock().release_user(user);
        let count = released.len();
        for (handle, obj) in released {
            if let Err(e) = obj.close() {
                tracing::warn!("Error closing handle {} for {}: {}", handle, user, e);
            }
        }
        self.catalogues.lock().forget_peer(user);
        self.watches.lock().forget_peer(user);
        if count > 0 {
            tracing::info!("Released {} handles held by {}", count, user);
        }
        count
    }

    /// Close every handle, flushing spool buffers. Returns the number closed.
    pub fn release_all(&self) -> usize {
        let released = self.handles.lock().drain();
        let count = released.len();
        for (handle, obj) in released {
            if let Err(e) = obj.close() {
                tracing::warn!("Error closing handle {}: {}", handle, e);
            }
        }
        count
    }

    /// Directory handles whose contents changed since the last poll
    pub fn poll_watches(&self) -> Vec<u32> {
        self.watches.lock().poll()
    }

    /// Number of live handles
    pub fn handle_count(&self) -> usize {
        self.handles.lock().len()
    }

    /// Handles held by `user`
    pub fn handles_of(&self, user: Ipv4Addr) -> Vec<u32> {
        self.handles.lock().handles_of(user)
    }
}

/// Disk name for a new file under the share's presentation
fn stored_name(share: &Share, leaf: &str) -> String {
    match share.presentation() {
        Presentation::Truncate if names::split_suffix(leaf).1.is_none() => {
            format!("{leaf}{}", NameStamp::Filetype(share.default_filetype()).suffix())
        }
        _ => leaf.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::{FINAL_MARKER, FIRST_MARKER};
    use crate::filetype::StaticMimeMap;
    use crate::share::ShareKind;
    use sharefs_wire::WordReader;

    const A: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
    const B: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 3);

    fn manager(presentation: Presentation) -> (tempfile::TempDir, ShareManager) {
        let dir = tempfile::tempdir().unwrap();
        let mgr = ShareManager::new(Arc::new(StaticMimeMap::default()));
        let mut cfg = ShareConfig::new("docs", dir.path());
        cfg.presentation = presentation;
        mgr.add_share(cfg).unwrap();
        (dir, mgr)
    }

    #[test]
    fn test_open_and_read() {
        let (dir, mgr) = manager(Presentation::Truncate);
        fs::write(dir.path().join("hello,fff"), b"Hello").unwrap();
        let opened = mgr.open(b"docs.hello", A, Role::Read).unwrap();
        assert!(opened.handle >= 4);
        assert_eq!(opened.info.length, 5);
        assert_eq!(mgr.read_at(opened.handle, A, 0, 5).unwrap(), b"Hello");
        assert!(mgr.read_at(opened.handle, B, 0, 5).is_err());
        mgr.close(opened.handle, A).unwrap();
        assert_eq!(mgr.handle_count(), 0);
    }

    #[test]
    fn test_open_share_root() {
        let (_dir, mgr) = manager(Presentation::Suffix);
        let opened = mgr.open(b"docs", A, Role::Read).unwrap();
        assert_eq!(opened.info.object_type, ObjectType::ShareRoot);
        assert_eq!(opened.info.length, 0x800);
        assert_eq!(opened.info.ft_word >> 8, 0xFFFFCD);
    }

    #[test]
    fn test_unknown_share() {
        let (_dir, mgr) = manager(Presentation::Suffix);
        let err = mgr.open(b"nope.x", A, Role::Read).unwrap_err();
        assert_eq!(err.code(), sharefs_wire::error_code::SHARE_UNAVAILABLE);
    }

    #[test]
    fn test_close_unknown_is_ok() {
        let (_dir, mgr) = manager(Presentation::Suffix);
        assert!(mgr.close(1234, A).is_ok());
    }

    #[test]
    fn test_create_appends_default_suffix() {
        let (dir, mgr) = manager(Presentation::Truncate);
        let opened = mgr.create_file(b"docs.new", A).unwrap();
        mgr.write_at(opened.handle, A, 0, b"abc").unwrap();
        mgr.close(opened.handle, A).unwrap();
        assert_eq!(fs::read(dir.path().join("new,fff")).unwrap(), b"abc");
    }

    #[test]
    fn test_create_over_directory() {
        let (dir, mgr) = manager(Presentation::Suffix);
        fs::create_dir(dir.path().join("sub")).unwrap();
        let err = mgr.create_file(b"docs.sub", A).unwrap_err();
        assert_eq!(err.code(), 0xAF);
    }

    #[test]
    fn test_mkdir_delete() {
        let (dir, mgr) = manager(Presentation::Suffix);
        let info = mgr.create_directory(b"docs.sub").unwrap();
        assert_eq!(info.object_type, ObjectType::Directory);
        let mode = fs::metadata(dir.path().join("sub")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o777);
        mgr.delete(b"docs.sub").unwrap();
        assert!(!dir.path().join("sub").exists());
        assert!(mgr.delete(b"docs.sub").is_err());
    }

    #[test]
    fn test_set_access_masks() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = ShareManager::new(Arc::new(StaticMimeMap::default()));
        let mut cfg = ShareConfig::new("docs", dir.path());
        cfg.mode_mask = 0o755;
        mgr.add_share(cfg).unwrap();
        fs::write(dir.path().join("f"), b"").unwrap();
        fs::set_permissions(dir.path().join("f"), fs::Permissions::from_mode(0o644)).unwrap();
        mgr.set_access(b"docs.f", 0x33).unwrap();
        let mode = fs::metadata(dir.path().join("f")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[test]
    fn test_rename_keeps_suffix() {
        let (dir, mgr) = manager(Presentation::Truncate);
        fs::write(dir.path().join("old,c85"), b"x").unwrap();
        mgr.rename(b"docs.old", b"docs.fresh").unwrap();
        assert!(dir.path().join("fresh,c85").exists());
        assert!(!dir.path().join("old,c85").exists());
    }

    #[test]
    fn test_rename_across_shares_rejected() {
        let (dir, mgr) = manager(Presentation::Suffix);
        let other = tempfile::tempdir().unwrap();
        mgr.add_share(ShareConfig::new("other", other.path())).unwrap();
        fs::write(dir.path().join("a"), b"x").unwrap();
        assert!(mgr.rename(b"docs.a", b"other.a").is_err());
    }

    #[test]
    fn test_set_filetype_renames_under_truncate() {
        let (dir, mgr) = manager(Presentation::Truncate);
        fs::write(dir.path().join("report,fff"), b"a,b").unwrap();
        let opened = mgr.open(b"docs.report", A, Role::ReadWrite).unwrap();
        let when = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_000_000_000);
        let (ft, date) = riscos::pack_filetype_date(0xC85, riscos::centis_from_system_time(when));
        let new_handle = mgr.set_filetype(opened.handle, A, ft, date).unwrap();
        assert_ne!(new_handle, opened.handle);
        let renamed = dir.path().join("report,c85");
        assert!(renamed.exists());
        assert!(!dir.path().join("report,fff").exists());
        assert_eq!(fs::metadata(&renamed).unwrap().modified().unwrap(), when);
        assert_eq!(mgr.read_at(new_handle, A, 0, 10).unwrap(), b"a,b");
        assert!(mgr.read_at(opened.handle, A, 0, 1).is_err());
    }

    fn masked(mask: u32) -> (tempfile::TempDir, ShareManager) {
        let dir = tempfile::tempdir().unwrap();
        let mgr = ShareManager::new(Arc::new(StaticMimeMap::default()));
        let mut cfg = ShareConfig::new("docs", dir.path());
        cfg.presentation = Presentation::Truncate;
        cfg.mode_mask = mask;
        mgr.add_share(cfg).unwrap();
        (dir, mgr)
    }

    #[test]
    fn test_set_filetype_needs_write_access() {
        let (dir, mgr) = masked(0o555);
        fs::write(dir.path().join("report,fff"), b"x").unwrap();
        let opened = mgr.open(b"docs.report", A, Role::Read).unwrap();
        let (ft, date) = riscos::pack_filetype_date(0xC85, 0);
        let err = mgr.set_filetype(opened.handle, A, ft, date).unwrap_err();
        assert_eq!(err.code(), sharefs_wire::error_code::ACCESS_VIOLATION);
        assert!(dir.path().join("report,fff").exists());
        assert!(!dir.path().join("report,c85").exists());
        assert_eq!(mgr.read_at(opened.handle, A, 0, 1).unwrap(), b"x");

        // Read-only file in a writable share
        let (dir, mgr) = masked(0o777);
        let locked = dir.path().join("locked,fff");
        fs::write(&locked, b"x").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o444)).unwrap();
        let opened = mgr.open(b"docs.locked", A, Role::Read).unwrap();
        assert!(mgr.set_filetype(opened.handle, A, ft, date).is_err());
        assert!(locked.exists());
    }

    #[test]
    fn test_set_filetype_keeps_occupied_sibling() {
        let (dir, mgr) = manager(Presentation::Truncate);
        fs::write(dir.path().join("report,fff"), b"text").unwrap();
        fs::write(dir.path().join("report,c85"), b"jpeg").unwrap();
        let opened = mgr.open(b"docs.report,fff", A, Role::Read).unwrap();
        let (ft, date) = riscos::pack_filetype_date(0xC85, 0);
        let err = mgr.set_filetype(opened.handle, A, ft, date).unwrap_err();
        assert!(matches!(err, ShareError::AccessViolation(_)));
        assert_eq!(fs::read(dir.path().join("report,c85")).unwrap(), b"jpeg");
        assert_eq!(fs::read(dir.path().join("report,fff")).unwrap(), b"text");
    }

    #[test]
    fn test_writes_denied_in_read_only_share() {
        let (dir, mgr) = masked(0o555);
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("note,fff"), b"keep").unwrap();
        let violation = sharefs_wire::error_code::ACCESS_VIOLATION;

        assert_eq!(mgr.create_file(b"docs.new", A).unwrap_err().code(), violation);
        assert_eq!(mgr.create_file(b"docs.note", A).unwrap_err().code(), violation);
        assert_eq!(mgr.create_directory(b"docs.dir").unwrap_err().code(), violation);
        assert_eq!(mgr.set_access(b"docs.note", 0x33).unwrap_err().code(), violation);
        assert_eq!(mgr.delete(b"docs.note").unwrap_err().code(), violation);
        assert_eq!(mgr.rename(b"docs.note", b"docs.moved").unwrap_err().code(), violation);
        assert!(mgr.open(b"docs.note", A, Role::ReadWrite).is_err());

        assert_eq!(fs::read(dir.path().join("note,fff")).unwrap(), b"keep");
        assert!(!dir.path().join("new,fff").exists());
    }

    #[test]
    fn test_read_only_leaf_protected() {
        let (dir, mgr) = masked(0o777);
        let locked = dir.path().join("locked,fff");
        fs::write(&locked, b"keep").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o444)).unwrap();

        assert!(mgr.create_file(b"docs.locked", A).is_err());
        assert!(mgr.set_access(b"docs.locked", 0x33).is_err());
        assert!(mgr.delete(b"docs.locked").is_err());
        assert!(mgr.rename(b"docs.locked", b"docs.other").is_err());
        assert_eq!(fs::read(&locked).unwrap(), b"keep");
        assert_eq!(fs::metadata(&locked).unwrap().permissions().mode() & 0o777, 0o444);
    }

    #[test]
    fn test_symlink_leaf_never_followed_out() {
        let (dir, mgr) = manager(Presentation::Suffix);
        let outside = tempfile::tempdir().unwrap();
        let secret = outside.path().join("secret");
        fs::write(&secret, b"top secret!!!").unwrap();
        fs::set_permissions(&secret, fs::Permissions::from_mode(0o600)).unwrap();
        std::os::unix::fs::symlink(&secret, dir.path().join("escape")).unwrap();

        assert!(mgr.create_file(b"docs.escape", A).is_err());
        assert!(mgr.set_access(b"docs.escape", 0x33).is_err());
        assert!(mgr.rename(b"docs.escape", b"docs.moved").is_err());
        assert!(mgr.delete(b"docs.escape").is_err());

        assert_eq!(fs::read(&secret).unwrap(), b"top secret!!!");
        assert_eq!(fs::metadata(&secret).unwrap().permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn test_spool_buffer_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = ShareManager::new(Arc::new(StaticMimeMap::default()));
        let mut cfg = ShareConfig::new("prn", dir.path());
        cfg.spool = true;
        mgr.add_share(cfg).unwrap();

        let opened = mgr.create_file(b"prn.job", A).unwrap();
        let err = mgr.set_length(opened.handle, A, 0x4000_0000).unwrap_err();
        assert_eq!(err.code(), sharefs_wire::error_code::DISC_FULL);
        assert!(mgr.write_at(opened.handle, A, u32::MAX as u64, b"x").is_err());
        assert_eq!(mgr.length(opened.handle, A).unwrap(), 0);
        mgr.write_at(opened.handle, A, 0, b"ok").unwrap();
        mgr.close(opened.handle, A).unwrap();
    }

    #[test]
    fn test_free_space() {
        let (_dir, mgr) = manager(Presentation::Suffix);
        assert_eq!(mgr.free_space(b"docs").unwrap_err().code(), 0x806C11);
    }

    #[test]
    fn test_catalogue_filters_and_paginates() {
        let (dir, mgr) = manager(Presentation::Truncate);
        for i in 0..300 {
            fs::write(dir.path().join(format!("entry_{i:013},fff")), b"").unwrap();
        }
        fs::write(dir.path().join(".hidden"), b"").unwrap();
        let private = dir.path().join("private");
        fs::write(&private, b"").unwrap();
        fs::set_permissions(&private, fs::Permissions::from_mode(0o600)).unwrap();

        let first = mgr.catalogue(b"docs", A).unwrap();
        let mut r = WordReader::new(&first);
        let len = r.word().unwrap() as usize;
        assert!(len <= 2048);
        assert_eq!(r.word().unwrap(), 1);
        r.counted(len).unwrap();
        let trailer = Trailer::decode(&mut r).unwrap();
        assert_eq!(trailer.first_len as usize, len);
        assert_eq!(trailer.rounded_len, 12288);
        assert_eq!(trailer.marker, FIRST_MARKER);
        assert_eq!(trailer.share_context, catalogue::share_context(trailer.dir_handle));

        let mut echo = trailer.marker;
        let mut total = len;
        let mut markers = Vec::new();
        loop {
            let reply = mgr.catalogue_continue(trailer.dir_handle, A, echo).unwrap();
            let mut r = WordReader::new(&reply);
            let len = r.word().unwrap() as usize;
            r.word().unwrap();
            r.counted(len).unwrap();
            echo = r.word().unwrap();
            total += len;
            markers.push(echo);
            if echo == FINAL_MARKER {
                break;
            }
        }
        assert_eq!(total, 12000);
        assert_eq!(markers.len(), 5);

        // After draining, another request gets an empty final chunk
        let reply = mgr.catalogue_continue(trailer.dir_handle, A, echo).unwrap();
        assert_eq!(&reply[0..4], &0u32.to_le_bytes());
        assert_eq!(&reply[reply.len() - 4..], &FINAL_MARKER.to_le_bytes());
    }

    #[test]
    fn test_release_user() {
        let (dir, mgr) = manager(Presentation::Suffix);
        for name in ["a", "b", "c"] {
            fs::write(dir.path().join(name), b"").unwrap();
            mgr.open(format!("docs.{name}").as_bytes(), A, Role::Read).unwrap();
        }
        mgr.open(b"docs.a", B, Role::Read).unwrap();
        mgr.catalogue(b"docs", A).unwrap();
        assert_eq!(mgr.release_user(A), 3);
        assert_eq!(mgr.handle_count(), 1);
        assert!(mgr.handles_of(A).is_empty());
    }

    #[test]
    fn test_release_all() {
        let (dir, mgr) = manager(Presentation::Suffix);
        fs::write(dir.path().join("a"), b"").unwrap();
        mgr.open(b"docs.a", A, Role::Read).unwrap();
        mgr.open(b"docs.a", B, Role::ReadWrite).unwrap();
        assert_eq!(mgr.release_all(), 2);
        assert_eq!(mgr.handle_count(), 0);
    }

    #[test]
    fn test_spool_share_buffers() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = ShareManager::new(Arc::new(StaticMimeMap::default()));
        let mut cfg = ShareConfig::new("_S0A000001", dir.path());
        cfg.mode_mask = 0o666;
        cfg.presentation = Presentation::Truncate;
        cfg.kind = ShareKind::HIDDEN;
        cfg.spool = true;
        mgr.add_share(cfg).unwrap();

        let opened = mgr.create_file(b"_S0A000001.job", A).unwrap();
        mgr.write_at(opened.handle, A, 0, b"%!PS").unwrap();
        assert!(!dir.path().join("job,fff").exists());
        mgr.close(opened.handle, A).unwrap();
        assert_eq!(fs::read(dir.path().join("job,fff")).unwrap(), b"%!PS");
    }

    #[test]
    fn test_secure_lookup() {
        let (dir, mgr) = manager(Presentation::Suffix);
        let mut cfg = ShareConfig::new("vault", dir.path());
        cfg.key = 0xBEEF;
        mgr.add_share(cfg).unwrap();
        assert_eq!(mgr.shares_with_key(0xBEEF).len(), 1);
        assert!(mgr.shares_with_key(0).is_empty());
    }
}
