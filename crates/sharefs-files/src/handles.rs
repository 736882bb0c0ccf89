//! Handle table.
//!
//! Handles start at 4. Released handles go onto a free-list and are handed
//! out again before the counter advances.

use crate::error::ShareError;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::share::Share;

/// First handle value handed out
pub const FIRST_HANDLE: u32 = 4;

/// Access role of an open file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Read only
    Read,
    /// Read and write
    ReadWrite,
}

/// An open regular file
#[derive(Debug)]
pub struct OpenFile {
    /// Local path
    pub path: PathBuf,
    /// Owning share
    pub share: Arc<Share>,
    /// Peer that opened it
    pub user: Ipv4Addr,
    /// Underlying file
    pub file: File,
    /// Access role
    pub role: Role,
}

/// An open directory (or share root)
#[derive(Debug)]
pub struct OpenDirectory {
    /// Local path
    pub path: PathBuf,
    /// Owning share
    pub share: Arc<Share>,
    /// Peer that opened it
    pub user: Ipv4Addr,
}

/// A file held in memory until close (print spool)
#[derive(Debug)]
pub struct OpenBuffer {
    /// Where the contents land on close
    pub path: PathBuf,
    /// Owning share
    pub share: Arc<Share>,
    /// Peer that opened it
    pub user: Ipv4Addr,
    /// Contents so far
    pub data: Vec<u8>,
}

impl OpenBuffer {
    fn spool_end(&self, end: u64) -> Result<usize, ShareError> {
        if end > crate::SPOOL_LIMIT {
            tracing::warn!(
                "Spool job {} would reach {} bytes; refusing",
                self.path.display(),
                end
            );
            return Err(ShareError::DiscFull(self.path.display().to_string()));
        }
        Ok(end as usize)
    }
}

/// Anything a handle can refer to
#[derive(Debug)]
pub enum OpenObject {
    /// Regular file
    File(OpenFile),
    /// Directory snapshot
    Directory(OpenDirectory),
    /// Spool buffer
    Buffer(OpenBuffer),
}

impl OpenObject {
    /// Local path
    pub fn path(&self) -> &Path {
        match self {
            Self::File(f) => &f.path,
            Self::Directory(d) => &d.path,
            Self::Buffer(b) => &b.path,
        }
    }

    /// Owning peer
    pub fn user(&self) -> Ipv4Addr {
        match self {
            Self::File(f) => f.user,
            Self::Directory(d) => d.user,
            Self::Buffer(b) => b.user,
        }
    }

    /// Owning share
    pub fn share(&self) -> &Arc<Share> {
        match self {
            Self::File(f) => &f.share,
            Self::Directory(d) => &d.share,
            Self::Buffer(b) => &b.share,
        }
    }

    /// Current length in bytes
    ///
    /// # Errors
    /// Propagates metadata failures for files
    pub fn length(&self) -> Result<u64, ShareError> {
        match self {
            Self::File(f) => Ok(f.file.metadata()?.len()),
            Self::Directory(_) => Ok(crate::DIRECTORY_LENGTH as u64),
            Self::Buffer(b) => Ok(b.data.len() as u64),
        }
    }

    fn writable(&self) -> Result<(), ShareError> {
        match self {
            Self::File(f) if f.role == Role::Read => {
                Err(ShareError::AccessViolation(f.path.display().to_string()))
            }
            Self::Directory(d) => Err(ShareError::NotFound(d.path.display().to_string())),
            _ => Ok(()),
        }
    }

    /// Read up to `len` bytes at `pos`; short at end of file
    ///
    /// # Errors
    /// Directories cannot be read; I/O failures propagate
    pub fn read_at(&mut self, pos: u64, len: usize) -> Result<Vec<u8>, ShareError> {
        match self {
            Self::File(f) => {
                f.file.seek(SeekFrom::Start(pos))?;
                let mut buf = Vec::with_capacity(len);
                (&mut f.file).take(len as u64).read_to_end(&mut buf)?;
                Ok(buf)
            }
            Self::Buffer(b) => {
                let start = (pos as usize).min(b.data.len());
                let end = start.saturating_add(len).min(b.data.len());
                Ok(b.data[start..end].to_vec())
            }
            Self::Directory(d) => Err(ShareError::NotFound(d.path.display().to_string())),
        }
    }

    /// Write `data` at `pos`, extending as needed
    ///
    /// # Errors
    /// Read-only files and directories are rejected; I/O failures propagate
    pub fn write_at(&mut self, pos: u64, data: &[u8]) -> Result<(), ShareError> {
        self.writable()?;
        match self {
            Self::File(f) => {
                f.file.seek(SeekFrom::Start(pos))?;
                f.file.write_all(data)?;
                Ok(())
            }
            Self::Buffer(b) => {
                let end = b.spool_end(pos.saturating_add(data.len() as u64))?;
                let pos = end - data.len();
                if b.data.len() < end {
                    b.data.resize(end, 0);
                }
                b.data[pos..end].copy_from_slice(data);
                Ok(())
            }
            Self::Directory(_) => Ok(()),
        }
    }

    /// Truncate or extend to `len`
    ///
    /// # Errors
    /// Read-only files and directories are rejected; I/O failures propagate
    pub fn set_length(&mut self, len: u64) -> Result<(), ShareError> {
        self.writable()?;
        match self {
            Self::File(f) => Ok(f.file.set_len(len)?),
            Self::Buffer(b) => {
                let len = b.spool_end(len)?;
                b.data.resize(len, 0);
                Ok(())
            }
            Self::Directory(_) => Ok(()),
        }
    }

    /// Release the object. Buffers are written next to their destination
    /// and renamed into place.
    ///
    /// # Errors
    /// I/O failures while flushing a file or committing a buffer
    pub fn close(self) -> Result<(), ShareError> {
        match self {
            Self::File(mut f) => {
                if f.role == Role::ReadWrite {
                    f.file.flush()?;
                }
                Ok(())
            }
            Self::Directory(_) => Ok(()),
            Self::Buffer(b) => {
                let name = b
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let staging = b.path.with_file_name(format!(".{name}.spool"));
                std::fs::write(&staging, &b.data)?;
                std::fs::rename(&staging, &b.path)?;
                tracing::info!("Spooled {} bytes to {}", b.data.len(), b.path.display());
                Ok(())
            }
        }
    }
}

/// Handle allocator and object map
#[derive(Debug)]
pub struct HandleTable {
    next: u32,
    free: Vec<u32>,
    objects: HashMap<u32, OpenObject>,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    /// Empty table
    pub fn new() -> Self {
        Self {
            next: FIRST_HANDLE,
            free: Vec::new(),
            objects: HashMap::new(),
        }
    }

    /// Store `object` under a fresh or recycled handle
    pub fn alloc(&mut self, object: OpenObject) -> u32 {
        let handle = match self.free.pop() {
            Some(h) => h,
            None => {
                let h = self.next;
                self.next += 1;
                h
            }
        };
        self.objects.insert(handle, object);
        handle
    }

    /// Remove `handle`, returning its object; the handle joins the free-list
    pub fn release(&mut self, handle: u32) -> Option<OpenObject> {
        let object = self.objects.remove(&handle)?;
        self.free.push(handle);
        Some(object)
    }

    /// Object behind `handle` if `user` owns it
    ///
    /// # Errors
    /// `BadHandle` for unknown handles or handles owned by another peer
    pub fn get_mut(&mut self, handle: u32, user: Ipv4Addr) -> Result<&mut OpenObject, ShareError> {
        match self.objects.get_mut(&handle) {
            Some(obj) if obj.user() == user => Ok(obj),
            _ => Err(ShareError::BadHandle(handle)),
        }
    }

    /// Object behind `handle`, regardless of owner
    pub fn get(&self, handle: u32) -> Option<&OpenObject> {
        self.objects.get(&handle)
    }

    /// Release every handle owned by `user`
    pub fn release_user(&mut self, user: Ipv4Addr) -> Vec<(u32, OpenObject)> {
        let owned: Vec<u32> = self
            .objects
            .iter()
            .filter(|(_, o)| o.user() == user)
            .map(|(h, _)| *h)
            .collect();
        owned
            .into_iter()
            .filter_map(|h| self.release(h).map(|o| (h, o)))
            .collect()
    }

    /// Release every handle
    pub fn drain(&mut self) -> Vec<(u32, OpenObject)> {
        let all: Vec<u32> = self.objects.keys().copied().collect();
        all.into_iter()
            .filter_map(|h| self.release(h).map(|o| (h, o)))
            .collect()
    }

    /// Handles owned by `user`
    pub fn handles_of(&self, user: Ipv4Addr) -> Vec<u32> {
        let mut v: Vec<u32> = self
            .objects
            .iter()
            .filter(|(_, o)| o.user() == user)
            .map(|(h, _)| *h)
            .collect();
        v.sort_unstable();
        v
    }

    /// Whether `handle` is live
    pub fn contains(&self, handle: u32) -> bool {
        self.objects.contains_key(&handle)
    }

    /// Number of live handles
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether no handles are live
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Highest handle ever allocated, if any
    pub fn high_water(&self) -> Option<u32> {
        (self.next > FIRST_HANDLE).then(|| self.next - 1)
    }

    /// Handles waiting for reuse
    pub fn free_list(&self) -> &[u32] {
        &self.free
    }
}
