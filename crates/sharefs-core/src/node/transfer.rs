//! Transfer engine.
//!
//! Server-side tasks for the pipelined read, the pipelined and simple
//! writes, and renames. Every task holds the transfer lock for its path, so
//! two transfers on one file never interleave, and a cancel flag checked on
//! every iteration.
//!
//! Pipelined read (`A/0xB {handle, start, length}`):
//!
//! ```text
//!   server                               client
//!   D{rel}<bytes> ... D{rel}<bytes>  ──▶
//!   D{rel}                           ──▶   (window exhausted)
//!                                    ◀──   r{from_rel, to_rel}
//!   ...
//!   R{length, start + length}        ──▶   (once from_rel reaches length)
//! ```
//!
//! Write (`A/0xC` relative, `B/0xC` absolute addressing):
//!
//! ```text
//!   w{pos, 0, pos + packet}          ──▶
//!                                    ◀──   d{pos}<bytes>
//!   ...                                    (short block ends the transfer)
//!   R{start, written}                ──▶
//! ```

use crate::node::inbox::Waiter;
use crate::node::node::Peer;
use crate::READ_WINDOW;
use dashmap::DashMap;
use sharefs_wire::{Command, Direction, FrameBuilder, MAX_BLOCK, WireError, WordReader};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

/// Size of the buffer offered for a rename's new name
pub const RENAME_WINDOW: u32 = 256;

/// Per-path transfer serialization
#[derive(Debug, Default)]
pub struct TransferLocks {
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl TransferLocks {
    /// Empty lock map
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `path`
    pub async fn acquire(&self, path: &Path) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(path.to_path_buf()).or_default().clone();
        lock.lock_owned().await
    }

    /// Drop locks nobody holds or waits for. Returns the number removed.
    pub fn gc(&self) -> usize {
        let before = self.locks.len();
        self.locks
            .retain(|_, lock| Arc::strong_count(lock) > 1 || lock.try_lock().is_err());
        before - self.locks.len()
    }

    /// Paths currently tracked
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no path is tracked
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Transfer tasks in flight, keyed by requester and correlation id
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: DashMap<(Ipv4Addr, u32), Arc<AtomicBool>>,
}

impl TaskRegistry {
    /// Empty registry
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a task. Returns `None` if one with the same key is running,
    /// which makes retransmitted requests harmless.
    pub fn begin(self: &Arc<Self>, key: (Ipv4Addr, u32)) -> Option<TaskGuard> {
        let cancel = Arc::new(AtomicBool::new(false));
        match self.tasks.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(cancel.clone());
                Some(TaskGuard {
                    registry: self.clone(),
                    key,
                    cancel,
                })
            }
        }
    }

    /// Flag every task for cancellation
    pub fn cancel_all(&self) {
        for task in self.tasks.iter() {
            task.value().store(true, Ordering::Release);
        }
    }

    /// Tasks in flight
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no task is in flight
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// A running task's registration; dropping it unregisters the task
#[derive(Debug)]
pub struct TaskGuard {
    registry: Arc<TaskRegistry>,
    key: (Ipv4Addr, u32),
    cancel: Arc<AtomicBool>,
}

impl TaskGuard {
    /// Whether the task was asked to stop
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.registry.tasks.remove(&self.key);
    }
}

/// Wait for a frame with command `want`, discarding others, until `timeout`
pub(crate) async fn await_command(waiter: &Waiter, want: Command, timeout: Duration) -> Option<Vec<u8>> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return None;
        }
        let frame = waiter.recv_timeout(remaining).await?;
        if frame.first() == Some(&want.as_u8()) {
            return Some(frame);
        }
        tracing::trace!("Ignoring frame 0x{:02X} while waiting for {:?}", frame[0], want);
    }
}

/// Parameters of a read or write task
#[derive(Debug, Clone, Copy)]
pub(crate) struct TransferRequest {
    pub from: SocketAddrV4,
    pub id: u32,
    pub reply: Command,
    pub handle: u32,
    pub start: u32,
    pub length: u32,
}

impl TransferRequest {
    fn user(&self) -> Ipv4Addr {
        *self.from.ip()
    }
}

impl Peer {
    /// Run a pipelined read to completion
    pub(crate) async fn send_task(&self, req: TransferRequest) {
        let Some(task) = self.inner.tasks.begin((req.user(), req.id)) else {
            tracing::trace!("Duplicate read request {} from {}", req.id, req.from);
            return;
        };
        let manager = &self.inner.manager;
        let path = match manager.handle_path(req.handle, req.user()) {
            Ok(p) => p,
            Err(e) => return self.send_error(req.from, req.id, &e.to_wire()).await,
        };
        let _lock = self.inner.transfers.acquire(&path).await;
        let waiter = self
            .inner
            .inbox
            .register((req.user(), req.id, Direction::ToResponder));

        let available = match manager.length(req.handle, req.user()) {
            Ok(len) => len.saturating_sub(req.start as u64),
            Err(e) => return self.send_error(req.from, req.id, &e.to_wire()).await,
        };
        let length = available.min(req.length as u64) as u32;
        let timings = &self.inner.config.timings;
        tracing::debug!(
            "Sending {} bytes of {} from {} to {}",
            length,
            path.display(),
            req.start,
            req.from
        );

        let mut from_rel = 0u32;
        let mut to_rel = length.min(READ_WINDOW);
        loop {
            while from_rel < to_rel {
                if task.is_cancelled() {
                    return;
                }
                let want = (to_rel - from_rel).min(MAX_BLOCK as u32) as usize;
                let data = match manager.read_at(req.handle, req.user(), req.start as u64 + from_rel as u64, want) {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Read of {} failed: {}", path.display(), e);
                        return self.send_error(req.from, req.id, &WireError::not_found()).await;
                    }
                };
                if data.is_empty() {
                    break;
                }
                let frame = FrameBuilder::new(Command::Data, req.id)
                    .word(from_rel)
                    .bytes(&data)
                    .build();
                self.send_frame(req.from, &frame).await;
                from_rel += data.len() as u32;
            }

            let control = FrameBuilder::new(Command::Data, req.id).word(from_rel).build();
            let mut window = None;
            for _ in 0..timings.max_attempts {
                if task.is_cancelled() {
                    return;
                }
                self.send_frame(req.from, &control).await;
                if let Some(frame) = await_command(&waiter, Command::ReadWindow, timings.reply_timeout).await {
                    let mut r = WordReader::new(&frame[4..]);
                    if let (Ok(f), Ok(t)) = (r.word(), r.word()) {
                        window = Some((f, t));
                        break;
                    }
                }
            }

            let Some((f, t)) = window else {
                tracing::warn!("Reader {} went silent during transfer {}", req.from, req.id);
                return self.send_error(req.from, req.id, &WireError::not_found()).await;
            };
            if f >= length {
                let done = FrameBuilder::new(req.reply, req.id)
                    .words(&[length, req.start.wrapping_add(length)])
                    .build();
                self.send_frame(req.from, &done).await;
                return;
            }
            from_rel = f;
            to_rel = t.clamp(f, length);
            if to_rel == from_rel {
                to_rel = (from_rel + MAX_BLOCK as u32).min(length);
            }
        }
    }

    /// Run a write to completion. `absolute` selects absolute file offsets
    /// in `w`/`d` frames instead of offsets relative to `start`.
    pub(crate) async fn receive_task(&self, req: TransferRequest, absolute: bool) {
        let Some(task) = self.inner.tasks.begin((req.user(), req.id)) else {
            tracing::trace!("Duplicate write request {} from {}", req.id, req.from);
            return;
        };
        let manager = &self.inner.manager;
        let path = match manager.handle_path(req.handle, req.user()) {
            Ok(p) => p,
            Err(e) => return self.send_error(req.from, req.id, &e.to_wire()).await,
        };
        let _lock = self.inner.transfers.acquire(&path).await;
        let waiter = self
            .inner
            .inbox
            .register((req.user(), req.id, Direction::ToResponder));
        let timings = &self.inner.config.timings;
        let base = if absolute { req.start } else { 0 };
        tracing::debug!(
            "Receiving {} bytes into {} at {} from {}",
            req.length,
            path.display(),
            req.start,
            req.from
        );

        let mut written = 0u32;
        while written < req.length {
            let packet = (req.length - written).min(MAX_BLOCK as u32);
            let expect = base.wrapping_add(written);

            let mut block = queued_block(&waiter, expect);
            if block.is_none() {
                let ask = FrameBuilder::new(Command::WriteWindow, req.id)
                    .words(&[expect, 0, expect.wrapping_add(packet)])
                    .build();
                for _ in 0..timings.max_attempts {
                    if task.is_cancelled() {
                        return;
                    }
                    self.send_frame(req.from, &ask).await;
                    block = await_block(&waiter, expect, timings.reply_timeout).await;
                    if block.is_some() {
                        break;
                    }
                }
            }

            let Some(mut data) = block else {
                tracing::warn!("Writer {} went silent during transfer {}", req.from, req.id);
                return;
            };
            data.truncate(packet as usize);
            if let Err(e) = manager.write_at(req.handle, req.user(), req.start as u64 + written as u64, &data) {
                tracing::warn!("Write to {} failed: {}", path.display(), e);
                if absolute {
                    self.send_error(req.from, req.id, &WireError::not_found()).await;
                }
                return;
            }
            written += data.len() as u32;
            if (data.len() as u32) < packet {
                break;
            }
        }

        let done = FrameBuilder::new(req.reply, req.id)
            .words(&[req.start, written])
            .build();
        self.send_frame(req.from, &done).await;
    }

    /// Collect the new name for a rename and apply it
    pub(crate) async fn rename_task(&self, from: SocketAddrV4, id: u32, reply: Command, source: Vec<u8>) {
        let user = *from.ip();
        let Some(task) = self.inner.tasks.begin((user, id)) else {
            return;
        };
        let waiter = self.inner.inbox.register((user, id, Direction::ToResponder));
        let timings = &self.inner.config.timings;
        let ask = FrameBuilder::new(Command::WriteWindow, id)
            .words(&[0, 0, RENAME_WINDOW])
            .build();

        let mut target = None;
        for _ in 0..timings.max_attempts {
            if task.is_cancelled() {
                return;
            }
            self.send_frame(from, &ask).await;
            if let Some(frame) = await_command(&waiter, Command::WriteData, timings.reply_timeout).await {
                let mut r = WordReader::new(&frame[4..]);
                if r.word().is_ok() {
                    target = Some(r.lenient_string().to_vec());
                    break;
                }
            }
        }
        let Some(target) = target else {
            tracing::warn!("Rename request {} from {} abandoned", id, from);
            return;
        };

        let frame = match self.inner.manager.rename(&source, &target) {
            Ok(info) => {
                let mut b = FrameBuilder::new(reply, id);
                b = encode_info(b, &info);
                b.build()
            }
            Err(e) => {
                tracing::debug!("Rename for {} failed: {}", from, e);
                sharefs_wire::error_frame(id, &e.to_wire())
            }
        };
        self.send_frame(from, &frame).await;
    }
}

/// Append an object info record to a frame
pub(crate) fn encode_info(b: FrameBuilder, info: &sharefs_files::ObjectInfo) -> FrameBuilder {
    b.words(&[
        info.ft_word,
        info.date_word,
        info.length,
        info.access,
        info.object_type as u32,
    ])
}

fn parse_block(frame: &[u8]) -> Option<(u32, &[u8])> {
    if frame.first() != Some(&Command::WriteData.as_u8()) || frame.len() < 8 {
        return None;
    }
    let offset = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);
    Some((offset, &frame[8..]))
}

/// A block at `expect` already queued; earlier or later blocks are dropped
fn queued_block(waiter: &Waiter, expect: u32) -> Option<Vec<u8>> {
    while let Some(frame) = waiter.try_recv() {
        if let Some((offset, data)) = parse_block(&frame) {
            if offset == expect {
                return Some(data.to_vec());
            }
        }
    }
    None
}

async fn await_block(waiter: &Waiter, expect: u32, timeout: Duration) -> Option<Vec<u8>> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let frame = waiter.recv_timeout(remaining).await?;
        match parse_block(&frame) {
            Some((offset, data)) if offset == expect => return Some(data.to_vec()),
            _ => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::inbox::Inbox;

    #[tokio::test]
    async fn test_transfer_lock_serializes() {
        let locks = Arc::new(TransferLocks::new());
        let path = PathBuf::from("/srv/docs/file");
        let guard = locks.acquire(&path).await;

        let l2 = locks.clone();
        let p2 = path.clone();
        let waiting = tokio::spawn(async move {
            let _g = l2.acquire(&p2).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());
        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_transfer_lock_gc() {
        let locks = TransferLocks::new();
        let held = locks.acquire(Path::new("/a")).await;
        drop(locks.acquire(Path::new("/b")).await);
        assert_eq!(locks.len(), 2);
        assert_eq!(locks.gc(), 1);
        drop(held);
        assert_eq!(locks.gc(), 1);
        assert!(locks.is_empty());
    }

    #[test]
    fn test_task_registry_dedupes() {
        let registry = TaskRegistry::new();
        let key = (Ipv4Addr::new(10, 0, 0, 2), 0x1002);
        let first = registry.begin(key).unwrap();
        assert!(registry.begin(key).is_none());
        registry.cancel_all();
        assert!(first.is_cancelled());
        drop(first);
        assert!(registry.begin(key).is_some());
    }

    #[tokio::test]
    async fn test_queued_block_skips_stale() {
        let inbox = Inbox::new();
        let key = (Ipv4Addr::LOCALHOST, 1, Direction::ToResponder);
        let waiter = inbox.register(key);
        inbox.deliver(key, FrameBuilder::new(Command::WriteData, 1).word(0).bytes(b"old").build());
        inbox.deliver(key, FrameBuilder::new(Command::WriteData, 1).word(3).bytes(b"new").build());
        assert_eq!(queued_block(&waiter, 3), Some(b"new".to_vec()));
        assert_eq!(queued_block(&waiter, 6), None);
    }

    #[tokio::test]
    async fn test_await_command_filters() {
        let inbox = Inbox::new();
        let key = (Ipv4Addr::LOCALHOST, 2, Direction::ToResponder);
        let waiter = inbox.register(key);
        inbox.deliver(key, FrameBuilder::new(Command::WriteData, 2).word(0).build());
        inbox.deliver(key, FrameBuilder::new(Command::ReadWindow, 2).words(&[0, 8]).build());
        let got = await_command(&waiter, Command::ReadWindow, Duration::from_millis(100)).await;
        assert_eq!(got.map(|f| f[0]), Some(b'r'));
    }
}
