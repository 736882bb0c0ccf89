//! Client-side share API
//!
//! Drives the request protocol against one remote host. Every exchange
//! registers its inbox waiter before the request leaves, resends on silence
//! (one reply timeout per attempt) and unwinds immediately on an `E` reply.

use crate::node::error::{NodeError, Result};
use crate::node::handlers::decode_opened;
use crate::node::inbox::Waiter;
use crate::node::node::Peer;
use crate::{READ_WINDOW, WRITE_AHEAD};
use sharefs_files::ObjectInfo;
use sharefs_files::catalogue::{CHUNK_LIMIT, FINAL_MARKER, Trailer};
use sharefs_wire::codec::{latin1_decode, latin1_encode};
use sharefs_wire::riscos::{self, Stamp};
use sharefs_wire::{
    Command, Direction, Frame, FrameBuilder, FrameError, MAX_BLOCK, MAX_SIMPLE_READ, Opcode,
    WordReader,
};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::SystemTime;

/// An object opened on a remote host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteObject {
    /// Server-side handle
    pub handle: u32,
    /// Object description at open time
    pub info: ObjectInfo,
}

/// One entry of a remote catalogue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Presented name
    pub name: String,
    /// Object description
    pub info: ObjectInfo,
}

/// Client for the shares of one remote host
#[derive(Clone)]
pub struct ShareClient {
    peer: Peer,
    host: Ipv4Addr,
}

impl ShareClient {
    pub(crate) fn new(peer: Peer, host: Ipv4Addr) -> Self {
        Self { peer, host }
    }

    /// The remote host
    pub fn host(&self) -> Ipv4Addr {
        self.host
    }

    fn server(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.host, self.peer.inner.config.ports.data)
    }

    fn unresponsive(&self) -> NodeError {
        NodeError::PeerUnresponsive {
            peer: self.host,
            attempts: self.peer.inner.config.timings.max_attempts,
        }
    }

    /// Allocate an id and register for its replies
    fn begin(&self) -> (u32, Waiter) {
        let id = self.peer.inner.ids.next_id();
        let waiter = self
            .peer
            .inner
            .inbox
            .register((self.host, id, Direction::ToRequester));
        (id, waiter)
    }

    /// Send `frame` until a frame of one of the `accept` commands arrives.
    /// Returns that frame.
    async fn exchange(&self, waiter: &Waiter, frame: &[u8], accept: &[Command]) -> Result<Vec<u8>> {
        let timings = &self.peer.inner.config.timings;
        for attempt in 1..=timings.max_attempts {
            if attempt > 1 {
                tracing::debug!(
                    "Resending request {:#x} to {} (attempt {})",
                    waiter.key().1,
                    self.host,
                    attempt
                );
            }
            self.peer.send_frame(self.server(), frame).await;
            let deadline = tokio::time::Instant::now() + timings.reply_timeout;
            while let Some(reply) = waiter
                .recv_timeout(deadline.saturating_duration_since(tokio::time::Instant::now()))
                .await
            {
                if let Some(reply) = check_reply(reply, accept)? {
                    return Ok(reply);
                }
            }
        }
        Err(self.unresponsive())
    }

    /// One request/reply exchange; returns the reply payload
    async fn call(
        &self,
        command: Command,
        opcode: Opcode,
        params: impl FnOnce(FrameBuilder) -> FrameBuilder,
    ) -> Result<Vec<u8>> {
        let (id, waiter) = self.begin();
        let request = params(FrameBuilder::request(command, id, opcode)).build();
        let reply = self
            .exchange(&waiter, &request, &[command.reply_letter()])
            .await?;
        Ok(reply[4..].to_vec())
    }

    async fn call_path(&self, opcode: Opcode, path: &str) -> Result<Vec<u8>> {
        let path = latin1_encode(path);
        self.call(Command::Request, opcode, |b| b.string(&path)).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Objects
    // ═══════════════════════════════════════════════════════════════════════

    /// Open an existing object for reading
    ///
    /// # Errors
    /// `NodeError::Remote` for lookup and access failures,
    /// `NodeError::PeerUnresponsive` when the host stays silent
    pub async fn open(&self, path: &str) -> Result<RemoteObject> {
        let payload = self.call_path(Opcode::OpenRead, path).await?;
        decode_object(&payload)
    }

    /// Open an existing object for reading and writing
    ///
    /// # Errors
    /// See [`ShareClient::open`]
    pub async fn open_for_update(&self, path: &str) -> Result<RemoteObject> {
        let payload = self.call_path(Opcode::OpenUpdate, path).await?;
        decode_object(&payload)
    }

    /// Create (or truncate) a file and open it
    ///
    /// # Errors
    /// See [`ShareClient::open`]
    pub async fn create(&self, path: &str) -> Result<RemoteObject> {
        let payload = self.call_path(Opcode::CreateFile, path).await?;
        decode_object(&payload)
    }

    /// Release a handle
    ///
    /// # Errors
    /// See [`ShareClient::open`]
    pub async fn close(&self, handle: u32) -> Result<()> {
        self.call(Command::Request, Opcode::Close, |b| b.word(handle))
            .await?;
        Ok(())
    }

    /// Create a directory
    ///
    /// # Errors
    /// See [`ShareClient::open`]
    pub async fn create_directory(&self, path: &str) -> Result<ObjectInfo> {
        let payload = self.call_path(Opcode::CreateDirectory, path).await?;
        Ok(ObjectInfo::decode(&mut WordReader::new(&payload))?)
    }

    /// Delete a file or empty directory; returns what it was
    ///
    /// # Errors
    /// See [`ShareClient::open`]
    pub async fn delete(&self, path: &str) -> Result<ObjectInfo> {
        let payload = self.call_path(Opcode::Delete, path).await?;
        Ok(ObjectInfo::decode(&mut WordReader::new(&payload))?)
    }

    /// Set RISC OS access bits
    ///
    /// # Errors
    /// See [`ShareClient::open`]
    pub async fn setmode(&self, path: &str, access: u32) -> Result<ObjectInfo> {
        let path = latin1_encode(path);
        let payload = self
            .call(Command::Request, Opcode::SetAccess, |b| {
                b.word(access).string(&path)
            })
            .await?;
        Ok(ObjectInfo::decode(&mut WordReader::new(&payload))?)
    }

    /// Truncate or extend an open file; returns the new length
    ///
    /// # Errors
    /// See [`ShareClient::open`]
    pub async fn set_length(&self, handle: u32, length: u32) -> Result<u32> {
        let payload = self
            .call(Command::Request, Opcode::SetLength, |b| {
                b.words(&[handle, length])
            })
            .await?;
        Ok(WordReader::new(&payload).word()?)
    }

    /// Ask for the free space behind `path`
    ///
    /// # Errors
    /// Servers answer with "Free space not available", surfaced as
    /// `NodeError::Remote`
    pub async fn free_space(&self, path: &str) -> Result<u32> {
        let payload = self.call_path(Opcode::FreeSpace, path).await?;
        Ok(WordReader::new(&payload).word()?)
    }

    /// Change the filetype of `path`, keeping its date. Returns the handle
    /// the server allocated for the retyped file (already closed).
    ///
    /// # Errors
    /// See [`ShareClient::open`]
    pub async fn settype(&self, path: &str, filetype: u16) -> Result<u32> {
        let object = self.open(path).await?;
        let centis = match object.info.stamp() {
            Stamp::Typed { centis, .. } => centis,
            Stamp::LoadExec { .. } => riscos::centis_from_system_time(SystemTime::now()),
        };
        let (ft_word, date_word) = riscos::pack_filetype_date(filetype, centis);

        let retyped = self
            .call(Command::Request, Opcode::SetFiletype, |b| {
                b.words(&[object.handle, ft_word, date_word])
            })
            .await
            .and_then(|payload| Ok(WordReader::new(&payload).word()?));
        let handle = match retyped {
            Ok(handle) => handle,
            Err(e) => {
                if let Err(close) = self.close(object.handle).await {
                    tracing::debug!("Close after failed settype: {}", close);
                }
                return Err(e);
            }
        };
        self.close(handle).await?;
        Ok(handle)
    }

    /// Rename `from` to `to` inside one share
    ///
    /// # Errors
    /// See [`ShareClient::open`]
    pub async fn rename(&self, from: &str, to: &str) -> Result<ObjectInfo> {
        let (id, waiter) = self.begin();
        let request = FrameBuilder::request(Command::Request, id, Opcode::Rename)
            .string(&latin1_encode(from))
            .build();
        let target = FrameBuilder::new(Command::WriteData, id)
            .word(0)
            .string(&latin1_encode(to))
            .build();

        let first = self
            .exchange(&waiter, &request, &[Command::WriteWindow, Command::Reply])
            .await?;
        let reply = if first[0] == Command::Reply.as_u8() {
            first
        } else {
            self.exchange(&waiter, &target, &[Command::Reply]).await?
        };
        Ok(ObjectInfo::decode(&mut WordReader::new(&reply[4..]))?)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Catalogues
    // ═══════════════════════════════════════════════════════════════════════

    /// List a directory, draining every continuation
    ///
    /// # Errors
    /// See [`ShareClient::open`]; a lost continuation reply surfaces as
    /// `NodeError::PeerUnresponsive`
    pub async fn catalogue(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let path = latin1_encode(path);
        let payload = self
            .call(Command::SimpleRequest, Opcode::Catalogue, |b| b.string(&path))
            .await?;
        let mut r = WordReader::new(&payload);
        let mut entries = parse_chunk(&mut r)?;
        let trailer = Trailer::decode(&mut r)?;

        let mut marker = trailer.marker;
        while marker != FINAL_MARKER {
            let payload = self
                .call(Command::SimpleRequest, Opcode::CatalogueContinue, |b| {
                    b.words(&[trailer.dir_handle, marker, CHUNK_LIMIT as u32])
                })
                .await?;
            let mut r = WordReader::new(&payload);
            let chunk = parse_chunk(&mut r)?;
            marker = r.word()?;
            if chunk.is_empty() && marker != FINAL_MARKER {
                return Err(NodeError::unexpected("empty catalogue chunk without final marker"));
            }
            entries.extend(chunk);
        }
        Ok(entries)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Reads
    // ═══════════════════════════════════════════════════════════════════════

    /// One simple read of at most 16 KiB at `pos`
    ///
    /// # Errors
    /// See [`ShareClient::open`]
    pub async fn read(&self, handle: u32, pos: u32, len: u32) -> Result<Vec<u8>> {
        let len = len.min(MAX_SIMPLE_READ as u32);
        let payload = self
            .call(Command::SimpleRequest, Opcode::Read, |b| {
                b.words(&[handle, pos, len])
            })
            .await?;
        let mut r = WordReader::new(&payload);
        let n = r.word()? as usize;
        let _tag = r.word()?;
        Ok(r.counted(n)?.to_vec())
    }

    /// Fetch a whole file with simple reads
    ///
    /// # Errors
    /// See [`ShareClient::open`]
    pub async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let object = self.open(path).await?;
        let mut data = Vec::with_capacity(object.info.length as usize);
        let result = async {
            loop {
                let block = self
                    .read(object.handle, data.len() as u32, MAX_SIMPLE_READ as u32)
                    .await?;
                let short = block.len() < MAX_SIMPLE_READ;
                data.extend_from_slice(&block);
                if short {
                    return Ok::<_, NodeError>(());
                }
            }
        }
        .await;
        self.finish(object.handle, result).await?;
        Ok(data)
    }

    /// Fetch a whole file with a pipelined read
    ///
    /// # Errors
    /// See [`ShareClient::open`]
    pub async fn pget(&self, path: &str) -> Result<Vec<u8>> {
        let object = self.open(path).await?;
        let result = self
            .read_pipelined(object.handle, 0, object.info.length)
            .await;
        self.finish(object.handle, result).await
    }

    /// Pipelined read of `length` bytes from `start`
    ///
    /// # Errors
    /// See [`ShareClient::open`]
    pub async fn read_pipelined(&self, handle: u32, start: u32, length: u32) -> Result<Vec<u8>> {
        let (id, waiter) = self.begin();
        let request = FrameBuilder::request(Command::Request, id, Opcode::Read)
            .words(&[handle, start, length])
            .build();
        let timings = &self.peer.inner.config.timings;
        let mut data = Vec::with_capacity(length as usize);
        let mut heard = false;
        let mut silent = 0;

        self.peer.send_frame(self.server(), &request).await;
        loop {
            let Some(frame) = waiter.recv_timeout(timings.reply_timeout).await else {
                silent += 1;
                if silent >= timings.max_attempts {
                    return Err(self.unresponsive());
                }
                if !heard {
                    self.peer.send_frame(self.server(), &request).await;
                } else {
                    self.send_window(id, data.len() as u32).await;
                }
                continue;
            };
            silent = 0;
            heard = true;
            let Some(frame) = check_reply(frame, &[Command::Data, Command::Reply])? else {
                continue;
            };
            if frame[0] == Command::Reply.as_u8() {
                return Ok(data);
            }

            let mut r = WordReader::new(&frame[4..]);
            let offset = r.word()?;
            let block = r.remaining();
            if block.is_empty() {
                self.send_window(id, data.len() as u32).await;
            } else if offset as usize == data.len() {
                data.extend_from_slice(block);
            } else {
                tracing::trace!("Out-of-order block at {} (have {})", offset, data.len());
            }
        }
    }

    async fn send_window(&self, id: u32, from: u32) {
        let frame = FrameBuilder::new(Command::ReadWindow, id)
            .words(&[from, from.saturating_add(READ_WINDOW)])
            .build();
        self.peer.send_frame(self.server(), &frame).await;
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Writes
    // ═══════════════════════════════════════════════════════════════════════

    /// Create `path` and write `data` with a simple write
    ///
    /// # Errors
    /// See [`ShareClient::open`]
    pub async fn put(&self, path: &str, data: &[u8]) -> Result<u32> {
        let object = self.create(path).await?;
        let result = self.write(object.handle, 0, data, false).await;
        self.finish(object.handle, result).await
    }

    /// Create `path` and write `data` with a pipelined write
    ///
    /// # Errors
    /// See [`ShareClient::open`]
    pub async fn pput(&self, path: &str, data: &[u8]) -> Result<u32> {
        let object = self.create(path).await?;
        let result = self.write(object.handle, 0, data, true).await;
        self.finish(object.handle, result).await
    }

    /// Write `data` at `start`. A pipelined write uses offsets relative to
    /// `start` and sends blocks ahead of each window; a simple write uses
    /// absolute offsets and only the requested block. Returns the number of
    /// bytes the server wrote.
    ///
    /// # Errors
    /// See [`ShareClient::open`]
    pub async fn write(&self, handle: u32, start: u32, data: &[u8], pipelined: bool) -> Result<u32> {
        let (id, waiter) = self.begin();
        let command = if pipelined {
            Command::Request
        } else {
            Command::SimpleRequest
        };
        let length = data.len() as u32;
        let request = FrameBuilder::request(command, id, Opcode::Write)
            .words(&[handle, start, length])
            .build();
        let base = if pipelined { 0 } else { start };
        let ahead = if pipelined { WRITE_AHEAD } else { 0 };
        let timings = &self.peer.inner.config.timings;
        let mut heard = false;
        let mut silent = 0;

        self.peer.send_frame(self.server(), &request).await;
        loop {
            let Some(frame) = waiter.recv_timeout(timings.reply_timeout).await else {
                silent += 1;
                if silent >= timings.max_attempts {
                    return Err(self.unresponsive());
                }
                if !heard {
                    self.peer.send_frame(self.server(), &request).await;
                }
                continue;
            };
            silent = 0;
            heard = true;
            let accept = [Command::WriteWindow, Command::Reply, Command::SimpleReply];
            let Some(frame) = check_reply(frame, &accept)? else {
                continue;
            };
            let mut r = WordReader::new(&frame[4..]);
            if frame[0] != Command::WriteWindow.as_u8() {
                let _from = r.word()?;
                return Ok(r.word()?);
            }

            let pos = r.word()?;
            let _ = r.word()?;
            let end = r.word()?;
            let mut at = pos.saturating_sub(base) as usize;
            let mut block_end = end.saturating_sub(base) as usize;
            for _ in 0..=ahead {
                if at > data.len() {
                    break;
                }
                let stop = block_end.min(data.len()).max(at);
                let block = FrameBuilder::new(Command::WriteData, id)
                    .word(base.wrapping_add(at as u32))
                    .bytes(&data[at..stop])
                    .build();
                self.peer.send_frame(self.server(), &block).await;
                if stop == data.len() {
                    break;
                }
                at = stop;
                block_end = at + MAX_BLOCK;
            }
        }
    }

    /// Close `handle` after an operation, keeping the operation's error
    async fn finish<T>(&self, handle: u32, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.close(handle).await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(close) = self.close(handle).await {
                    tracing::debug!("Close of {} after failure: {}", handle, close);
                }
                Err(e)
            }
        }
    }
}

/// `Some(frame)` when it is one of `accept`, an error for `E` frames,
/// `None` for anything else
fn check_reply(frame: Vec<u8>, accept: &[Command]) -> Result<Option<Vec<u8>>> {
    let parsed = Frame::parse(&frame)?;
    let command = parsed.command();
    if command == Command::Error {
        return Err(parsed.wire_error()?.into());
    }
    if accept.contains(&command) {
        return Ok(Some(frame));
    }
    tracing::trace!("Ignoring {:?} while waiting for {:?}", command, accept);
    Ok(None)
}

fn decode_object(payload: &[u8]) -> Result<RemoteObject> {
    let (info, handle) = decode_opened(&mut WordReader::new(payload))?;
    Ok(RemoteObject { handle, info })
}

/// Decode one catalogue chunk
fn parse_chunk(r: &mut WordReader<'_>) -> std::result::Result<Vec<RemoteEntry>, FrameError> {
    let entry_bytes = r.word()? as usize;
    let _tag = r.word()?;
    let start = r.position();
    let mut entries = Vec::new();
    while r.position() - start < entry_bytes {
        let info = ObjectInfo::decode(r)?;
        let name = latin1_decode(r.string()?);
        entries.push(RemoteEntry { name, info });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharefs_files::ObjectType;
    use sharefs_files::catalogue::{CatalogueEntry, Listing};
    use sharefs_wire::{WireError, WordWriter, error_frame};

    fn entry(name: &str) -> CatalogueEntry {
        CatalogueEntry {
            info: ObjectInfo {
                ft_word: 0xFFFF_FF00,
                date_word: 0,
                length: 12,
                access: 0x33,
                object_type: ObjectType::File,
            },
            name: name.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_parse_chunk() {
        let listing = Listing::build(&[entry("a"), entry("longer_name"), entry("abcd")]);
        assert_eq!(listing.chunks.len(), 1);
        let mut w = WordWriter::new();
        w.bytes(&listing.chunks[0]).word(FINAL_MARKER);
        let bytes = w.finish();

        let mut r = WordReader::new(&bytes);
        let entries = parse_chunk(&mut r).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["a", "longer_name", "abcd"]);
        assert_eq!(entries[1].info.length, 12);
        assert_eq!(r.word().unwrap(), FINAL_MARKER);
    }

    #[test]
    fn test_parse_empty_chunk() {
        let bytes = sharefs_files::catalogue::empty_chunk();
        let mut r = WordReader::new(&bytes);
        assert!(parse_chunk(&mut r).unwrap().is_empty());
        assert!(r.is_empty());
    }

    #[test]
    fn test_check_reply() {
        let reply = FrameBuilder::new(Command::Reply, 1).word(7).build();
        assert!(check_reply(reply, &[Command::Reply]).unwrap().is_some());

        let data = FrameBuilder::new(Command::Data, 1).word(0).build();
        assert!(check_reply(data, &[Command::Reply]).unwrap().is_none());

        let err = error_frame(1, &WireError::not_found());
        match check_reply(err, &[Command::Reply]) {
            Err(NodeError::Remote { code, message }) => {
                assert_eq!(code, sharefs_wire::error_code::NOT_FOUND);
                assert_eq!(message, "Not found");
            }
            other => panic!("expected remote error, got {:?}", other),
        }
    }
}
