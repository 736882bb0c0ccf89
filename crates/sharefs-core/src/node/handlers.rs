//! Request handlers.
//!
//! One spawned task per inbound `A`/`B` request. Short operations answer
//! with a single `R`/`S` (or `E`) frame; reads, writes and renames hand over
//! to the transfer engine, which sends its own frames.

use crate::node::node::Peer;
use crate::node::transfer::TransferRequest;
use sharefs_files::{Role, ShareError};
use sharefs_wire::{
    Command, Frame, FrameBuilder, MAX_SIMPLE_READ, Opcode, WordReader, WordWriter, error_frame,
};
use std::net::SocketAddrV4;

/// What a handler produced
enum Outcome {
    /// Reply payload, sent with the request's reply letter
    Reply(Vec<u8>),
    /// The handler (or a task it ran) already answered, or stays silent
    Done,
}

impl Peer {
    /// Handle one request datagram from `from`
    pub(crate) async fn handle_request(&self, from: SocketAddrV4, data: Vec<u8>) {
        let Ok(frame) = Frame::parse(&data) else {
            return;
        };
        let (command, id) = (frame.command(), frame.id());

        match self.dispatch(from, &frame).await {
            Ok(Outcome::Reply(payload)) => {
                let reply = FrameBuilder::new(command.reply_letter(), id)
                    .bytes(&payload)
                    .build();
                self.send_frame(from, &reply).await;
            }
            Ok(Outcome::Done) => {}
            Err(e) => {
                tracing::debug!("Request {:#x} from {} failed: {}", id, from, e);
                self.send_frame(from, &error_frame(id, &e.to_wire())).await;
            }
        }
    }

    async fn dispatch(&self, from: SocketAddrV4, frame: &Frame<'_>) -> Result<Outcome, ShareError> {
        let manager = &self.inner.manager;
        let user = *from.ip();
        let command = frame.command();
        let mut r = frame.reader();
        let opcode = Opcode::try_from(r.word()?)?;
        tracing::trace!("{:?} {:?} {:#x} from {}", command, opcode, frame.id(), from);

        let mut w = WordWriter::with_capacity(64);
        match opcode {
            Opcode::OpenRead | Opcode::OpenUpdate => {
                let role = if opcode == Opcode::OpenRead {
                    Role::Read
                } else {
                    Role::ReadWrite
                };
                let opened = manager.open(r.lenient_string(), user, role)?;
                opened.info.encode(&mut w);
                w.word(opened.handle);
            }
            Opcode::CreateFile => {
                let opened = manager.create_file(r.lenient_string(), user)?;
                opened.info.encode(&mut w);
                w.word(opened.handle);
            }
            Opcode::CreateDirectory => {
                manager.create_directory(r.lenient_string())?.encode(&mut w);
            }
            Opcode::Delete => {
                manager.delete(r.lenient_string())?.encode(&mut w);
            }
            Opcode::SetAccess => {
                let access = r.word()?;
                manager.set_access(r.lenient_string(), access)?.encode(&mut w);
            }
            Opcode::FreeSpace | Opcode::FreeSpaceAlt => {
                let free = manager.free_space(r.lenient_string())?;
                w.word(free.min(u32::MAX as u64) as u32);
            }
            Opcode::Rename => {
                let source = r.lenient_string().to_vec();
                self.rename_task(from, frame.id(), command.reply_letter(), source)
                    .await;
                return Ok(Outcome::Done);
            }
            Opcode::Close => {
                manager.close(r.word()?, user)?;
            }
            Opcode::Read if command == Command::SimpleRequest => {
                let (handle, pos, len) = (r.word()?, r.word()?, r.word()?);
                let data = manager.read_at(handle, user, pos as u64, (len as usize).min(MAX_SIMPLE_READ))?;
                let n = data.len() as u32;
                w.words(&[n, 0xC]).padded(&data).words(&[n, pos.wrapping_add(n)]);
            }
            Opcode::Read | Opcode::Write => {
                let req = TransferRequest {
                    from,
                    id: frame.id(),
                    reply: command.reply_letter(),
                    handle: r.word()?,
                    start: r.word()?,
                    length: r.word()?,
                };
                if opcode == Opcode::Read {
                    self.send_task(req).await;
                } else {
                    self.receive_task(req, command == Command::SimpleRequest).await;
                }
                return Ok(Outcome::Done);
            }
            Opcode::CatalogueContinue => {
                let (dir_handle, echo) = (r.word()?, r.word()?);
                match manager.catalogue_continue(dir_handle, user, echo) {
                    Some(payload) => return Ok(Outcome::Reply(payload)),
                    None => {
                        tracing::trace!("Dropping stale continuation {:#x} from {}", echo, from);
                        return Ok(Outcome::Done);
                    }
                }
            }
            Opcode::Catalogue => {
                return Ok(Outcome::Reply(manager.catalogue(r.lenient_string(), user)?));
            }
            Opcode::SetLength | Opcode::SetLengthAlt => {
                let (handle, len) = (r.word()?, r.word()?);
                let new_len = manager.set_length(handle, user, len as u64)?;
                w.word(new_len as u32);
            }
            Opcode::SetFiletype => {
                let (handle, ft_word, date_word) = (r.word()?, r.word()?, r.word()?);
                w.word(manager.set_filetype(handle, user, ft_word, date_word)?);
            }
        }
        Ok(Outcome::Reply(w.finish()))
    }
}

/// Decode an open/create reply payload into `(info, handle)`
pub(crate) fn decode_opened(
    r: &mut WordReader<'_>,
) -> Result<(sharefs_files::ObjectInfo, u32), sharefs_wire::FrameError> {
    let info = sharefs_files::ObjectInfo::decode(r)?;
    Ok((info, r.word()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::transfer::encode_info;
    use sharefs_files::{ObjectInfo, ObjectType};

    #[test]
    fn test_opened_layout() {
        let info = ObjectInfo {
            ft_word: 0xFFFF_FF12,
            date_word: 0x3456_7890,
            length: 5,
            access: 0x33,
            object_type: ObjectType::File,
        };
        let bytes = encode_info(FrameBuilder::new(Command::Reply, 1), &info)
            .word(4)
            .build();
        assert_eq!(bytes.len(), 4 + 24);
        let mut r = WordReader::new(&bytes[4..]);
        let (decoded, handle) = decode_opened(&mut r).unwrap();
        assert_eq!(decoded, info);
        assert_eq!(handle, 4);
    }
}
