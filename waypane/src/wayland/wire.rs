//! The wayland wire format.
//!
//! Every message is a `[sender_id: u32][size: u16 | opcode: u16]` header
//! followed by `size - 8` bytes of arguments, all in the host's byte order.
//! The codec here only understands 32-bit words, length-prefixed strings and
//! byte arrays; which arguments a given (object, opcode) pair takes is the
//! caller's business, so the per-interface code in
//! [`interfaces`](super::interfaces) sits on top of this.
//!
//! The one thing the stream itself cannot carry is a file descriptor, which
//! the `create_pool` request needs. Those ride along as `SCM_RIGHTS`
//! ancillary data on the same `sendmsg` call.

use std::num::NonZeroU32;

use rustix::fd::BorrowedFd;
use rustix::{io, net};

use super::{Error, ObjectId};

pub const HEADER_SIZE: usize = 8;

/// A decoded message header plus a cursor over its body.
///
/// The body itself lives in the caller's buffer: `recv` resizes it to exactly
/// the advertised body length and overwrites it whole, so one buffer can be
/// reused across a read loop without carrying state between messages.
#[derive(Debug)]
pub struct WireMsg {
    sender_id: ObjectId,
    op: u16,
    cur: usize,
}

impl WireMsg {
    /// Reads one message, filling `buf` with its body.
    ///
    /// A peer that closes the connection in the middle of a header or a body
    /// leaves the stream unrecoverable, so both cases are
    /// [`Error::UnexpectedEof`].
    pub fn recv(fd: BorrowedFd, buf: &mut Vec<u8>) -> Result<Self, Error> {
        let mut header = [0u8; HEADER_SIZE];
        if recv_exact(fd, &mut header)? < HEADER_SIZE {
            return Err(Error::UnexpectedEof);
        }

        let sender = u32::from_ne_bytes(header[0..4].try_into().unwrap());
        let word = u32::from_ne_bytes(header[4..8].try_into().unwrap());
        let op = (word & 0xFFFF) as u16;
        let size = (word >> 16) as usize;

        let Some(sender) = NonZeroU32::new(sender) else {
            return Err(Error::Malformed {
                object: 0,
                what: "message with a null sender id",
            });
        };
        if size < HEADER_SIZE {
            return Err(Error::Malformed {
                object: sender.get(),
                what: "message size smaller than its own header",
            });
        }

        buf.clear();
        buf.resize(size - HEADER_SIZE, 0);
        if !buf.is_empty() && recv_exact(fd, buf)? < buf.len() {
            return Err(Error::UnexpectedEof);
        }

        Ok(Self {
            sender_id: ObjectId::new(sender),
            op,
            cur: 0,
        })
    }

    #[must_use]
    pub const fn sender_id(&self) -> ObjectId {
        self.sender_id
    }

    #[must_use]
    pub const fn op(&self) -> u16 {
        self.op
    }

    pub fn next_u32(&mut self, body: &[u8]) -> Result<u32, Error> {
        let Some(bytes) = body.get(self.cur..self.cur + 4) else {
            return Err(self.truncated());
        };
        self.cur += 4;
        Ok(u32::from_ne_bytes(bytes.try_into().unwrap()))
    }

    pub fn next_i32(&mut self, body: &[u8]) -> Result<i32, Error> {
        self.next_u32(body).map(|u| u as i32)
    }

    /// An object argument; 0 on the wire is the null object.
    pub fn next_object(&mut self, body: &[u8]) -> Result<Option<ObjectId>, Error> {
        Ok(NonZeroU32::new(self.next_u32(body)?).map(ObjectId::new))
    }

    /// The wire length prefix counts the terminating zero byte; the returned
    /// `str` does not include it.
    pub fn next_str<'a>(&mut self, body: &'a [u8]) -> Result<&'a str, Error> {
        let len = self.next_u32(body)? as usize;
        if len == 0 {
            return Err(Error::Malformed {
                object: self.sender_id.get(),
                what: "string argument without its terminating zero byte",
            });
        }
        let padded = len.next_multiple_of(4);
        if body.len() < self.cur + padded {
            return Err(self.truncated());
        }
        let bytes = &body[self.cur..self.cur + len - 1];
        self.cur += padded;
        std::str::from_utf8(bytes).map_err(|_| Error::Malformed {
            object: self.sender_id.get(),
            what: "string argument is not valid utf8",
        })
    }

    pub fn next_array<'a>(&mut self, body: &'a [u8]) -> Result<&'a [u8], Error> {
        let len = self.next_u32(body)? as usize;
        let padded = len.next_multiple_of(4);
        if body.len() < self.cur + padded {
            return Err(self.truncated());
        }
        let bytes = &body[self.cur..self.cur + len];
        self.cur += padded;
        Ok(bytes)
    }

    fn truncated(&self) -> Error {
        Error::Malformed {
            object: self.sender_id.get(),
            what: "message body is shorter than its arguments",
        }
    }
}

/// Reads until `buf` is full or the peer closes the connection, returning how
/// many bytes actually arrived.
fn recv_exact(fd: BorrowedFd, buf: &mut [u8]) -> Result<usize, Error> {
    // retrying here matters: bailing out on INTR mid-message would leave the
    // socket's buffer holding a torn frame
    io::retry_on_intr(|| {
        let iov = io::IoSliceMut::new(&mut *buf);
        let mut control = net::RecvAncillaryBuffer::default();
        net::recvmsg(fd, &mut [iov], &mut control, net::RecvFlags::WAITALL)
    })
    .map(|r| r.bytes)
    .map_err(Error::Read)
}

/// Builds one outgoing message. The size field of the header is patched in
/// by [`send`](Self::send), once the argument count is known.
pub struct WireMsgBuilder<'fd> {
    msg: Vec<u8>,
    fds: Vec<BorrowedFd<'fd>>,
}

impl<'fd> WireMsgBuilder<'fd> {
    #[must_use]
    pub fn new(sender_id: ObjectId, op: u16) -> Self {
        let mut msg = Vec::with_capacity(HEADER_SIZE + 16);
        msg.extend_from_slice(&sender_id.get().to_ne_bytes());
        msg.extend_from_slice(&(op as u32).to_ne_bytes());
        Self {
            msg,
            fds: Vec::new(),
        }
    }

    pub fn add_u32(&mut self, u: u32) {
        self.msg.extend_from_slice(&u.to_ne_bytes());
    }

    pub fn add_i32(&mut self, i: i32) {
        self.add_u32(i as u32);
    }

    pub fn add_object(&mut self, object_id: Option<ObjectId>) {
        self.add_u32(object_id.map_or(0, |id| id.get()));
    }

    /// A `new_id` argument whose interface both sides already know.
    pub fn add_new_id(&mut self, object_id: ObjectId) {
        self.add_u32(object_id.get());
    }

    /// An untyped `new_id` argument: interface name, version, then the id.
    /// Only `wl_registry.bind` uses this form.
    pub fn add_unversioned_new_id(&mut self, object_id: ObjectId, interface: &str, version: u32) {
        self.add_string(interface);
        self.add_u32(version);
        self.add_new_id(object_id);
    }

    /// Length prefix (terminator included), the bytes, then zero padding up
    /// to the next word boundary.
    pub fn add_string(&mut self, s: &str) {
        let len = s.len() + 1;
        self.add_u32(len as u32);
        self.msg.extend_from_slice(s.as_bytes());
        // the terminating zero byte is part of the padding run
        self.msg.resize(self.msg.len() + len.next_multiple_of(4) - s.len(), 0);
    }

    /// Attaches a descriptor to be passed out-of-band on the same write. It
    /// takes up no space in the message body.
    pub fn add_fd(&mut self, fd: BorrowedFd<'fd>) {
        self.fds.push(fd);
    }

    pub fn send(self, fd: BorrowedFd) -> Result<(), Error> {
        let Self { mut msg, fds } = self;
        debug_assert!(msg.len() <= u16::MAX as usize);
        let word =
            u32::from_ne_bytes(msg[4..8].try_into().unwrap()) | ((msg.len() as u32) << 16);
        msg[4..8].copy_from_slice(&word.to_ne_bytes());
        send_raw(fd, &msg, &fds)
    }
}

fn send_raw(fd: BorrowedFd, msg: &[u8], fds: &[BorrowedFd]) -> Result<(), Error> {
    debug_assert!(fds.len() <= 1, "no request carries more than one fd");

    let iov = io::IoSlice::new(msg);
    let mut space = [0u8; rustix::cmsg_space!(ScmRights(1))];
    let mut control = net::SendAncillaryBuffer::new(&mut space);
    if !fds.is_empty() {
        let pushed = control.push(net::SendAncillaryMessage::ScmRights(fds));
        debug_assert!(pushed);
    }

    let written = net::sendmsg(fd, &[iov], &mut control, net::SendFlags::NOSIGNAL)
        .map_err(Error::Write)?;
    if written != msg.len() {
        // an fd that was only partially announced is gone for good, the
        // stream cannot be resynchronized either way
        return Err(if fds.is_empty() {
            Error::ShortWrite {
                written,
                len: msg.len(),
            }
        } else {
            Error::ConnectionClosed
        });
    }
    Ok(())
}
