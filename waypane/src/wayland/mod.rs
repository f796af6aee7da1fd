use std::num::NonZeroU32;

pub mod bootstrap;
pub mod interfaces;
pub mod pool;
pub mod wire;

/// The one object that exists before any message is exchanged: the
/// `wl_display` connection object, always id 1.
pub const WL_DISPLAY: ObjectId = ObjectId(unsafe { NonZeroU32::new_unchecked(1) });

/// Names a protocol object on one connection. Zero is the null object on the
/// wire, so a valid id is always non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObjectId(NonZeroU32);

impl ObjectId {
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0.get()
    }

    #[must_use]
    pub const fn new(value: NonZeroU32) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Hands out client-side object ids, strictly increasing, starting right
/// after the pre-assigned `wl_display`.
///
/// Nothing is destroyed before the bootstrap phase ends, so ids are never
/// recycled.
#[derive(Debug)]
pub struct IdAllocator {
    next: NonZeroU32,
}

impl IdAllocator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: unsafe { NonZeroU32::new_unchecked(2) },
        }
    }

    /// The id the next call to `allocate` will return.
    ///
    /// Used by the descriptor-passing path, which must only consume the id
    /// once the request actually made it onto the socket.
    #[must_use]
    pub const fn peek(&self) -> ObjectId {
        ObjectId(self.next)
    }

    #[must_use]
    pub fn allocate(&mut self) -> ObjectId {
        let id = self.next;
        self.next = self
            .next
            .checked_add(1)
            .expect("exhausted the client object id namespace");
        ObjectId(id)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything that can go wrong while talking to the compositor.
///
/// None of these are retryable: the wire protocol has no resynchronization
/// mechanism, so any failure poisons the whole connection.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read from the wayland socket: {0}")]
    Read(#[source] rustix::io::Errno),

    #[error("failed to write to the wayland socket: {0}")]
    Write(#[source] rustix::io::Errno),

    #[error("wayland socket closed in the middle of a message")]
    UnexpectedEof,

    #[error("short write on the wayland socket ({written} of {len} bytes)")]
    ShortWrite { written: usize, len: usize },

    #[error("connection closed while transferring a file descriptor")]
    ConnectionClosed,

    #[error("{interface} is version {actual}, but we need at least {min}")]
    VersionTooOld {
        interface: &'static str,
        min: u32,
        actual: u32,
    },

    #[error("compositor does not advertise required global: {0}")]
    MissingGlobal(&'static str),

    #[error("object {object} sent opcode {opcode}, which is invalid at this point")]
    InvalidOpcode { object: u32, opcode: u16 },

    #[error("malformed message from object {object}: {what}")]
    Malformed { object: u32, what: &'static str },

    #[error("protocol error on object {object}, code {code}: {message}")]
    Protocol {
        object: u32,
        code: u32,
        message: String,
    },
}
