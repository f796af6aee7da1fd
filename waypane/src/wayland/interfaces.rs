//! The interfaces this client speaks.
//!
//! Only the requests and events the bootstrap actually exercises are
//! implemented; opcodes are fixed by the protocol definition. Each interface
//! gets a module with its request constructors under `req` and, where the
//! server can talk back, an `EvHandler` trait plus an `event` dispatcher that
//! decodes the body and hands the arguments to the current state.

use rustix::fd::BorrowedFd;

use super::wire::{WireMsg, WireMsgBuilder};
use super::{Error, ObjectId, WL_DISPLAY};

/// The special singleton connection object, always id 1.
pub mod wl_display {
    use super::*;

    pub trait EvHandler {
        /// A fatal, non-recoverable error. The default handler surfaces it
        /// as [`Error::Protocol`]; there is never a reason to continue after
        /// one.
        fn error(&mut self, object_id: ObjectId, code: u32, message: &str) -> Result<(), Error> {
            Err(Error::Protocol {
                object: object_id.get(),
                code,
                message: message.to_owned(),
            })
        }

        /// The server acknowledging that a client-destroyed id can be
        /// reused. We never reuse ids, so this is bookkeeping noise.
        fn delete_id(&mut self, id: u32) -> Result<(), Error> {
            log::debug!("compositor confirmed deletion of object {id}");
            Ok(())
        }
    }

    pub fn event<T: EvHandler>(state: &mut T, mut msg: WireMsg, body: &[u8]) -> Result<(), Error> {
        match msg.op() {
            0 => {
                let object_id = msg.next_object(body)?.ok_or(Error::Malformed {
                    object: WL_DISPLAY.get(),
                    what: "error event with a null object id",
                })?;
                let code = msg.next_u32(body)?;
                let message = msg.next_str(body)?;
                state.error(object_id, code, message)
            }
            1 => {
                let id = msg.next_u32(body)?;
                state.delete_id(id)
            }
            e => {
                log::error!("unrecognized event opcode {e} for interface wl_display");
                Ok(())
            }
        }
    }

    pub mod req {
        use super::*;

        /// Asks the server to fire `done` on `callback` once everything
        /// queued before this request has been processed. The ordering
        /// barrier the whole registry handshake hangs off of.
        pub fn sync(fd: BorrowedFd, callback: ObjectId) -> Result<(), Error> {
            let mut builder = WireMsgBuilder::new(WL_DISPLAY, 0);
            builder.add_new_id(callback);
            builder.send(fd)
        }

        /// Creates the registry object that announces the server's globals.
        pub fn get_registry(fd: BorrowedFd, registry: ObjectId) -> Result<(), Error> {
            let mut builder = WireMsgBuilder::new(WL_DISPLAY, 1);
            builder.add_new_id(registry);
            builder.send(fd)
        }
    }
}

/// The global registry: the server announces each capability ("global") with
/// a numeric name, an interface string and a version; the client picks the
/// ones it wants with `bind`.
pub mod wl_registry {
    use super::*;

    pub trait EvHandler {
        fn global(&mut self, name: u32, interface: &str, version: u32) -> Result<(), Error>;

        fn global_remove(&mut self, name: u32) -> Result<(), Error> {
            log::debug!("global {name} removed, which we do not track");
            Ok(())
        }
    }

    pub fn event<T: EvHandler>(state: &mut T, mut msg: WireMsg, body: &[u8]) -> Result<(), Error> {
        match msg.op() {
            0 => {
                let name = msg.next_u32(body)?;
                let interface = msg.next_str(body)?;
                let version = msg.next_u32(body)?;
                state.global(name, interface, version)
            }
            1 => {
                let name = msg.next_u32(body)?;
                state.global_remove(name)
            }
            e => {
                log::error!("unrecognized event opcode {e} for interface wl_registry");
                Ok(())
            }
        }
    }

    pub mod req {
        use super::*;

        /// Binds the global `name` to the client-created `id`, at `version`.
        /// The only request with an untyped `new_id`, which is why the
        /// interface string travels on the wire.
        pub fn bind(
            fd: BorrowedFd,
            registry: ObjectId,
            name: u32,
            id: ObjectId,
            interface: &str,
            version: u32,
        ) -> Result<(), Error> {
            let mut builder = WireMsgBuilder::new(registry, 0);
            builder.add_u32(name);
            builder.add_unversioned_new_id(id, interface, version);
            builder.send(fd)
        }
    }
}

/// Single-shot callback object; its one event is `done`.
pub mod wl_callback {
    use super::*;

    pub trait EvHandler {
        fn done(&mut self, sender_id: ObjectId, callback_data: u32) -> Result<(), Error>;
    }

    pub fn event<T: EvHandler>(state: &mut T, mut msg: WireMsg, body: &[u8]) -> Result<(), Error> {
        match msg.op() {
            0 => {
                let callback_data = msg.next_u32(body)?;
                state.done(msg.sender_id(), callback_data)
            }
            e => {
                log::error!("unrecognized event opcode {e} for interface wl_callback");
                Ok(())
            }
        }
    }
}

/// Surface factory singleton.
pub mod wl_compositor {
    use super::*;

    pub mod req {
        use super::*;

        pub fn create_surface(
            fd: BorrowedFd,
            compositor: ObjectId,
            id: ObjectId,
        ) -> Result<(), Error> {
            let mut builder = WireMsgBuilder::new(compositor, 0);
            builder.add_new_id(id);
            builder.send(fd)
        }
    }
}

/// Shared memory factory singleton. After binding it announces the pixel
/// formats it accepts; every compositor must take ARGB8888 and XRGB8888.
pub mod wl_shm {
    use super::*;

    pub trait EvHandler {
        fn format(&mut self, format: u32) -> Result<(), Error> {
            log::debug!("compositor supports shm format {format:#010x}");
            Ok(())
        }
    }

    pub fn event<T: EvHandler>(state: &mut T, mut msg: WireMsg, body: &[u8]) -> Result<(), Error> {
        match msg.op() {
            0 => {
                let format = msg.next_u32(body)?;
                state.format(format)
            }
            e => {
                log::error!("unrecognized event opcode {e} for interface wl_shm");
                Ok(())
            }
        }
    }

    pub mod req {
        use super::*;

        /// Creates a pool backed by `size` bytes of `pool_fd`. The
        /// descriptor travels out-of-band; the body only carries the new id
        /// and the length.
        pub fn create_pool(
            fd: BorrowedFd,
            shm: ObjectId,
            id: ObjectId,
            pool_fd: BorrowedFd,
            size: i32,
        ) -> Result<(), Error> {
            let mut builder = WireMsgBuilder::new(shm, 0);
            builder.add_new_id(id);
            builder.add_fd(pool_fd);
            builder.add_i32(size);
            builder.send(fd)
        }
    }

    pub mod format {
        pub const ARGB8888: u32 = 0;
        pub const XRGB8888: u32 = 1;
    }
}

/// A piece of memory shared with the compositor, from which buffers are cut.
pub mod wl_shm_pool {
    use super::*;

    pub mod req {
        use super::*;

        pub fn create_buffer(
            fd: BorrowedFd,
            pool: ObjectId,
            id: ObjectId,
            offset: i32,
            width: i32,
            height: i32,
            stride: i32,
            format: u32,
        ) -> Result<(), Error> {
            let mut builder = WireMsgBuilder::new(pool, 0);
            builder.add_new_id(id);
            builder.add_i32(offset);
            builder.add_i32(width);
            builder.add_i32(height);
            builder.add_i32(stride);
            builder.add_u32(format);
            builder.send(fd)
        }

        pub fn destroy(fd: BorrowedFd, pool: ObjectId) -> Result<(), Error> {
            WireMsgBuilder::new(pool, 1).send(fd)
        }
    }
}

/// Pixel storage attached to a surface.
pub mod wl_buffer {
    use super::*;

    pub trait EvHandler {
        /// The compositor is done reading the buffer and we may scribble
        /// over it again.
        fn release(&mut self, sender_id: ObjectId) -> Result<(), Error>;
    }

    pub fn event<T: EvHandler>(state: &mut T, msg: WireMsg, _body: &[u8]) -> Result<(), Error> {
        match msg.op() {
            0 => state.release(msg.sender_id()),
            e => {
                log::error!("unrecognized event opcode {e} for interface wl_buffer");
                Ok(())
            }
        }
    }

    pub mod req {
        use super::*;

        pub fn destroy(fd: BorrowedFd, buffer: ObjectId) -> Result<(), Error> {
            WireMsgBuilder::new(buffer, 0).send(fd)
        }
    }
}

/// A rectangle of pixels the compositor may present. All of its state is
/// double-buffered: nothing takes effect until `commit`.
pub mod wl_surface {
    use super::*;

    pub mod req {
        use super::*;

        pub fn attach(
            fd: BorrowedFd,
            surface: ObjectId,
            buffer: Option<ObjectId>,
            x: i32,
            y: i32,
        ) -> Result<(), Error> {
            let mut builder = WireMsgBuilder::new(surface, 1);
            builder.add_object(buffer);
            builder.add_i32(x);
            builder.add_i32(y);
            builder.send(fd)
        }

        /// Atomically applies all pending state. A commit with nothing
        /// attached signals "the initial state is ready", which is how the
        /// configure handshake starts.
        pub fn commit(fd: BorrowedFd, surface: ObjectId) -> Result<(), Error> {
            WireMsgBuilder::new(surface, 6).send(fd)
        }

        pub fn damage_buffer(
            fd: BorrowedFd,
            surface: ObjectId,
            x: i32,
            y: i32,
            width: i32,
            height: i32,
        ) -> Result<(), Error> {
            let mut builder = WireMsgBuilder::new(surface, 9);
            builder.add_i32(x);
            builder.add_i32(y);
            builder.add_i32(width);
            builder.add_i32(height);
            builder.send(fd)
        }
    }
}

/// The window-shell base global. Wraps plain surfaces into shell surfaces
/// and pings the client to check it is still alive.
pub mod xdg_wm_base {
    use super::*;

    pub trait EvHandler {
        /// Must be answered with `pong` carrying the same serial, or the
        /// compositor will deem us unresponsive.
        fn ping(&mut self, serial: u32) -> Result<(), Error>;
    }

    pub fn event<T: EvHandler>(state: &mut T, mut msg: WireMsg, body: &[u8]) -> Result<(), Error> {
        match msg.op() {
            0 => {
                let serial = msg.next_u32(body)?;
                state.ping(serial)
            }
            e => {
                log::error!("unrecognized event opcode {e} for interface xdg_wm_base");
                Ok(())
            }
        }
    }

    pub mod req {
        use super::*;

        pub fn get_xdg_surface(
            fd: BorrowedFd,
            wm_base: ObjectId,
            id: ObjectId,
            surface: ObjectId,
        ) -> Result<(), Error> {
            let mut builder = WireMsgBuilder::new(wm_base, 2);
            builder.add_new_id(id);
            builder.add_object(Some(surface));
            builder.send(fd)
        }

        pub fn pong(fd: BorrowedFd, wm_base: ObjectId, serial: u32) -> Result<(), Error> {
            let mut builder = WireMsgBuilder::new(wm_base, 3);
            builder.add_u32(serial);
            builder.send(fd)
        }
    }
}

/// The shell wrapper around a surface. Its configure/ack handshake is the
/// only negotiation required before the surface counts as ready.
pub mod xdg_surface {
    use super::*;

    pub trait EvHandler {
        fn configure(&mut self, serial: u32) -> Result<(), Error>;
    }

    /// Unlike the other dispatchers, an unknown opcode here is fatal: while
    /// we are waiting on this object the protocol defines exactly one valid
    /// event, so anything else is a peer violation.
    pub fn event<T: EvHandler>(state: &mut T, mut msg: WireMsg, body: &[u8]) -> Result<(), Error> {
        match msg.op() {
            0 => {
                let serial = msg.next_u32(body)?;
                state.configure(serial)
            }
            e => Err(Error::InvalidOpcode {
                object: msg.sender_id().get(),
                opcode: e,
            }),
        }
    }

    pub mod req {
        use super::*;

        pub fn get_toplevel(
            fd: BorrowedFd,
            xdg_surface: ObjectId,
            id: ObjectId,
        ) -> Result<(), Error> {
            let mut builder = WireMsgBuilder::new(xdg_surface, 1);
            builder.add_new_id(id);
            builder.send(fd)
        }

        pub fn ack_configure(
            fd: BorrowedFd,
            xdg_surface: ObjectId,
            serial: u32,
        ) -> Result<(), Error> {
            let mut builder = WireMsgBuilder::new(xdg_surface, 4);
            builder.add_u32(serial);
            builder.send(fd)
        }
    }
}

/// The top-level window role.
pub mod xdg_toplevel {
    use super::*;

    pub trait EvHandler {
        /// A size suggestion; 0x0 means "you pick".
        fn configure(&mut self, width: i32, height: i32, states: &[u8]) -> Result<(), Error> {
            log::debug!("toplevel configure suggesting {width}x{height} ({} state bytes)", states.len());
            Ok(())
        }

        fn close(&mut self) -> Result<(), Error>;
    }

    pub fn event<T: EvHandler>(state: &mut T, mut msg: WireMsg, body: &[u8]) -> Result<(), Error> {
        match msg.op() {
            0 => {
                let width = msg.next_i32(body)?;
                let height = msg.next_i32(body)?;
                let states = msg.next_array(body)?;
                state.configure(width, height, states)
            }
            1 => state.close(),
            // configure_bounds and wm_capabilities carry nothing we act on
            2 | 3 => Ok(()),
            e => {
                log::error!("unrecognized event opcode {e} for interface xdg_toplevel");
                Ok(())
            }
        }
    }

    pub mod req {
        use super::*;

        pub fn set_title(fd: BorrowedFd, toplevel: ObjectId, title: &str) -> Result<(), Error> {
            let mut builder = WireMsgBuilder::new(toplevel, 2);
            builder.add_string(title);
            builder.send(fd)
        }

        pub fn set_app_id(fd: BorrowedFd, toplevel: ObjectId, app_id: &str) -> Result<(), Error> {
            let mut builder = WireMsgBuilder::new(toplevel, 3);
            builder.add_string(app_id);
            builder.send(fd)
        }
    }
}
