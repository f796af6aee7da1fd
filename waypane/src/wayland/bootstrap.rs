//! Connection bootstrap: registry discovery, then surface/shell setup.
//!
//! Both phases are strictly synchronous. Every request that expects a reply
//! is followed by a blocking read loop whose termination condition comes
//! straight from protocol ordering: the registry phase ends when the sync
//! callback fires (the server delivers it only after every previously queued
//! global announcement), and the shell phase ends after the first
//! configure/ack round-trip.

use rustix::fd::BorrowedFd;

use super::interfaces::{
    wl_callback, wl_compositor, wl_display, wl_registry, wl_surface, xdg_surface, xdg_toplevel,
    xdg_wm_base,
};
use super::wire::WireMsg;
use super::{Error, IdAllocator, ObjectId, WL_DISPLAY};

/// The globals this client cannot function without. `wl_display` and
/// `wl_registry` always exist; these three have to be announced.
const REQUIRED_GLOBALS: [&str; 3] = ["wl_shm", "wl_compositor", "xdg_wm_base"];
/// Minimum acceptable version for each entry of `REQUIRED_GLOBALS`. There is
/// no fallback path for older compositors.
const MIN_VERSIONS: [u32; 3] = [1, 5, 2];

/// The ids the registry phase must produce before anything else can happen.
#[derive(Debug)]
pub struct BoundGlobals {
    pub shm: ObjectId,
    pub compositor: ObjectId,
    pub wm_base: ObjectId,
}

/// Drives the discovery handshake: requests the registry, places a sync
/// barrier, then consumes announcements until the barrier fires, binding the
/// required globals in the order they are announced.
pub fn bind_globals(
    fd: BorrowedFd,
    ids: &mut IdAllocator,
    buf: &mut Vec<u8>,
) -> Result<BoundGlobals, Error> {
    let registry = ids.allocate();
    wl_display::req::get_registry(fd, registry)?;

    let sync_done = ids.allocate();
    wl_display::req::sync(fd, sync_done)?;

    let mut scan = GlobalsScan {
        fd,
        ids,
        registry,
        bound: [None; REQUIRED_GLOBALS.len()],
    };

    loop {
        let msg = WireMsg::recv(fd, buf)?;
        let sender = msg.sender_id();
        // the callback has a single opcode, receiving anything from it means
        // every global queued before our sync has been delivered
        if sender == sync_done {
            break;
        } else if sender == registry {
            wl_registry::event(&mut scan, msg, buf)?;
        } else if sender == WL_DISPLAY {
            wl_display::event(&mut scan, msg, buf)?;
        } else {
            log::debug!("ignoring event from object {sender} during registry enumeration");
        }
    }

    scan.finish()
}

struct GlobalsScan<'a, 'fd> {
    fd: BorrowedFd<'fd>,
    ids: &'a mut IdAllocator,
    registry: ObjectId,
    bound: [Option<ObjectId>; REQUIRED_GLOBALS.len()],
}

impl GlobalsScan<'_, '_> {
    fn finish(self) -> Result<BoundGlobals, Error> {
        let id = |i: usize| self.bound[i].ok_or(Error::MissingGlobal(REQUIRED_GLOBALS[i]));
        Ok(BoundGlobals {
            shm: id(0)?,
            compositor: id(1)?,
            wm_base: id(2)?,
        })
    }
}

impl wl_registry::EvHandler for GlobalsScan<'_, '_> {
    fn global(&mut self, name: u32, interface: &str, version: u32) -> Result<(), Error> {
        for (i, wanted) in REQUIRED_GLOBALS.iter().enumerate() {
            if *wanted != interface {
                continue;
            }
            if version < MIN_VERSIONS[i] {
                return Err(Error::VersionTooOld {
                    interface: wanted,
                    min: MIN_VERSIONS[i],
                    actual: version,
                });
            }
            if self.bound[i].is_some() {
                log::warn!("compositor announced {interface} twice, keeping the first");
                return Ok(());
            }
            let id = self.ids.allocate();
            wl_registry::req::bind(self.fd, self.registry, name, id, wanted, MIN_VERSIONS[i])?;
            log::debug!("bound {interface} v{} as object {id}", MIN_VERSIONS[i]);
            self.bound[i] = Some(id);
            return Ok(());
        }
        log::debug!("skipping global {interface} v{version} (name {name})");
        Ok(())
    }
}

impl wl_display::EvHandler for GlobalsScan<'_, '_> {}

/// The objects making up one mapped top-level window.
#[derive(Debug)]
pub struct Window {
    pub surface: ObjectId,
    pub xdg_surface: ObjectId,
    pub toplevel: ObjectId,
}

/// Creates a surface, gives it the top-level role and walks it through its
/// first configure/ack handshake. When this returns, the surface is ready
/// for a buffer.
pub fn create_window(
    fd: BorrowedFd,
    ids: &mut IdAllocator,
    globals: &BoundGlobals,
    title: &str,
    app_id: &str,
    buf: &mut Vec<u8>,
) -> Result<Window, Error> {
    let surface = ids.allocate();
    wl_compositor::req::create_surface(fd, globals.compositor, surface)?;

    let xdg_surface = ids.allocate();
    xdg_wm_base::req::get_xdg_surface(fd, globals.wm_base, xdg_surface, surface)?;

    let toplevel = ids.allocate();
    xdg_surface::req::get_toplevel(fd, xdg_surface, toplevel)?;
    xdg_toplevel::req::set_title(fd, toplevel, title)?;
    xdg_toplevel::req::set_app_id(fd, toplevel, app_id)?;

    // commit the initial, empty state; the compositor answers with the first
    // configure
    wl_surface::req::commit(fd, surface)?;

    let mut wait = ConfigureWait {
        fd,
        wm_base: globals.wm_base,
        serial: None,
    };
    loop {
        let msg = WireMsg::recv(fd, buf)?;
        let sender = msg.sender_id();
        if sender == xdg_surface {
            // only `configure` is valid here; the dispatcher turns anything
            // else into InvalidOpcode
            xdg_surface::event(&mut wait, msg, buf)?;
            if let Some(serial) = wait.serial {
                xdg_surface::req::ack_configure(fd, xdg_surface, serial)?;
                wl_surface::req::commit(fd, surface)?;
                break;
            }
        } else if sender == globals.wm_base {
            xdg_wm_base::event(&mut wait, msg, buf)?;
        } else if sender == WL_DISPLAY {
            wl_display::event(&mut wait, msg, buf)?;
        } else {
            log::warn!("unexpected event from object {sender} while waiting for the first configure");
        }
    }

    Ok(Window {
        surface,
        xdg_surface,
        toplevel,
    })
}

struct ConfigureWait<'fd> {
    fd: BorrowedFd<'fd>,
    wm_base: ObjectId,
    serial: Option<u32>,
}

impl xdg_surface::EvHandler for ConfigureWait<'_> {
    fn configure(&mut self, serial: u32) -> Result<(), Error> {
        self.serial = Some(serial);
        Ok(())
    }
}

impl xdg_wm_base::EvHandler for ConfigureWait<'_> {
    fn ping(&mut self, serial: u32) -> Result<(), Error> {
        xdg_wm_base::req::pong(self.fd, self.wm_base, serial)
    }
}

impl wl_display::EvHandler for ConfigureWait<'_> {}

/// Sends a sync request and blocks until its callback fires, draining (and
/// logging) everything in between. Guarantees the server has processed all
/// our previous requests, which also flushes out any pending protocol error.
pub fn roundtrip(fd: BorrowedFd, ids: &mut IdAllocator, buf: &mut Vec<u8>) -> Result<(), Error> {
    let callback = ids.allocate();
    wl_display::req::sync(fd, callback)?;

    let mut wait = RoundtripWait { done: false };
    while !wait.done {
        let msg = WireMsg::recv(fd, buf)?;
        let sender = msg.sender_id();
        if sender == callback {
            wl_callback::event(&mut wait, msg, buf)?;
        } else if sender == WL_DISPLAY {
            wl_display::event(&mut wait, msg, buf)?;
        } else {
            log::debug!("ignoring event from object {sender} during roundtrip");
        }
    }
    Ok(())
}

struct RoundtripWait {
    done: bool,
}

impl wl_callback::EvHandler for RoundtripWait {
    fn done(&mut self, _sender_id: ObjectId, _callback_data: u32) -> Result<(), Error> {
        self.done = true;
        Ok(())
    }
}

impl wl_display::EvHandler for RoundtripWait {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wayland::wire::WireMsgBuilder;
    use std::num::NonZeroU32;
    use std::os::fd::AsFd;
    use std::os::unix::net::UnixStream;

    fn id(n: u32) -> ObjectId {
        ObjectId::new(NonZeroU32::new(n).unwrap())
    }

    /// Fabricates one server-side event. Events and requests share the same
    /// framing, so the builder works for both directions.
    fn send_event(peer: &UnixStream, sender: u32, op: u16, args: &[u32]) {
        let mut builder = WireMsgBuilder::new(id(sender), op);
        for arg in args {
            builder.add_u32(*arg);
        }
        builder.send(peer.as_fd()).unwrap();
    }

    fn send_global(peer: &UnixStream, name: u32, interface: &str, version: u32) {
        // the registry is the first id the client allocates: 2
        let mut builder = WireMsgBuilder::new(id(2), 0);
        builder.add_u32(name);
        builder.add_string(interface);
        builder.add_u32(version);
        builder.send(peer.as_fd()).unwrap();
    }

    struct Req {
        sender: u32,
        op: u16,
        body: Vec<u8>,
    }

    fn read_request(peer: &UnixStream, buf: &mut Vec<u8>) -> (WireMsg, Req) {
        let msg = WireMsg::recv(peer.as_fd(), buf).unwrap();
        let req = Req {
            sender: msg.sender_id().get(),
            op: msg.op(),
            body: buf.clone(),
        };
        (msg, req)
    }

    fn assert_no_pending(peer: &UnixStream) {
        peer.set_nonblocking(true).unwrap();
        let mut buf = Vec::new();
        assert!(
            matches!(WireMsg::recv(peer.as_fd(), &mut buf), Err(Error::Read(_))),
            "server socket should have been drained"
        );
    }

    /// Skips past the get_registry + sync requests every bootstrap starts
    /// with.
    fn drain_handshake_prefix(peer: &UnixStream, buf: &mut Vec<u8>) {
        let (_, req) = read_request(peer, buf);
        assert_eq!((req.sender, req.op), (1, 1), "expected get_registry");
        let (_, req) = read_request(peer, buf);
        assert_eq!((req.sender, req.op), (1, 0), "expected sync");
    }

    #[test]
    fn binds_all_required_globals_in_announcement_order() {
        let (client, server) = UnixStream::pair().unwrap();
        send_global(&server, 10, "wl_shm", 1);
        send_global(&server, 20, "wl_compositor", 5);
        send_global(&server, 30, "xdg_wm_base", 2);
        send_event(&server, 3, 0, &[0]); // sync callback done

        let mut ids = IdAllocator::new();
        let mut buf = Vec::new();
        let globals = bind_globals(client.as_fd(), &mut ids, &mut buf).unwrap();
        assert_eq!(globals.shm.get(), 4);
        assert_eq!(globals.compositor.get(), 5);
        assert_eq!(globals.wm_base.get(), 6);

        let mut buf = Vec::new();
        drain_handshake_prefix(&server, &mut buf);
        for (name, interface, version, new_id) in [
            (10, "wl_shm", 1, 4),
            (20, "wl_compositor", 5, 5),
            (30, "xdg_wm_base", 2, 6),
        ] {
            let (mut msg, req) = read_request(&server, &mut buf);
            assert_eq!((req.sender, req.op), (2, 0), "expected a bind request");
            assert_eq!(msg.next_u32(&req.body).unwrap(), name);
            assert_eq!(msg.next_str(&req.body).unwrap(), interface);
            assert_eq!(msg.next_u32(&req.body).unwrap(), version);
            assert_eq!(msg.next_u32(&req.body).unwrap(), new_id);
        }
        assert_no_pending(&server);
    }

    #[test]
    fn unrelated_globals_are_skipped_and_missing_ones_reported() {
        let (client, server) = UnixStream::pair().unwrap();
        send_global(&server, 7, "wl_shm", 1);
        send_global(&server, 8, "wl_output", 4);
        send_event(&server, 3, 0, &[0]);

        let mut ids = IdAllocator::new();
        let mut buf = Vec::new();
        match bind_globals(client.as_fd(), &mut ids, &mut buf) {
            Err(Error::MissingGlobal("wl_compositor")) => {}
            other => panic!("expected MissingGlobal(wl_compositor), got {other:?}"),
        }

        // exactly one bind must have gone out: the wl_shm one
        let mut buf = Vec::new();
        drain_handshake_prefix(&server, &mut buf);
        let (mut msg, req) = read_request(&server, &mut buf);
        assert_eq!((req.sender, req.op), (2, 0));
        assert_eq!(msg.next_u32(&req.body).unwrap(), 7);
        assert_eq!(msg.next_str(&req.body).unwrap(), "wl_shm");
        assert_no_pending(&server);
    }

    #[test]
    fn old_interface_version_fails_without_binding() {
        let (client, server) = UnixStream::pair().unwrap();
        send_global(&server, 5, "xdg_wm_base", 1);

        let mut ids = IdAllocator::new();
        let mut buf = Vec::new();
        match bind_globals(client.as_fd(), &mut ids, &mut buf) {
            Err(Error::VersionTooOld {
                interface: "xdg_wm_base",
                min: 2,
                actual: 1,
            }) => {}
            other => panic!("expected VersionTooOld, got {other:?}"),
        }

        let mut buf = Vec::new();
        drain_handshake_prefix(&server, &mut buf);
        assert_no_pending(&server);
    }

    fn bound_for_test() -> (IdAllocator, BoundGlobals) {
        let mut ids = IdAllocator::new();
        for _ in 0..5 {
            ids.allocate(); // registry, callback, and the three globals
        }
        let globals = BoundGlobals {
            shm: id(4),
            compositor: id(5),
            wm_base: id(6),
        };
        (ids, globals)
    }

    #[test]
    fn configure_is_acked_with_the_same_serial_then_committed() {
        let (client, server) = UnixStream::pair().unwrap();
        // surface=7, xdg_surface=8, toplevel=9
        send_event(&server, 8, 0, &[0x1234]);

        let (mut ids, globals) = bound_for_test();
        let mut buf = Vec::new();
        let window =
            create_window(client.as_fd(), &mut ids, &globals, "t", "t", &mut buf).unwrap();
        assert_eq!(window.surface.get(), 7);
        assert_eq!(window.xdg_surface.get(), 8);
        assert_eq!(window.toplevel.get(), 9);

        let mut buf = Vec::new();
        let expected = [
            (5, 0), // wl_compositor.create_surface
            (6, 2), // xdg_wm_base.get_xdg_surface
            (8, 1), // xdg_surface.get_toplevel
            (9, 2), // xdg_toplevel.set_title
            (9, 3), // xdg_toplevel.set_app_id
            (7, 6), // wl_surface.commit
        ];
        for (sender, op) in expected {
            let (_, req) = read_request(&server, &mut buf);
            assert_eq!((req.sender, req.op), (sender, op));
        }

        // exactly one ack with the serial we sent, then exactly one commit
        let (mut msg, req) = read_request(&server, &mut buf);
        assert_eq!((req.sender, req.op), (8, 4), "expected ack_configure");
        assert_eq!(msg.next_u32(&req.body).unwrap(), 0x1234);
        let (_, req) = read_request(&server, &mut buf);
        assert_eq!((req.sender, req.op), (7, 6), "expected the final commit");
        assert_no_pending(&server);
    }

    #[test]
    fn ping_during_configure_wait_is_answered() {
        let (client, server) = UnixStream::pair().unwrap();
        send_event(&server, 6, 0, &[77]); // xdg_wm_base.ping
        send_event(&server, 8, 0, &[1]); // configure

        let (mut ids, globals) = bound_for_test();
        let mut buf = Vec::new();
        create_window(client.as_fd(), &mut ids, &globals, "t", "t", &mut buf).unwrap();

        let mut buf = Vec::new();
        for _ in 0..6 {
            read_request(&server, &mut buf); // setup requests
        }
        let (mut msg, req) = read_request(&server, &mut buf);
        assert_eq!((req.sender, req.op), (6, 3), "expected pong");
        assert_eq!(msg.next_u32(&req.body).unwrap(), 77);
    }

    #[test]
    fn unknown_opcode_on_the_awaited_surface_is_fatal() {
        let (client, server) = UnixStream::pair().unwrap();
        send_event(&server, 8, 1, &[]);

        let (mut ids, globals) = bound_for_test();
        let mut buf = Vec::new();
        match create_window(client.as_fd(), &mut ids, &globals, "t", "t", &mut buf) {
            Err(Error::InvalidOpcode { object: 8, opcode: 1 }) => {}
            other => panic!("expected InvalidOpcode, got {other:?}"),
        }
    }

    #[test]
    fn events_for_other_objects_do_not_abort_the_configure_wait() {
        let (client, server) = UnixStream::pair().unwrap();
        send_event(&server, 9, 0, &[0, 0, 0]); // toplevel configure, 0x0 + empty states
        send_event(&server, 42, 5, &[1, 2]); // something we never created
        send_event(&server, 8, 0, &[3]);

        let (mut ids, globals) = bound_for_test();
        let mut buf = Vec::new();
        create_window(client.as_fd(), &mut ids, &globals, "t", "t", &mut buf).unwrap();
    }

    #[test]
    fn display_error_event_aborts_the_bootstrap() {
        let (client, server) = UnixStream::pair().unwrap();
        let mut builder = WireMsgBuilder::new(WL_DISPLAY, 0);
        builder.add_u32(2); // offending object: the registry
        builder.add_u32(1); // invalid_method
        builder.add_string("ouch");
        builder.send(server.as_fd()).unwrap();

        let mut ids = IdAllocator::new();
        let mut buf = Vec::new();
        match bind_globals(client.as_fd(), &mut ids, &mut buf) {
            Err(Error::Protocol {
                object: 2,
                code: 1,
                message,
            }) => assert_eq!(message, "ouch"),
            other => panic!("expected Protocol, got {other:?}"),
        }
    }

    #[test]
    fn roundtrip_waits_for_the_callback() {
        let (client, server) = UnixStream::pair().unwrap();
        send_event(&server, 42, 0, &[9]); // stale event from some other object
        send_event(&server, 2, 0, &[123]); // callback done (first allocated id)

        let mut ids = IdAllocator::new();
        let mut buf = Vec::new();
        roundtrip(client.as_fd(), &mut ids, &mut buf).unwrap();

        let mut buf = Vec::new();
        let (mut msg, req) = read_request(&server, &mut buf);
        assert_eq!((req.sender, req.op), (1, 0), "expected sync");
        assert_eq!(msg.next_u32(&req.body).unwrap(), 2);
        assert_no_pending(&server);
    }
}
