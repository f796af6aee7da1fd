//! Connects to the compositor, walks through the discovery and shell
//! handshakes, puts a solid-colored shared-memory buffer on screen and then
//! sits in a small event loop until the window is closed.

mod cli;
mod wayland;

use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use anyhow::Context;
use log::{debug, info, warn, LevelFilter};
use rustix::fd::{AsFd, BorrowedFd, FromRawFd, OwnedFd};
use simplelog::{ColorChoice, TermLogger, TerminalMode};

use common::Mmap;

use wayland::bootstrap::{self, BoundGlobals, Window};
use wayland::interfaces::{wl_buffer, wl_display, wl_shm, wl_surface, xdg_surface, xdg_toplevel, xdg_wm_base};
use wayland::pool::ShmPool;
use wayland::wire::WireMsg;
use wayland::{Error, IdAllocator, ObjectId, WL_DISPLAY};

const WIDTH: i32 = 640;
const HEIGHT: i32 = 480;

fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::new();
    make_logger(cli.quiet);

    let socket = connect()?;
    let fd = socket.as_fd();

    let mut ids = IdAllocator::new();
    let mut buf = Vec::with_capacity(1024);

    let globals = bootstrap::bind_globals(fd, &mut ids, &mut buf)
        .context("global discovery handshake failed")?;
    info!("bound all required globals");

    let window = bootstrap::create_window(fd, &mut ids, &globals, &cli.title, "waypane", &mut buf)
        .context("surface/shell handshake failed")?;
    info!("window surface configured");

    let mmap = Mmap::create((WIDTH * HEIGHT * 4) as usize)
        .context("failed to create the shared memory object")?;
    let mut pool = ShmPool::new(fd, &mut ids, globals.shm, mmap, WIDTH, HEIGHT)
        .context("failed to create the shared memory pool")?;

    paint(pool.canvas());
    wl_surface::req::attach(fd, window.surface, Some(pool.buffer()), 0, 0)?;
    wl_surface::req::damage_buffer(fd, window.surface, 0, 0, WIDTH, HEIGHT)?;
    wl_surface::req::commit(fd, window.surface)?;

    // make sure the frame (and any error it provoked) has been processed
    bootstrap::roundtrip(fd, &mut ids, &mut buf)?;
    info!("presented the first frame, waiting for the window to be closed");

    run(fd, &globals, &window, &pool, &mut buf)?;

    pool.destroy(fd)?;
    Ok(())
}

/// Post-bootstrap event loop. Just enough to be a well-behaved citizen:
/// answer pings, acknowledge follow-up configures, and leave when told to.
fn run(
    fd: BorrowedFd,
    globals: &BoundGlobals,
    window: &Window,
    pool: &ShmPool,
    buf: &mut Vec<u8>,
) -> Result<(), Error> {
    let mut app = App {
        fd,
        wm_base: globals.wm_base,
        xdg_surface: window.xdg_surface,
        running: true,
    };

    while app.running {
        let msg = WireMsg::recv(fd, buf)?;
        let sender = msg.sender_id();
        if sender == window.toplevel {
            xdg_toplevel::event(&mut app, msg, buf)?;
        } else if sender == window.xdg_surface {
            xdg_surface::event(&mut app, msg, buf)?;
        } else if sender == globals.wm_base {
            xdg_wm_base::event(&mut app, msg, buf)?;
        } else if sender == globals.shm {
            wl_shm::event(&mut app, msg, buf)?;
        } else if sender == pool.buffer() {
            wl_buffer::event(&mut app, msg, buf)?;
        } else if sender == WL_DISPLAY {
            wl_display::event(&mut app, msg, buf)?;
        } else {
            debug!("ignoring event from object {sender}");
        }
    }
    Ok(())
}

struct App<'fd> {
    fd: BorrowedFd<'fd>,
    wm_base: ObjectId,
    xdg_surface: ObjectId,
    running: bool,
}

impl xdg_toplevel::EvHandler for App<'_> {
    fn close(&mut self) -> Result<(), Error> {
        info!("window closed by the compositor");
        self.running = false;
        Ok(())
    }
}

impl xdg_surface::EvHandler for App<'_> {
    /// We never resize, so follow-up configures only need acknowledging.
    fn configure(&mut self, serial: u32) -> Result<(), Error> {
        xdg_surface::req::ack_configure(self.fd, self.xdg_surface, serial)
    }
}

impl xdg_wm_base::EvHandler for App<'_> {
    fn ping(&mut self, serial: u32) -> Result<(), Error> {
        xdg_wm_base::req::pong(self.fd, self.wm_base, serial)
    }
}

impl wl_buffer::EvHandler for App<'_> {
    fn release(&mut self, sender_id: ObjectId) -> Result<(), Error> {
        debug!("compositor released buffer {sender_id}");
        Ok(())
    }
}

impl wl_shm::EvHandler for App<'_> {}

impl wl_display::EvHandler for App<'_> {}

/// XRGB8888, stored little-endian: blue, green, red, unused.
fn paint(canvas: &mut [u8]) {
    for pixel in canvas.chunks_exact_mut(4) {
        pixel.copy_from_slice(&[0x33, 0x2A, 0x1E, 0x00]);
    }
}

/// Finds the compositor's socket the usual way: an inherited, already
/// connected `WAYLAND_SOCKET` fd if we were spawned with one, otherwise
/// `$XDG_RUNTIME_DIR/$WAYLAND_DISPLAY`.
fn connect() -> anyhow::Result<OwnedFd> {
    if let Ok(txt) = std::env::var("WAYLAND_SOCKET") {
        let fd: i32 = txt.parse().context("invalid fd in WAYLAND_SOCKET env var")?;
        // SAFETY: we are the only one who will take ownership of this fd
        return Ok(unsafe { OwnedFd::from_raw_fd(fd) });
    }

    let socket_name: PathBuf = std::env::var_os("WAYLAND_DISPLAY")
        .unwrap_or_else(|| {
            warn!("WAYLAND_DISPLAY is not set! Defaulting to wayland-0");
            std::ffi::OsString::from("wayland-0")
        })
        .into();

    let socket_path = if socket_name.is_absolute() {
        socket_name
    } else {
        let mut socket_path: PathBuf = std::env::var_os("XDG_RUNTIME_DIR")
            .unwrap_or_else(|| {
                warn!("XDG_RUNTIME_DIR is not set! Defaulting to /run/user/UID");
                let uid = rustix::process::getuid();
                std::ffi::OsString::from(format!("/run/user/{}", uid.as_raw()))
            })
            .into();
        socket_path.push(socket_name);
        socket_path
    };

    let stream = UnixStream::connect(&socket_path)
        .with_context(|| format!("failed to connect to wayland socket at {socket_path:?}"))?;
    Ok(stream.into())
}

fn make_logger(quiet: bool) {
    TermLogger::init(
        if quiet {
            LevelFilter::Error
        } else {
            LevelFilter::Debug
        },
        simplelog::Config::default(),
        TerminalMode::Stderr,
        ColorChoice::AlwaysAnsi,
    )
    .expect("failed to initialize the logger");
}
