//! Anonymous shared memory, the backing storage for wayland shm pools.
//!
//! On Linux we use `memfd_create`; elsewhere we fall back to a `shm_open`ed
//! file that is immediately unlinked, so the descriptor is the only reference
//! left to the memory object.

use std::ptr::NonNull;

use rustix::fd::{AsFd, BorrowedFd, OwnedFd};
use rustix::io::Errno;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};

#[derive(Debug)]
pub struct Mmap {
    fd: OwnedFd,
    ptr: NonNull<std::ffi::c_void>,
    len: usize,
}

impl Mmap {
    const PROT: ProtFlags = ProtFlags::WRITE.union(ProtFlags::READ);
    const FLAGS: MapFlags = MapFlags::SHARED;

    /// Creates a memory object of `len` bytes and maps it read-write.
    ///
    /// The descriptor stays valid for the lifetime of this struct and can be
    /// handed to the compositor while we keep writing through our own mapping.
    pub fn create(len: usize) -> std::io::Result<Self> {
        let fd = create_shm_fd()?;
        rustix::io::retry_on_intr(|| rustix::fs::ftruncate(&fd, len as u64))?;

        let ptr = unsafe { mmap(std::ptr::null_mut(), len, Self::PROT, Self::FLAGS, &fd, 0)? };
        // SAFETY: a successful mmap never returns a null pointer; POSIX
        // reserves address 0
        let ptr = unsafe { NonNull::new_unchecked(ptr) };

        Ok(Self { fd, ptr, len })
    }

    #[inline]
    #[must_use]
    pub fn slice_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr().cast(), self.len) }
    }

    #[inline]
    #[must_use]
    pub fn slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr().cast(), self.len) }
    }

    #[inline]
    #[must_use]
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub fn fd(&self) -> BorrowedFd {
        self.fd.as_fd()
    }
}

impl Drop for Mmap {
    fn drop(&mut self) {
        if let Err(e) = unsafe { munmap(self.ptr.as_ptr(), self.len) } {
            eprintln!("failed to unmap shared memory: {e}");
        }
    }
}

fn create_shm_fd() -> std::io::Result<OwnedFd> {
    #[cfg(target_os = "linux")]
    {
        match create_memfd() {
            Ok(fd) => return Ok(fd),
            // Not supported, use the fallback.
            Err(Errno::NOSYS) => (),
            Err(err) => return Err(err.into()),
        };
    }

    let flags = rustix::shm::ShmOFlags::CREATE
        | rustix::shm::ShmOFlags::EXCL
        | rustix::shm::ShmOFlags::RDWR;
    let mode = rustix::shm::Mode::RUSR | rustix::shm::Mode::WUSR;

    loop {
        let time = std::time::SystemTime::now();
        let handle = format!(
            "/waypane-{}",
            time.duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .subsec_nanos()
        );
        match rustix::shm::shm_open(handle.as_str(), flags, mode) {
            Ok(fd) => {
                rustix::shm::shm_unlink(handle.as_str())?;
                return Ok(fd);
            }
            // try again with a different handle
            Err(Errno::EXIST) => continue,
            Err(Errno::INTR) => continue,
            Err(err) => return Err(err.into()),
        }
    }
}

#[cfg(target_os = "linux")]
fn create_memfd() -> rustix::io::Result<OwnedFd> {
    use rustix::fs::{MemfdFlags, SealFlags};

    let name = c"waypane-shm";
    let flags = MemfdFlags::ALLOW_SEALING | MemfdFlags::CLOEXEC;

    loop {
        match rustix::fs::memfd_create(name, flags) {
            Ok(fd) => {
                // sealing is only an optimization, ignore failures
                let _ = rustix::fs::fcntl_add_seals(&fd, SealFlags::SHRINK | SealFlags::SEAL);
                return Ok(fd);
            }
            Err(Errno::INTR) => continue,
            Err(err) => return Err(err),
        }
    }
}
