//! Shared-memory pool setup, the one place a file descriptor crosses the
//! wire. Adapted narrowly to what a single fixed-size window needs: one
//! pool, one buffer.

use rustix::fd::BorrowedFd;

use common::Mmap;

use super::interfaces::{wl_buffer, wl_shm, wl_shm_pool};
use super::{Error, IdAllocator, ObjectId};

const BYTES_PER_PIXEL: i32 = 4;

/// Sends the create-pool request with `pool_fd` attached as ancillary data,
/// returning the new pool's object id.
///
/// The id is taken from the allocator only once the send has fully gone
/// through: every id we consume must be visible to the server, otherwise a
/// later allocation would reuse a number the server never heard of while the
/// ids drift out of step.
pub fn create_pool(
    fd: BorrowedFd,
    shm: ObjectId,
    ids: &mut IdAllocator,
    pool_fd: BorrowedFd,
    len: i32,
) -> Result<ObjectId, Error> {
    let id = ids.peek();
    wl_shm::req::create_pool(fd, shm, id, pool_fd, len)?;
    let allocated = ids.allocate();
    debug_assert_eq!(allocated, id);
    Ok(id)
}

/// One pool holding exactly one XRGB8888 buffer of the window's size.
///
/// The compositor maps the same memory object we keep mapped locally, so
/// painting into [`canvas`](Self::canvas) and committing is all it takes to
/// put pixels on screen.
#[derive(Debug)]
pub struct ShmPool {
    pool: ObjectId,
    buffer: ObjectId,
    mmap: Mmap,
}

impl ShmPool {
    pub fn new(
        fd: BorrowedFd,
        ids: &mut IdAllocator,
        shm: ObjectId,
        mmap: Mmap,
        width: i32,
        height: i32,
    ) -> Result<Self, Error> {
        let stride = width * BYTES_PER_PIXEL;
        debug_assert!(mmap.len() >= (stride * height) as usize);

        let pool = create_pool(fd, shm, ids, mmap.fd(), mmap.len() as i32)?;
        let buffer = ids.allocate();
        wl_shm_pool::req::create_buffer(
            fd,
            pool,
            buffer,
            0,
            width,
            height,
            stride,
            wl_shm::format::XRGB8888,
        )?;

        Ok(Self { pool, buffer, mmap })
    }

    #[must_use]
    pub const fn buffer(&self) -> ObjectId {
        self.buffer
    }

    #[must_use]
    pub fn canvas(&mut self) -> &mut [u8] {
        self.mmap.slice_mut()
    }

    /// The buffer keeps the pool's memory referenced server-side, so both
    /// objects go together.
    pub fn destroy(self, fd: BorrowedFd) -> Result<(), Error> {
        wl_buffer::req::destroy(fd, self.buffer)?;
        wl_shm_pool::req::destroy(fd, self.pool)
    }
}
