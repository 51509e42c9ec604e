//! Shared-memory buffer plumbing.
//!
//! The wire contract is a byte region of `width * height * 4`, row major,
//! 8 bits per channel, with `stride = width * 4` and a per-buffer offset
//! into the pool. [`Dimensions`] keeps that arithmetic checked in one
//! place; [`MemMap`] owns the anonymous file and its mapping, unmapping
//! and closing on every exit path; [`ShmPool`] ties a mapping to the
//! server-side `wl_shm_pool` and hands out buffers in non-overlapping
//! slots that stay reserved until the server releases them.

use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::ptr::{self, NonNull};
use std::slice;

use rustix::fs::{ftruncate, memfd_create, MemfdFlags};
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use tracing::trace;
use wayland_client::protocol::{
    wl_buffer::WlBuffer,
    wl_shm::{self, WlShm},
    wl_shm_pool::WlShmPool,
};
use wayland_client::{Dispatch, QueueHandle};

/// Errors from shared-memory setup and buffer production.
#[derive(Debug, thiserror::Error)]
pub enum ShmError {
    /// The requested buffer has a zero axis or does not fit the wire format.
    #[error("invalid buffer dimensions {width}x{height}")]
    InvalidDimensions {
        /// Requested width in pixels.
        width: u32,
        /// Requested height in pixels.
        height: u32,
    },
    /// The pool would exceed what the protocol can express.
    #[error("pool of {0} bytes exceeds the protocol size limit")]
    PoolTooLarge(usize),
    /// The kernel handed back a null mapping.
    #[error("mmap produced a null mapping")]
    NullMapping,
    /// Creating, sizing or mapping the backing file failed.
    #[error("shared memory allocation failed: {0}")]
    Allocation(#[from] rustix::io::Errno),
}

/// Pixel dimensions with checked stride and length arithmetic.
///
/// Construction rejects zero-area and anything whose byte length does not
/// fit the `i32` fields of `wl_shm_pool.create_buffer`, so stride math
/// downstream cannot overflow or divide by zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    width: u32,
    height: u32,
}

impl Dimensions {
    /// Bytes per pixel of the formats used here (XRGB8888 / ARGB8888).
    pub const BYTES_PER_PIXEL: u32 = 4;

    /// Validate a proposed size.
    pub fn new(width: u32, height: u32) -> Result<Dimensions, ShmError> {
        let invalid = ShmError::InvalidDimensions { width, height };
        if width == 0 || height == 0 {
            return Err(invalid);
        }
        let stride = width.checked_mul(Self::BYTES_PER_PIXEL).ok_or_else(|| {
            ShmError::InvalidDimensions { width, height }
        })?;
        match stride.checked_mul(height) {
            Some(len) if len <= i32::MAX as u32 => Ok(Dimensions { width, height }),
            _ => Err(invalid),
        }
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes between the start of two consecutive rows.
    pub fn stride(&self) -> i32 {
        (self.width * Self::BYTES_PER_PIXEL) as i32
    }

    /// Total byte length of one buffer of this size.
    pub fn byte_len(&self) -> usize {
        self.stride() as usize * self.height as usize
    }
}

/// An anonymous shared-memory file and its mapping.
///
/// The mapping is unmapped and the descriptor closed when the value drops,
/// including on early-return error paths of the callers.
#[derive(Debug)]
pub struct MemMap {
    ptr: NonNull<u8>,
    len: usize,
    fd: OwnedFd,
}

impl MemMap {
    /// Create a memfd of `len` bytes and map it read-write.
    pub fn new(len: usize) -> Result<MemMap, ShmError> {
        let fd = memfd_create("wayland-primer", MemfdFlags::CLOEXEC)?;
        ftruncate(&fd, len as u64)?;
        let ptr = map(&fd, len)?;
        trace!(len, "mapped shm file");
        Ok(MemMap { ptr, len, fd })
    }

    /// Grow the file and remap. Never shrinks; smaller requests are no-ops.
    pub fn grow(&mut self, len: usize) -> Result<(), ShmError> {
        if len <= self.len {
            return Ok(());
        }
        ftruncate(&self.fd, len as u64)?;
        // Map the enlarged file before giving up the old view, so a failure
        // leaves the previous mapping usable.
        let ptr = map(&self.fd, len)?;
        unsafe {
            let _ = munmap(self.ptr.as_ptr().cast(), self.len);
        }
        trace!(old = self.len, new = len, "regrew shm mapping");
        self.ptr = ptr;
        self.len = len;
        Ok(())
    }

    /// Size of the mapping in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The backing descriptor, for `wl_shm.create_pool`.
    pub fn fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }

    /// The whole mapping as writable bytes.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // Sound: the mapping is private to this process on the write side
        // and stays valid for the lifetime of `self`.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for MemMap {
    fn drop(&mut self) {
        unsafe {
            let _ = munmap(self.ptr.as_ptr().cast(), self.len);
        }
    }
}

fn map(fd: &OwnedFd, len: usize) -> Result<NonNull<u8>, ShmError> {
    let ptr = unsafe {
        mmap(
            ptr::null_mut(),
            len,
            ProtFlags::READ | ProtFlags::WRITE,
            MapFlags::SHARED,
            fd,
            0,
        )?
    };
    NonNull::new(ptr.cast()).ok_or(ShmError::NullMapping)
}

/// Byte ranges of the pool handed out as buffers.
///
/// The server keeps reading the attached buffer until the commit that
/// replaces it, so a busy slot's bytes must not be reissued. A free slot
/// of sufficient size is reused in place; otherwise a fresh slot is
/// carved past every existing one, which also covers resizes that land
/// while the old buffer is still on screen.
#[derive(Debug, Default)]
struct SlotLedger {
    slots: Vec<Slot>,
}

#[derive(Debug)]
struct Slot {
    offset: usize,
    len: usize,
    busy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotClaim {
    index: usize,
    offset: usize,
    /// Pool length required for this claim to be addressable.
    pool_len: usize,
}

impl SlotLedger {
    fn acquire(&mut self, needed: usize) -> SlotClaim {
        if let Some(index) = self
            .slots
            .iter()
            .position(|slot| !slot.busy && slot.len >= needed)
        {
            self.slots[index].busy = true;
            return SlotClaim {
                index,
                offset: self.slots[index].offset,
                pool_len: self.pool_len(),
            };
        }
        let offset = self.pool_len();
        self.slots.push(Slot {
            offset,
            len: needed,
            busy: true,
        });
        SlotClaim {
            index: self.slots.len() - 1,
            offset,
            pool_len: offset + needed,
        }
    }

    fn release(&mut self, index: usize) {
        self.slots[index].busy = false;
    }

    fn pool_len(&self) -> usize {
        self.slots
            .iter()
            .map(|slot| slot.offset + slot.len)
            .max()
            .unwrap_or(0)
    }
}

/// A `wl_shm_pool` backed by a [`MemMap`], carving out buffer slots.
///
/// Each produced buffer occupies its own slot until [`ShmPool::release`]
/// returns it, so repainting for the next frame never touches pixels the
/// server may still be reading. Dropping the pool destroys outstanding
/// buffers and the protocol object first, then releases the mapping,
/// matching the reverse-creation teardown order.
#[derive(Debug)]
pub struct ShmPool {
    map: MemMap,
    pool: WlShmPool,
    ledger: SlotLedger,
    buffers: Vec<Option<WlBuffer>>,
}

impl ShmPool {
    /// Create a pool large enough for one buffer of `dim`.
    pub fn new<S>(shm: &WlShm, dim: Dimensions, qh: &QueueHandle<S>) -> Result<ShmPool, ShmError>
    where
        S: Dispatch<WlShmPool, ()> + 'static,
    {
        let len = dim.byte_len();
        let map = MemMap::new(len)?;
        let pool = shm.create_pool(map.fd(), len as i32, qh, ());
        Ok(ShmPool {
            map,
            pool,
            ledger: SlotLedger::default(),
            buffers: Vec::new(),
        })
    }

    /// Produce a buffer of `dim` in a free slot and return it with its
    /// writable pixels, growing the pool first when no slot fits.
    pub fn buffer<S>(
        &mut self,
        dim: Dimensions,
        format: wl_shm::Format,
        qh: &QueueHandle<S>,
    ) -> Result<(WlBuffer, &mut [u8]), ShmError>
    where
        S: Dispatch<WlBuffer, ()> + 'static,
    {
        let needed = dim.byte_len();
        let claim = self.ledger.acquire(needed);
        if claim.pool_len > i32::MAX as usize {
            self.ledger.release(claim.index);
            return Err(ShmError::PoolTooLarge(claim.pool_len));
        }
        if claim.pool_len > self.map.len() {
            if let Err(err) = self.map.grow(claim.pool_len) {
                self.ledger.release(claim.index);
                return Err(err);
            }
            // wl_shm_pool.resize may only grow, which `MemMap::grow` mirrors.
            self.pool.resize(self.map.len() as i32);
        }
        let buffer = self.pool.create_buffer(
            claim.offset as i32,
            dim.width() as i32,
            dim.height() as i32,
            dim.stride(),
            format,
            qh,
            (),
        );
        if self.buffers.len() <= claim.index {
            self.buffers.resize_with(claim.index + 1, || None);
        }
        self.buffers[claim.index] = Some(buffer.clone());
        let canvas = &mut self.map.as_mut_slice()[claim.offset..claim.offset + needed];
        Ok((buffer, canvas))
    }

    /// Return a buffer's slot to circulation after the server releases it.
    ///
    /// The protocol object is destroyed here; buffers the pool no longer
    /// tracks are ignored.
    pub fn release(&mut self, buffer: &WlBuffer) {
        if let Some(index) = self
            .buffers
            .iter()
            .position(|slot| slot.as_ref() == Some(buffer))
        {
            self.ledger.release(index);
            if let Some(buffer) = self.buffers[index].take() {
                buffer.destroy();
            }
        } else {
            trace!("release for an untracked buffer");
        }
    }
}

impl Drop for ShmPool {
    fn drop(&mut self) {
        for buffer in self.buffers.iter().flatten() {
            buffer.destroy();
        }
        self.pool.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_area_dimensions_are_rejected() {
        assert!(Dimensions::new(0, 1080).is_err());
        assert!(Dimensions::new(1920, 0).is_err());
        assert!(Dimensions::new(0, 0).is_err());
    }

    #[test]
    fn oversized_dimensions_are_rejected() {
        assert!(Dimensions::new(u32::MAX, 2).is_err());
        assert!(Dimensions::new(1 << 16, 1 << 16).is_err());
    }

    #[test]
    fn stride_and_length_follow_the_wire_contract() {
        let dim = Dimensions::new(1920, 1080).unwrap();
        assert_eq!(dim.stride(), 1920 * 4);
        assert_eq!(dim.byte_len(), 1920 * 1080 * 4);
    }

    #[test]
    fn a_busy_slot_is_never_reissued() {
        let mut ledger = SlotLedger::default();
        let dim = Dimensions::new(640, 480).unwrap();

        let first = ledger.acquire(dim.byte_len());
        let second = ledger.acquire(dim.byte_len());
        assert_ne!(first.offset, second.offset);
        // Disjoint byte ranges while both buffers are with the server.
        assert!(second.offset >= first.offset + dim.byte_len());
    }

    #[test]
    fn released_slots_are_reused_in_place() {
        let mut ledger = SlotLedger::default();

        let first = ledger.acquire(4096);
        let _second = ledger.acquire(4096);
        ledger.release(first.index);

        let third = ledger.acquire(4096);
        assert_eq!(third.offset, first.offset);
        assert_eq!(ledger.pool_len(), 8192);
    }

    #[test]
    fn resize_lands_past_the_buffer_still_on_screen() {
        let mut ledger = SlotLedger::default();

        // Old size committed and not yet released.
        let old = ledger.acquire(4000);
        // The configure enlarged the surface; the new slot must not
        // overlap the bytes the server is still reading.
        let grown = ledger.acquire(9000);
        assert!(grown.offset >= old.offset + 4000);
        assert_eq!(grown.pool_len, grown.offset + 9000);
    }

    #[test]
    fn undersized_free_slots_are_skipped() {
        let mut ledger = SlotLedger::default();

        let small = ledger.acquire(1024);
        ledger.release(small.index);

        let large = ledger.acquire(2048);
        assert_ne!(large.index, small.index);
        assert_eq!(large.offset, 1024);
    }

    #[test]
    fn memmap_is_writable_and_grows_in_place() {
        let mut map = MemMap::new(4096).unwrap();
        map.as_mut_slice()[..4].copy_from_slice(&[1, 2, 3, 4]);

        map.grow(8192).unwrap();
        assert_eq!(map.len(), 8192);
        // The file contents survive the remap.
        assert_eq!(&map.as_mut_slice()[..4], &[1, 2, 3, 4]);

        // Shrinking is a no-op.
        map.grow(16).unwrap();
        assert_eq!(map.len(), 8192);
    }
}
