//! Register access layer.
//!
//! Every hardware block the driver touches is reached through an [`Mmio`]
//! accessor that knows its own window size and rejects out-of-bounds or
//! misaligned offsets. Accessors are passed in explicitly (see
//! [`crate::Soc`]); nothing in this crate reaches for a global register base.
//!
//! [`MappedRegion`] maps a block's physical window from `/dev/mem` with
//! `rustix`. The software model in [`crate::sim`] provides the same trait
//! without hardware.

// Hardware register access requires exact pointer casts for mmap APIs
#![allow(clippy::cast_ptr_alignment)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]

use crate::error::{Result, TsecError};
use rustix::fs::OFlags;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsFd;
use std::ptr::NonNull;
use std::sync::Arc;
use tsec_chip::base::Block;

const PAGE_SIZE: u64 = 4096;

/// Bounds-checked 32-bit register accessor for one hardware block.
pub trait Mmio: Send + Sync {
    /// Block this accessor covers.
    fn block(&self) -> Block;

    /// Window size in bytes.
    fn size(&self) -> usize;

    /// Read a 32-bit register.
    ///
    /// # Errors
    ///
    /// Returns [`TsecError::RegisterOutOfBounds`] if `offset` is outside the
    /// window or not word aligned.
    fn read32(&self, offset: usize) -> Result<u32>;

    /// Write a 32-bit register.
    ///
    /// # Errors
    ///
    /// Returns [`TsecError::RegisterOutOfBounds`] if `offset` is outside the
    /// window or not word aligned.
    fn write32(&self, offset: usize, value: u32) -> Result<()>;

    /// Read-modify-write: set `mask` bits.
    ///
    /// # Errors
    ///
    /// Propagates access errors.
    fn set_bits(&self, offset: usize, mask: u32) -> Result<()> {
        let value = self.read32(offset)?;
        self.write32(offset, value | mask)
    }

    /// Read-modify-write: clear `mask` bits.
    ///
    /// # Errors
    ///
    /// Propagates access errors.
    fn clear_bits(&self, offset: usize, mask: u32) -> Result<()> {
        let value = self.read32(offset)?;
        self.write32(offset, value & !mask)
    }
}

impl<T: Mmio + ?Sized> Mmio for Arc<T> {
    fn block(&self) -> Block {
        (**self).block()
    }

    fn size(&self) -> usize {
        (**self).size()
    }

    fn read32(&self, offset: usize) -> Result<u32> {
        (**self).read32(offset)
    }

    fn write32(&self, offset: usize, value: u32) -> Result<()> {
        (**self).write32(offset, value)
    }
}

/// Validate a 32-bit access against a window.
///
/// # Errors
///
/// Returns [`TsecError::RegisterOutOfBounds`] on an out-of-window or
/// misaligned offset.
pub fn check_access(block: Block, size: usize, offset: usize) -> Result<()> {
    let in_bounds = offset.checked_add(4).is_some_and(|end| end <= size);
    if !in_bounds || offset % 4 != 0 {
        return Err(TsecError::RegisterOutOfBounds {
            block,
            offset,
            size,
        });
    }
    Ok(())
}

/// A physical range mapped from `/dev/mem`.
///
/// The mapping starts on the page containing `phys`; `skew` is the distance
/// from that page start to the first byte of the range. Bounds are the
/// callers' responsibility.
#[derive(Debug)]
pub(crate) struct PhysMapping {
    ptr: NonNull<u8>,
    map_len: usize,
    skew: usize,
    size: usize,
    _file: File,
}

impl PhysMapping {
    /// Map `size` bytes at physical address `phys`.
    pub(crate) fn open(phys: u64, size: usize, what: &str) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(OFlags::SYNC.bits() as i32)
            .open("/dev/mem")
            .map_err(|e| TsecError::mapping(format!("/dev/mem for {what}"), e))?;

        let page = phys & !(PAGE_SIZE - 1);
        let skew = (phys - page) as usize;
        let map_len = (skew + size).div_ceil(PAGE_SIZE as usize) * PAGE_SIZE as usize;

        // SAFETY: mmap of device memory. Invariants: (1) fd is an open /dev/mem
        // handle kept alive in `_file`; (2) offset is page aligned; (3) length is a
        // nonzero multiple of the page size; (4) the mapping is released in Drop.
        let ptr = unsafe {
            let addr = mmap(
                std::ptr::null_mut(),
                map_len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                page,
            )
            .map_err(|e| TsecError::mapping(format!("{what} at {phys:#x}"), e))?;

            NonNull::new(addr.cast::<u8>()).ok_or_else(|| {
                TsecError::mapping(what, std::io::Error::other("mmap returned null"))
            })?
        };

        tracing::debug!("Mapped {what} at {phys:#x} ({size:#x} bytes, skew {skew:#x})");

        Ok(Self {
            ptr,
            map_len,
            skew,
            size,
            _file: file,
        })
    }

    pub(crate) const fn size(&self) -> usize {
        self.size
    }

    /// Volatile 32-bit load. `offset` must already be checked.
    fn read32(&self, offset: usize) -> u32 {
        debug_assert!(offset + 4 <= self.size);
        // SAFETY: read_volatile necessary for MMIO - hardware can change value.
        // Invariants: (1) ptr from mmap, valid for map_len; (2) skew + offset + 4 <= map_len
        // (callers bounds-check against size); (3) offset and base are word aligned.
        unsafe {
            self.ptr
                .as_ptr()
                .add(self.skew + offset)
                .cast::<u32>()
                .read_volatile()
        }
    }

    /// Volatile 32-bit store. `offset` must already be checked.
    fn write32(&self, offset: usize, value: u32) {
        debug_assert!(offset + 4 <= self.size);
        // SAFETY: write_volatile necessary for MMIO - triggers hardware side effects.
        // Invariants: (1) ptr from mmap; (2) skew + offset + 4 <= map_len; (3) aligned.
        unsafe {
            self.ptr
                .as_ptr()
                .add(self.skew + offset)
                .cast::<u32>()
                .write_volatile(value);
        }
    }

    /// Copy `data` in at `offset`. Returns `false` without copying if it
    /// would leave the range.
    pub(crate) fn copy_in(&self, offset: usize, data: &[u8]) -> bool {
        let fits = offset.checked_add(data.len()).is_some_and(|end| end <= self.size);
        if !fits {
            return false;
        }
        // SAFETY: copy into mapped memory. Invariants: (1) offset + len <= size
        // (checked above); (2) the source slice lives in host memory and cannot
        // overlap the /dev/mem mapping; (3) u8 needs no alignment.
        unsafe {
            let dst = self.ptr.as_ptr().add(self.skew + offset);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }
        true
    }
}

impl Drop for PhysMapping {
    fn drop(&mut self) {
        // SAFETY: ptr/map_len are exactly what mmap returned in open();
        // Drop runs at most once and no references into the mapping outlive self.
        unsafe {
            if let Err(e) = munmap(self.ptr.as_ptr().cast(), self.map_len) {
                tracing::error!("munmap failed during drop: {e}");
            }
        }
    }
}

// SAFETY: PhysMapping owns its mapping exclusively; the pointer stays valid
// for the struct's lifetime regardless of which thread holds it.
unsafe impl Send for PhysMapping {}

// SAFETY: every access is a single volatile load/store or a bounded copy;
// the driver serializes bracket operations through `&mut Tsec`.
unsafe impl Sync for PhysMapping {}

/// One register block mapped from `/dev/mem`.
#[derive(Debug)]
pub struct MappedRegion {
    mapping: PhysMapping,
    block: Block,
}

impl MappedRegion {
    /// Map a block's register window.
    ///
    /// # Errors
    ///
    /// Returns [`TsecError::Mapping`] if `/dev/mem` cannot be opened or the
    /// window cannot be mapped.
    pub fn map(block: Block) -> Result<Self> {
        let mapping = PhysMapping::open(block.base(), block.size(), block.name())?;
        tracing::info!("Mapped {block} at {:#x}", block.base());
        Ok(Self { mapping, block })
    }
}

impl Mmio for MappedRegion {
    fn block(&self) -> Block {
        self.block
    }

    fn size(&self) -> usize {
        self.mapping.size()
    }

    fn read32(&self, offset: usize) -> Result<u32> {
        check_access(self.block, self.size(), offset)?;
        let value = self.mapping.read32(offset);
        tracing::trace!("{} read {offset:#x} = {value:#010x}", self.block);
        Ok(value)
    }

    fn write32(&self, offset: usize, value: u32) -> Result<()> {
        check_access(self.block, self.size(), offset)?;
        tracing::trace!("{} write {offset:#x} = {value:#010x}", self.block);
        self.mapping.write32(offset, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_offsets_past_window() {
        assert!(check_access(Block::Kfuse, 0x400, 0x3FC).is_ok());
        let err = check_access(Block::Kfuse, 0x400, 0x400).unwrap_err();
        assert_eq!(err.code(), -8);
    }

    #[test]
    fn rejects_misaligned_offsets() {
        assert!(check_access(Block::Tsec, 0x4_0000, 0x1042).is_err());
    }

    #[test]
    fn rejects_overflowing_offsets() {
        assert!(check_access(Block::Tsec, 0x4_0000, usize::MAX - 1).is_err());
    }
}
