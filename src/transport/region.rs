//! Memory regions backing the slots.
//!
//! A region is a fixed block of bytes shared by two endpoints. The slot
//! layer only needs a base pointer and a length; where the bytes live (heap
//! for in-process pairs, a POSIX mapping for process links) is hidden behind
//! [`RegionMemory`].

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64};

use crate::error::{GroupwireError, Result};

/// Alignment of heap regions; enough for any control word.
const REGION_ALIGN: usize = 64;

/// A fixed block of memory shared between two endpoints.
///
/// # Safety
///
/// `base()` must point to `len()` bytes that stay valid, writable, and at
/// the same address for as long as the implementor is alive.
pub unsafe trait RegionMemory: Send + Sync {
    /// Start of the region.
    fn base(&self) -> *mut u8;

    /// Size of the region in bytes.
    fn len(&self) -> usize;

    /// True for a zero-sized region.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Zero-initialized heap block, for endpoints in the same process.
pub struct HeapRegion {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the block is plain bytes; all shared access goes through atomics
// for control words and through the slot handshake for buffers.
unsafe impl Send for HeapRegion {}
unsafe impl Sync for HeapRegion {}

impl HeapRegion {
    /// Allocate `len` zeroed bytes.
    pub fn new(len: usize) -> Result<Self> {
        let layout = Layout::from_size_align(len.max(1), REGION_ALIGN)
            .map_err(|e| GroupwireError::InvalidLayout(format!("region of {} bytes: {}", len, e)))?;

        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or_else(|| {
            GroupwireError::InvalidLayout(format!("allocation of {} bytes failed", len))
        })?;

        Ok(Self { ptr, layout })
    }
}

// SAFETY: the allocation lives until drop and is never moved.
unsafe impl RegionMemory for HeapRegion {
    fn base(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn len(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for HeapRegion {
    fn drop(&mut self) {
        // SAFETY: ptr came from alloc_zeroed with this exact layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// Check that `size` bytes at `offset` fit the region and are aligned to `align`.
pub(crate) fn check_span(
    region: &dyn RegionMemory,
    offset: usize,
    size: usize,
    align: usize,
) -> Result<*mut u8> {
    let end = offset
        .checked_add(size)
        .ok_or_else(|| GroupwireError::InvalidLayout(format!("offset {} overflows", offset)))?;
    if end > region.len() {
        return Err(GroupwireError::InvalidLayout(format!(
            "span {}..{} outside region of {} bytes",
            offset,
            end,
            region.len()
        )));
    }

    // SAFETY: offset + size <= len, so the result stays inside the region.
    let ptr = unsafe { region.base().add(offset) };
    if (ptr as usize) % align != 0 {
        return Err(GroupwireError::InvalidLayout(format!(
            "offset {} not aligned to {}",
            offset, align
        )));
    }
    Ok(ptr)
}

/// Borrow a 32-bit signed control word.
pub(crate) fn atomic_i32_at(region: &dyn RegionMemory, offset: usize) -> Result<&AtomicI32> {
    let ptr = check_span(region, offset, 4, std::mem::align_of::<AtomicI32>())?;
    // SAFETY: in bounds, aligned, and valid for the lifetime of `region`.
    Ok(unsafe { &*(ptr as *const AtomicI32) })
}

/// Borrow a 32-bit unsigned control word.
pub(crate) fn atomic_u32_at(region: &dyn RegionMemory, offset: usize) -> Result<&AtomicU32> {
    let ptr = check_span(region, offset, 4, std::mem::align_of::<AtomicU32>())?;
    // SAFETY: in bounds, aligned, and valid for the lifetime of `region`.
    Ok(unsafe { &*(ptr as *const AtomicU32) })
}

/// Borrow a 64-bit unsigned control word.
pub(crate) fn atomic_u64_at(region: &dyn RegionMemory, offset: usize) -> Result<&AtomicU64> {
    let ptr = check_span(region, offset, 8, std::mem::align_of::<AtomicU64>())?;
    // SAFETY: in bounds, aligned, and valid for the lifetime of `region`.
    Ok(unsafe { &*(ptr as *const AtomicU64) })
}
