//! The physical page frame allocator.
//!
//! Owns every frame of RAM left over once `kernel_vm` has finished carving
//! out the image, the boot page window, and the early page-table pages.
//! Frames are tracked by a free list threaded through the frames themselves
//! (reached via the direct map) and are poisoned by the list on both
//! allocation and free.

use core::{ops::Range, ptr::NonNull};

use page_list::PageList;

use crate::{
    error::KernelError,
    memory::{PAGE_SIZE, PhysAddr},
    sync::{Once, SpinLock},
};

static FRAMES: Once<SpinLock<PageList<PAGE_SIZE>>> = Once::new();

/// Hands the allocator its frame range (direct-map addresses).
///
/// Called once on the boot CPU, after `kernel_vm::init`.
pub fn init(range: Range<*mut u8>) {
    let list = unsafe { PageList::new(range) };
    crate::log_info!(
        "page frames: {} available ({} KiB)",
        list.free_count(),
        list.free_count() * PAGE_SIZE / 1024
    );
    FRAMES.init(SpinLock::new(list));
}

pub fn is_initialized() -> bool {
    FRAMES.is_initialized()
}

/// Allocates one frame, filled with the allocation poison.
pub fn alloc_page() -> Result<PhysAddr, KernelError> {
    let page = FRAMES
        .get()
        .lock()
        .alloc()
        .ok_or(KernelError::NoFreePage)?;
    Ok(PhysAddr::of_kva(page))
}

/// Allocates one zeroed frame.
pub fn alloc_zeroed_page() -> Result<PhysAddr, KernelError> {
    let page = FRAMES
        .get()
        .lock()
        .alloc_zeroed()
        .ok_or(KernelError::NoFreePage)?;
    Ok(PhysAddr::of_kva(page))
}

/// Returns a frame to the allocator.
///
/// # Panics
///
/// Panics on a misaligned or out-of-range address and on double free.
///
/// # Safety
///
/// `pa` must have come from [`alloc_page`]/[`alloc_zeroed_page`] and must
/// not be used afterwards.
pub unsafe fn free_page(pa: PhysAddr) {
    assert!(pa.is_valid_ram(), "free of non-RAM frame: {pa:#x}");
    let ptr: NonNull<u8> = pa.as_kva_ptr();
    unsafe {
        FRAMES.get().lock().free(ptr);
    }
}
