//! Named object pools.
//!
//! Each pool owns a slice of kernel VA carved from the pool area, backed by
//! fresh frames at init time, plus a bitmap page tracking slot occupancy.
//! Pools are separated by a wide unmapped gap, so an overflow out of one
//! pool faults instead of corrupting its neighbour.

use core::{marker::PhantomData, ptr::NonNull, sync::atomic::{AtomicUsize, Ordering}};

use bitmap_pool::BitmapPool;

use crate::{
    error::KernelError,
    memory::{PAGE_SIZE, addr::page_roundup, kernel_vm, layout},
    sync::{Once, SpinLock},
};

/// Cursor into the pool VA area. Advanced at init time only.
static NEXT_POOL_BASE: AtomicUsize = AtomicUsize::new(layout::ALLOCATOR_BASE);

/// A pool of `T`-sized slots.
///
/// The pool hands out raw slots; callers initialise them. Slots come back
/// poisoned.
pub struct Pool<T> {
    name: &'static str,
    inner: Once<SpinLock<BitmapPool>>,
    _marker: PhantomData<T>,
}

unsafe impl<T> Sync for Pool<T> {}

impl<T> Pool<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Once::new(),
            _marker: PhantomData,
        }
    }

    /// Carves VA for `max_count` slots plus the bitmap, backs it all with
    /// frames, and arms the pool. Called once per pool, at boot.
    pub fn init(&self, max_count: usize) {
        let obj_bytes = page_roundup(bitmap_pool::backing_len(
            size_of::<T>(),
            align_of::<T>(),
            max_count,
        ));
        let bitmap_bytes = page_roundup(bitmap_pool::bitmap_len(max_count));
        let total = obj_bytes + bitmap_bytes;

        let base = NEXT_POOL_BASE.fetch_add(total + layout::ALLOCATOR_GAP, Ordering::Relaxed);
        kernel_vm::map_pool_pages(base, total / PAGE_SIZE);

        crate::log_info!(
            "pool {}: {} x {} bytes at {:#x}",
            self.name,
            max_count,
            size_of::<T>(),
            base,
        );

        let pool = unsafe {
            BitmapPool::new(
                NonNull::new(core::ptr::with_exposed_provenance_mut(base)).unwrap(),
                NonNull::new(core::ptr::with_exposed_provenance_mut(base + obj_bytes)).unwrap(),
                size_of::<T>(),
                align_of::<T>(),
                max_count,
            )
        };
        self.inner.init(SpinLock::new(pool));
    }

    /// Claims a slot and zeroes it.
    pub fn alloc_zeroed(&self) -> Result<NonNull<T>, KernelError> {
        let ptr = self
            .inner
            .get()
            .lock()
            .alloc()
            .ok_or(KernelError::PoolExhausted)?;
        unsafe {
            ptr.write_bytes(0, size_of::<T>());
        }
        Ok(ptr.cast())
    }

    /// Returns a slot to the pool.
    ///
    /// # Panics
    ///
    /// Panics on double free and on pointers that are not pool slots.
    ///
    /// # Safety
    ///
    /// `obj` must have come from [`Self::alloc_zeroed`] on this pool, the
    /// slot's value must already be dropped or trivially droppable, and the
    /// slot must not be touched afterwards.
    pub unsafe fn free(&self, obj: NonNull<T>) {
        unsafe {
            self.inner.get().lock().free(obj.cast());
        }
    }
}
