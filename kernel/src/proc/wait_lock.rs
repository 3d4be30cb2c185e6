//! The wait lock and the parent links it guards.
//!
//! Parent/child edges are read and written only under the global wait lock,
//! which orders before every `proc` lock. This is what makes the
//! exit/wait/reparent dance lose no wakeups and see no half-updated links.

use core::{cell::UnsafeCell, ptr::NonNull};

use super::Proc;
use crate::sync::{SpinLock, SpinLockGuard};

pub struct WaitLock(());

static WAIT_LOCK: SpinLock<WaitLock> = SpinLock::new(WaitLock(()));

/// Acquires the wait lock. Must be taken before any `proc` lock.
pub fn lock() -> SpinLockGuard<'static, WaitLock> {
    WAIT_LOCK.lock()
}

/// A process's parent link.
pub struct Parent(UnsafeCell<Option<NonNull<Proc>>>);

unsafe impl Sync for Parent {}

impl Parent {
    pub const fn new() -> Self {
        Self(UnsafeCell::new(None))
    }

    pub fn get(&self, _guard: &SpinLockGuard<WaitLock>) -> Option<&'static Proc> {
        unsafe { (*self.0.get()).map(|p| p.as_ref()) }
    }

    pub fn set(&self, parent: Option<&'static Proc>, _guard: &SpinLockGuard<WaitLock>) {
        unsafe {
            *self.0.get() = parent.map(NonNull::from);
        }
    }

    /// Clears the link without the wait lock; only valid while the slot is
    /// being recycled and nobody else can see it.
    pub unsafe fn reset(&self) {
        unsafe {
            *self.0.get() = None;
        }
    }
}
