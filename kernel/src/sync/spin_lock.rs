use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

use crate::{cpu, interrupt};

struct RawSpinLock {
    locked: AtomicBool,
    /// Which CPU holds the lock, for `holding()`.
    cpuid: UnsafeCell<usize>,
}

unsafe impl Sync for RawSpinLock {}

impl RawSpinLock {
    const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            cpuid: UnsafeCell::new(cpu::INVALID_CPUID),
        }
    }

    /// Spins until the lock is acquired.
    ///
    /// Interrupts stay pushed off until the matching `release`.
    fn acquire(&self) {
        // Disable interrupts to avoid deadlock with interrupt handlers
        // taking the same lock.
        let irq = interrupt::push_off();

        assert!(!self.holding(), "recursive spinlock acquire");

        // `Ordering::Acquire` keeps the critical section's loads and stores
        // strictly after this swap. On RISC-V this is the fence around
        // `amoswap`.
        while self.locked.swap(true, Ordering::Acquire) {
            core::hint::spin_loop();
        }

        unsafe {
            *self.cpuid.get() = cpu::id();
        }

        // The matching pop happens in `release`.
        irq.forget();
    }

    fn release(&self) {
        assert!(self.holding(), "release of a lock we do not hold");

        unsafe {
            *self.cpuid.get() = cpu::INVALID_CPUID;
        }

        // `Ordering::Release` publishes every store of the critical section
        // before the lock is observed free.
        self.locked.store(false, Ordering::Release);

        unsafe {
            interrupt::pop_off();
        }
    }

    /// Whether this CPU holds the lock. Interrupts must be off.
    fn holding(&self) -> bool {
        assert!(!interrupt::is_enabled());
        self.locked.load(Ordering::Relaxed) && unsafe { *self.cpuid.get() } == cpu::id()
    }
}

pub struct SpinLock<T> {
    lock: RawSpinLock,
    value: UnsafeCell<T>,
}

unsafe impl<T> Sync for SpinLock<T> where T: Send {}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            lock: RawSpinLock::new(),
            value: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> SpinLockGuard<T> {
        self.lock.acquire();
        SpinLockGuard { lock: self }
    }

    /// Rebuilds the guard for a lock this CPU already holds.
    ///
    /// Used on the first return from the scheduler into a new process,
    /// which inherits the process lock acquired on the scheduler side.
    ///
    /// # Safety
    ///
    /// The calling CPU must hold the lock with no live guard for it.
    pub unsafe fn remember_locked(&self) -> SpinLockGuard<T> {
        assert!(self.lock.holding());
        SpinLockGuard { lock: self }
    }
}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

unsafe impl<T> Send for SpinLockGuard<'_, T> where T: Send {}
unsafe impl<T> Sync for SpinLockGuard<'_, T> where T: Sync {}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.lock.release();
    }
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<'a, T> SpinLockGuard<'a, T> {
    pub fn into_lock(self) -> &'a SpinLock<T> {
        let lock = self.lock;
        drop(self);
        lock
    }
}
