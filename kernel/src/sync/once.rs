use core::{
    cell::UnsafeCell,
    mem::MaybeUninit,
    sync::atomic::{AtomicBool, Ordering},
};

/// A cell that is written once, at boot, and read ever after.
pub struct Once<T> {
    initialized: AtomicBool,
    value: UnsafeCell<MaybeUninit<T>>,
}

unsafe impl<T> Sync for Once<T> where T: Send {}

impl<T> Once<T> {
    pub const fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Initializes the cell.
    ///
    /// # Panics
    ///
    /// Panics if the cell is already initialized.
    pub fn init(&self, value: T) {
        self.initialized
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .expect("Once::init called twice");

        unsafe {
            (*self.value.get()).write(value);
        }
    }

    /// # Panics
    ///
    /// Panics if the cell is not initialized yet.
    pub fn get(&self) -> &T {
        assert!(
            self.initialized.load(Ordering::Acquire),
            "Once read before init"
        );
        unsafe { (*self.value.get()).assume_init_ref() }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }
}
