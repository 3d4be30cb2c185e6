pub use self::{
    once::Once,
    spin_lock::{SpinLock, SpinLockGuard},
};

mod once;
mod spin_lock;
