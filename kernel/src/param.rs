//! Kernel-wide tunables.

/// Maximum number of CPUs.
pub const NCPU: usize = 4;

/// Maximum number of processes.
pub const NPROC: usize = 512;

/// Capacity of the `mm` and `vma` object pools.
pub const NMM: usize = 16384;
pub const NVMA: usize = 16384;

/// Maximum number of embedded user applications.
pub const MAX_APP_NUM: usize = 32;

/// Longest path/name accepted from user space, including the NUL.
pub const MAX_STR_LEN: usize = 200;

/// Timebase of the `time` CSR on the QEMU virt machine.
pub const CPU_FREQ: u64 = 10_000_000;

/// Timer interrupts per second.
pub const TICKS_PER_SEC: u64 = 100;
