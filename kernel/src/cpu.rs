//! Per-CPU state.
//!
//! The CPU array is indexed by the logical cpuid kept in `tp`, which boot
//! code establishes before any lock, log, or allocator call. The SBI boot
//! hart is cpuid 0; its machine hartid and those of the secondaries are
//! recorded here because the PLIC is indexed by hartid, not cpuid.

use core::{arch::asm, cell::UnsafeCell, ptr::NonNull};

use crate::{interrupt, param::NCPU, proc::Proc, proc::scheduler::Context};

pub const INVALID_CPUID: usize = usize::MAX;

static CPUS: [Cpu; NCPU] = [const { Cpu::new() }; NCPU];

pub struct Cpu {
    mhart_id: UnsafeCell<usize>,
    /// The process running on this CPU, if any.
    proc: UnsafeCell<Option<NonNull<Proc>>>,
    /// switch() here to enter the scheduler.
    sched_context: UnsafeCell<Context>,
    /// Set across `kernel_trap`; nested kernel traps are fatal.
    in_kernel_trap: UnsafeCell<bool>,
    /// Top of this CPU's scheduler stack.
    sched_stack_top: UnsafeCell<usize>,
}

unsafe impl Sync for Cpu {}

/// Returns this CPU's logical id, from `tp`.
///
/// Must be called with interrupts disabled, to prevent a race with being
/// moved to a different CPU.
pub fn id() -> usize {
    assert!(!interrupt::is_enabled());

    let id: usize;
    unsafe { asm!("mv {}, tp", out(reg) id) };
    id
}

/// Stores this CPU's logical id in `tp`. Boot-time only.
pub unsafe fn set_id(id: usize) {
    unsafe {
        asm!("mv tp, {}", in(reg) id);
    }
}

/// This CPU's slot. Interrupts must be disabled.
pub fn current() -> &'static Cpu {
    assert!(!interrupt::is_enabled());
    &CPUS[id()]
}

/// Another CPU's slot, by logical id.
///
/// # Safety
///
/// Only boot code may touch another CPU's slot, before that CPU runs.
pub unsafe fn getcpu(i: usize) -> &'static Cpu {
    assert!(i < NCPU);
    &CPUS[i]
}

impl Cpu {
    const fn new() -> Self {
        Self {
            mhart_id: UnsafeCell::new(0),
            proc: UnsafeCell::new(None),
            sched_context: UnsafeCell::new(Context::zeroed()),
            in_kernel_trap: UnsafeCell::new(false),
            sched_stack_top: UnsafeCell::new(0),
        }
    }

    pub fn mhart_id(&self) -> usize {
        unsafe { *self.mhart_id.get() }
    }

    pub unsafe fn set_mhart_id(&self, hartid: usize) {
        unsafe {
            *self.mhart_id.get() = hartid;
        }
    }

    pub unsafe fn set_proc(&self, p: Option<NonNull<Proc>>) {
        unsafe {
            *self.proc.get() = p;
        }
    }

    pub fn proc(&self) -> Option<NonNull<Proc>> {
        unsafe { *self.proc.get() }
    }

    pub fn sched_context_ptr(&self) -> *mut Context {
        self.sched_context.get()
    }

    pub fn in_kernel_trap(&self) -> bool {
        unsafe { *self.in_kernel_trap.get() }
    }

    pub unsafe fn set_in_kernel_trap(&self, value: bool) {
        unsafe {
            *self.in_kernel_trap.get() = value;
        }
    }

    pub fn sched_stack_top(&self) -> usize {
        unsafe { *self.sched_stack_top.get() }
    }

    pub unsafe fn set_sched_stack_top(&self, top: usize) {
        unsafe {
            *self.sched_stack_top.get() = top;
        }
    }
}
