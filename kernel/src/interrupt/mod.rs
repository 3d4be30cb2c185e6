//! Interrupt enable/disable discipline.
//!
//! `push_off`/`pop_off` nest: interrupts are re-enabled only when the last
//! pop undoes the first push, and only if they were on before that first
//! push. Every spinlock acquire pushes; every release pops. Holding any
//! spinlock with interrupts enabled is a bug.

use core::{
    mem,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use riscv::register::sstatus;

use crate::{cpu, param::NCPU};

pub mod kernel_vec;
pub mod plic;
pub mod timer;
pub mod trampoline;
pub mod trap;

/// Enables device interrupts on this hart.
pub fn enable() {
    unsafe {
        sstatus::set_sie();
    }
}

/// Disables device interrupts on this hart.
pub fn disable() {
    unsafe {
        sstatus::clear_sie();
    }
}

pub fn is_enabled() -> bool {
    sstatus::read().sie()
}

static CPU_STATE: [CpuIrqState; NCPU] = [const { CpuIrqState::new() }; NCPU];

struct CpuIrqState {
    /// Depth of `push_off` nesting.
    noff: AtomicUsize,
    /// Were interrupts on before the first push?
    int_enabled: AtomicBool,
}

impl CpuIrqState {
    const fn new() -> Self {
        Self {
            noff: AtomicUsize::new(0),
            int_enabled: AtomicBool::new(false),
        }
    }
}

/// Current `push_off` depth on this CPU.
pub fn disabled_depth() -> usize {
    CPU_STATE[cpu::id()].noff.load(Ordering::Relaxed)
}

/// The interrupt state recorded at the first `push_off`.
pub fn is_enabled_before_push() -> bool {
    CPU_STATE[cpu::id()].int_enabled.load(Ordering::Relaxed)
}

/// Overwrites the recorded state. The scheduler uses this to carry the
/// outgoing thread's interrupt intent across a context switch.
pub unsafe fn force_set_before_push(enabled: bool) {
    CPU_STATE[cpu::id()]
        .int_enabled
        .store(enabled, Ordering::Relaxed);
}

/// Disables interrupts and bumps this CPU's nesting count.
pub fn push_off() -> IrqGuard {
    let was_enabled = is_enabled();
    disable();

    let state = &CPU_STATE[cpu::id()];
    if state.noff.fetch_add(1, Ordering::Relaxed) == 0 {
        state.int_enabled.store(was_enabled, Ordering::Relaxed);
    }
    IrqGuard { cpuid: cpu::id() }
}

/// Undoes one `push_off` without a guard in hand.
///
/// # Safety
///
/// Must pair with a forgotten [`IrqGuard`] from the same CPU.
pub unsafe fn pop_off() {
    drop(IrqGuard { cpuid: cpu::id() });
}

pub fn with_push_off<T>(f: impl FnOnce() -> T) -> T {
    let _guard = push_off();
    f()
}

/// Undoes a `push_off` when dropped, re-enabling interrupts at depth zero
/// if they were on before the first push.
pub struct IrqGuard {
    cpuid: usize,
}

impl IrqGuard {
    /// Leaves the push in place; someone else will pop.
    pub fn forget(self) {
        mem::forget(self);
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        assert!(!is_enabled(), "pop_off with interrupts on");
        assert_eq!(self.cpuid, cpu::id(), "pop_off on a different CPU");

        let state = &CPU_STATE[self.cpuid];
        let depth = state.noff.load(Ordering::Relaxed);
        assert!(depth >= 1, "unpaired pop_off");
        state.noff.store(depth - 1, Ordering::Relaxed);

        if depth == 1 && state.int_enabled.load(Ordering::Relaxed) {
            // A kernel trap handler must return with interrupts still off;
            // re-enabling here would allow nested kernel traps.
            assert!(
                !cpu::current().in_kernel_trap(),
                "interrupts re-enabled inside a kernel trap"
            );
            enable();
        }
    }
}
