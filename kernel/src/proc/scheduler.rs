//! The run queue, the per-CPU scheduler loop, and the context switch.
//!
//! One global queue of runnable processes feeds every CPU. A process is on
//! the queue exactly when it is `Runnable`: wakeup, fork and the init load
//! enqueue it, and the scheduler re-enqueues a process that comes back from
//! `switch` still runnable (the yield path).

use core::{
    arch::{asm, naked_asm},
    mem::offset_of,
    ptr::NonNull,
};

use super::{PROCS, Proc, ProcShared, ProcState};
use crate::{cpu, interrupt, param::NPROC, sync::{SpinLock, SpinLockGuard}};

/// Saved registers for kernel context switches.
#[repr(C)]
pub struct Context {
    ra: usize,
    sp: usize,

    // callee-saved
    s0: usize,
    s1: usize,
    s2: usize,
    s3: usize,
    s4: usize,
    s5: usize,
    s6: usize,
    s7: usize,
    s8: usize,
    s9: usize,
    s10: usize,
    s11: usize,
}

impl Context {
    pub const fn zeroed() -> Self {
        Self {
            ra: 0,
            sp: 0,
            s0: 0,
            s1: 0,
            s2: 0,
            s3: 0,
            s4: 0,
            s5: 0,
            s6: 0,
            s7: 0,
            s8: 0,
            s9: 0,
            s10: 0,
            s11: 0,
        }
    }

    /// Arms the context to start a fresh kernel thread.
    pub fn prepare(&mut self, entry: extern "C" fn(), stack_top: usize) {
        *self = Self::zeroed();
        self.ra = entry as usize;
        self.sp = stack_top;
    }
}

/// The global run queue: a bounded ring of process-table indices.
struct TaskQueue {
    slots: [usize; NPROC],
    front: usize,
    tail: usize,
    empty: bool,
}

static RUN_QUEUE: SpinLock<TaskQueue> = SpinLock::new(TaskQueue {
    slots: [0; NPROC],
    front: 0,
    tail: 0,
    empty: true,
});

/// Enqueues a runnable process.
pub fn add_task(p: &Proc) {
    let mut q = RUN_QUEUE.lock();
    assert!(q.empty || q.front != q.tail, "run queue overflow");
    let tail = q.tail;
    q.slots[tail] = p.index();
    q.tail = (tail + 1) % NPROC;
    q.empty = false;
    drop(q);
    crate::log_debug!("add task {} to run queue", p.index());
}

/// Dequeues the next runnable process, if any.
fn fetch_task() -> Option<&'static Proc> {
    let mut q = RUN_QUEUE.lock();
    if q.empty {
        return None;
    }
    let index = q.slots[q.front];
    q.front = (q.front + 1) % NPROC;
    if q.front == q.tail {
        q.empty = true;
    }
    Some(&PROCS.get()[index])
}

/// `true` when every slot in the process table is unused.
fn all_unused() -> bool {
    PROCS
        .get()
        .iter()
        .all(|p| p.shared().lock().state == ProcState::Unused)
}

/// Per-CPU scheduler loop. Never returns.
///
/// Picks a runnable process, switches to it, and takes back over when the
/// process blocks or yields. With nothing to run, idles in `wfi` with
/// interrupts enabled; with nothing left alive at all, the kernel is done.
pub fn schedule() -> ! {
    let cpu = cpu::current();
    let cpuid = cpu::id();
    unsafe {
        cpu.set_proc(None);
    }

    loop {
        let Some(p) = fetch_task() else {
            if all_unused() {
                panic!("[cpu {cpuid}] scheduler dead: all processes gone");
            }
            // Nothing runnable; sleepers need interrupts to make progress.
            interrupt::enable();
            unsafe {
                asm!("wfi");
            }
            interrupt::disable();
            continue;
        };

        let mut shared = p.shared().lock();
        assert_eq!(shared.state, ProcState::Runnable);
        shared.state = ProcState::Running;
        unsafe {
            cpu.set_proc(Some(NonNull::from(p)));
        }

        // It is the process's job to release its lock and reacquire it
        // before switching back here.
        unsafe {
            switch(cpu.sched_context_ptr(), &raw const shared.context);
        }

        // Whoever switched back to us holds p's lock and left interrupts
        // off.
        assert!(!interrupt::is_enabled());
        unsafe {
            cpu.set_proc(None);
        }
        if shared.state == ProcState::Runnable {
            add_task(p);
        }
        drop(shared);
    }
}

/// Switches to the scheduler.
///
/// Caller must hold exactly its own `proc` lock, with the state already
/// changed away from `Running`. The recorded interrupt intent is carried
/// across because it belongs to this kernel thread, not to the CPU.
pub fn sched(shared: &mut SpinLockGuard<ProcShared>) {
    assert!(!interrupt::is_enabled());
    assert_eq!(interrupt::disabled_depth(), 1, "sched holding extra locks");
    assert_ne!(shared.state, ProcState::Running, "sched of a running process");
    assert!(
        !cpu::current().in_kernel_trap(),
        "sched from a kernel trap handler"
    );

    let int_enabled = interrupt::is_enabled_before_push();
    unsafe {
        switch(&raw mut shared.context, cpu::current().sched_context_ptr());
    }
    unsafe {
        interrupt::force_set_before_push(int_enabled);
    }
}

/// Saves the current registers in `old` and loads `new`.
///
/// The only primitive that changes stacks.
#[unsafe(naked)]
unsafe extern "C" fn switch(old: *mut Context, new: *const Context) {
    unsafe {
        naked_asm!(
            "sd ra, {c_ra}(a0)",
            "sd sp, {c_sp}(a0)",
            "sd s0, {c_s0}(a0)",
            "sd s1, {c_s1}(a0)",
            "sd s2, {c_s2}(a0)",
            "sd s3, {c_s3}(a0)",
            "sd s4, {c_s4}(a0)",
            "sd s5, {c_s5}(a0)",
            "sd s6, {c_s6}(a0)",
            "sd s7, {c_s7}(a0)",
            "sd s8, {c_s8}(a0)",
            "sd s9, {c_s9}(a0)",
            "sd s10, {c_s10}(a0)",
            "sd s11, {c_s11}(a0)",
            "ld ra, {c_ra}(a1)",
            "ld sp, {c_sp}(a1)",
            "ld s0, {c_s0}(a1)",
            "ld s1, {c_s1}(a1)",
            "ld s2, {c_s2}(a1)",
            "ld s3, {c_s3}(a1)",
            "ld s4, {c_s4}(a1)",
            "ld s5, {c_s5}(a1)",
            "ld s6, {c_s6}(a1)",
            "ld s7, {c_s7}(a1)",
            "ld s8, {c_s8}(a1)",
            "ld s9, {c_s9}(a1)",
            "ld s10, {c_s10}(a1)",
            "ld s11, {c_s11}(a1)",
            "ret",
            c_ra = const offset_of!(Context, ra),
            c_sp = const offset_of!(Context, sp),
            c_s0 = const offset_of!(Context, s0),
            c_s1 = const offset_of!(Context, s1),
            c_s2 = const offset_of!(Context, s2),
            c_s3 = const offset_of!(Context, s3),
            c_s4 = const offset_of!(Context, s4),
            c_s5 = const offset_of!(Context, s5),
            c_s6 = const offset_of!(Context, s6),
            c_s7 = const offset_of!(Context, s7),
            c_s8 = const offset_of!(Context, s8),
            c_s9 = const offset_of!(Context, s9),
            c_s10 = const offset_of!(Context, s10),
            c_s11 = const offset_of!(Context, s11),
        )
    }
}
