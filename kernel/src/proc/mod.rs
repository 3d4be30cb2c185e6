//! The process table and the process lifecycle.
//!
//! `NPROC` descriptors are carved out of the object allocator once, at
//! boot, and never freed; each is pre-assigned a kernel stack (mapped high,
//! with a guard hole) and a trapframe frame. A slot cycles through
//! `Unused -> Used -> Runnable -> Running -> {Sleeping, Zombie} -> Unused`;
//! its spinlock guards the state, the context, and the address-space
//! handle. Parent links live over in `wait_lock`.

use core::ptr::NonNull;

use arrayvec::ArrayVec;
use dataview::{Pod, PodMethods as _};

use self::scheduler::Context;
use crate::{
    cpu,
    error::KernelError,
    memory::{
        PhysAddr,
        kernel_vm, layout,
        page,
        page_table::PtEntryFlags,
        pool::Pool,
        vm::{self, MmRef, VmaRef},
    },
    param::NPROC,
    sync::{Once, SpinLock, SpinLockGuard},
};

pub mod apps;
mod elf;
pub mod exec;
pub mod scheduler;
pub mod wait_lock;

/// Data page for the trampoline, one per process, mapped at `TRAPFRAME`.
///
/// The byte offsets are load-bearing: the trampoline addresses this frame
/// from assembly.
#[repr(C)]
#[derive(Clone, Copy, Pod)]
pub struct TrapFrame {
    /// Kernel page table. (offset 0)
    pub kernel_satp: usize,
    /// Top of this process's kernel stack. (8)
    pub kernel_sp: usize,
    /// Address of `trap_user`. (16)
    pub kernel_trap: usize,
    /// Saved user program counter. (24)
    pub epc: usize,
    /// Saved kernel tp. (32)
    pub kernel_hartid: usize,
    pub ra: usize,  // 40
    pub sp: usize,  // 48
    pub gp: usize,  // 56
    pub tp: usize,  // 64
    pub t0: usize,  // 72
    pub t1: usize,  // 80
    pub t2: usize,  // 88
    pub s0: usize,  // 96
    pub s1: usize,  // 104
    pub a0: usize,  // 112
    pub a1: usize,  // 120
    pub a2: usize,  // 128
    pub a3: usize,  // 136
    pub a4: usize,  // 144
    pub a5: usize,  // 152
    pub a6: usize,  // 160
    pub a7: usize,  // 168
    pub s2: usize,  // 176
    pub s3: usize,  // 184
    pub s4: usize,  // 192
    pub s5: usize,  // 200
    pub s6: usize,  // 208
    pub s7: usize,  // 216
    pub s8: usize,  // 224
    pub s9: usize,  // 232
    pub s10: usize, // 240
    pub s11: usize, // 248
    pub t3: usize,  // 256
    pub t4: usize,  // 264
    pub t5: usize,  // 272
    pub t6: usize,  // 280
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Unused,
    Used,
    Sleeping { chan: usize },
    Runnable,
    Running,
    Zombie,
}

/// Everything behind the per-process lock.
pub struct ProcShared {
    pub(crate) state: ProcState,
    pid: usize,
    exit_code: i32,
    killed: bool,
    name: ArrayVec<u8, 16>,
    /// switch() here to run the process.
    context: Context,
    mm: Option<MmRef>,
    vma_ustack: Option<VmaRef>,
    vma_brk: Option<VmaRef>,
    vma_trapframe: Option<VmaRef>,
    vma_trampoline: Option<VmaRef>,
}

impl ProcShared {
    const fn new() -> Self {
        Self {
            state: ProcState::Unused,
            pid: 0,
            exit_code: 0,
            killed: false,
            name: ArrayVec::new_const(),
            context: Context::zeroed(),
            mm: None,
            vma_ustack: None,
            vma_brk: None,
            vma_trapframe: None,
            vma_trampoline: None,
        }
    }

    pub fn set_name(&mut self, name: &str) {
        self.name.clear();
        let len = usize::min(self.name.capacity(), name.len());
        self.name.try_extend_from_slice(&name.as_bytes()[..len]).unwrap();
    }
}

/// One process-table slot.
pub struct Proc {
    shared: SpinLock<ProcShared>,
    /// Slot number; fixed at init.
    index: usize,
    /// Top of the pre-assigned kernel stack; fixed at init.
    kstack_top: usize,
    /// The pre-assigned trapframe frame; fixed at init.
    trapframe: PhysAddr,
    /// Parent link, guarded by the wait lock.
    parent: wait_lock::Parent,
}

static PROC_POOL: Pool<Proc> = Pool::new("proc");
static PROCS: Once<&'static [Proc]> = Once::new();
static INIT_PROC: Once<&'static Proc> = Once::new();
static NEXT_PID: core::sync::atomic::AtomicUsize = core::sync::atomic::AtomicUsize::new(1);

/// The sleep/wakeup channel derived from an object's address: a stable
/// token, never dereferenced.
pub fn chan_of<T>(obj: &T) -> usize {
    core::ptr::from_ref(obj).addr()
}

impl Proc {
    /// The process running on this CPU.
    pub fn current() -> &'static Self {
        Self::try_current().unwrap()
    }

    pub fn try_current() -> Option<&'static Self> {
        let p = crate::interrupt::with_push_off(|| cpu::current().proc())?;
        Some(unsafe { p.as_ref() })
    }

    pub fn shared(&self) -> &SpinLock<ProcShared> {
        &self.shared
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kstack_top(&self) -> usize {
        self.kstack_top
    }

    pub fn pid(&self) -> usize {
        self.shared.lock().pid
    }

    /// The current address space. Panics on an `Unused` slot.
    pub fn mm(&self) -> MmRef {
        self.shared.lock().mm.expect("proc without an address space")
    }

    /// The trapframe, through the direct map.
    ///
    /// # Safety
    ///
    /// Only the process itself (while running or being built) and fork's
    /// parent-side copy may touch the trapframe.
    #[expect(clippy::mut_from_ref)]
    pub unsafe fn trapframe_mut(&self) -> &mut TrapFrame {
        unsafe { self.trapframe.as_kva_ptr::<TrapFrame>().as_mut() }
    }

    /// This process's parent, read under the wait lock.
    pub fn parent(
        &self,
        guard: &SpinLockGuard<wait_lock::WaitLock>,
    ) -> Option<&'static Self> {
        self.parent.get(guard)
    }

    fn chan(&self) -> usize {
        chan_of(self)
    }
}

/// Builds the process table: one never-freed descriptor per slot, each with
/// a mapped kernel stack and a trapframe frame.
pub fn init() {
    PROC_POOL.init(NPROC);

    let mut first: Option<NonNull<Proc>> = None;
    for i in 0..NPROC {
        let kstack_top = kernel_vm::map_proc_stack(i);
        let trapframe = page::alloc_zeroed_page().expect("out of frames for trapframes");
        let slot = PROC_POOL.alloc_zeroed().expect("proc pool too small");
        unsafe {
            slot.write(Proc {
                shared: SpinLock::new(ProcShared::new()),
                index: i,
                kstack_top,
                trapframe,
                parent: wait_lock::Parent::new(),
            });
        }
        if first.is_none() {
            first = Some(slot);
        }
    }

    // The pool hands out consecutive slots from a fresh bitmap, so the
    // descriptors form one contiguous array.
    let procs = unsafe { core::slice::from_raw_parts(first.unwrap().as_ptr(), NPROC) };
    PROCS.init(procs);
    crate::log_info!("proc table ready: {NPROC} slots");
}

pub fn procs() -> &'static [Proc] {
    *PROCS.get()
}


pub fn init_proc() -> &'static Proc {
    INIT_PROC.get()
}

fn allocate_pid() -> usize {
    NEXT_PID.fetch_add(1, core::sync::atomic::Ordering::Relaxed)
}

/// Claims an `Unused` slot and gives it an empty address space with the
/// trampoline and trapframe mapped. Returns with the slot's lock held and
/// the context armed to enter user space on first schedule.
pub fn allocproc() -> Result<(&'static Proc, SpinLockGuard<'static, ProcShared>), KernelError> {
    let (p, mut shared) = lock_unused_proc()?;

    shared.pid = allocate_pid();
    shared.state = ProcState::Used;

    let res = (|| {
        let mm = vm::create_mm()?;
        shared.mm = Some(mm);

        let mut mm_data = mm.lock();
        shared.vma_trampoline = Some(mm_data.map_fixed(
            mm,
            layout::TRAMPOLINE,
            layout::kiva_to_pa(layout::trampoline_addr()),
            PtEntryFlags::A | PtEntryFlags::RX,
            false,
        )?);
        shared.vma_trapframe = Some(mm_data.map_fixed(
            mm,
            layout::TRAPFRAME,
            p.trapframe,
            PtEntryFlags::AD | PtEntryFlags::RW,
            false,
        )?);
        Ok(())
    })();

    if let Err(e) = res {
        free_proc(p, &mut shared);
        return Err(e);
    }

    unsafe {
        *p.trapframe_mut() = TrapFrame::zeroed();
    }
    // First schedule releases the lock and falls through to user space.
    shared.context.prepare(first_sched_userret, p.kstack_top);

    Ok((p, shared))
}

fn lock_unused_proc()
-> Result<(&'static Proc, SpinLockGuard<'static, ProcShared>), KernelError> {
    for p in procs() {
        let shared = p.shared.lock();
        if shared.state == ProcState::Unused {
            return Ok((p, shared));
        }
        drop(shared);
    }
    Err(KernelError::NoFreeProc)
}

/// Returns a slot to `Unused`, tearing down its address space. The kernel
/// stack and trapframe frame stay assigned to the slot.
fn free_proc(p: &Proc, shared: &mut SpinLockGuard<ProcShared>) {
    if let Some(mm) = shared.mm.take() {
        {
            let mut mm_data = mm.lock();
            if let Some(vma) = shared.vma_trampoline.take() {
                // The trampoline frame is shared by everyone.
                mm_data.unmap_vma(vma, false);
            }
            if let Some(vma) = shared.vma_trapframe.take() {
                // The trapframe frame stays with the slot.
                mm_data.unmap_vma(vma, false);
            }
        }
        unsafe {
            vm::free_mm(mm);
        }
    }
    // Their VMA objects went down with the mm's list.
    shared.vma_ustack.take();
    shared.vma_brk.take();
    unsafe {
        p.parent.reset();
    }
    shared.pid = 0;
    shared.exit_code = 0;
    shared.killed = false;
    shared.name.clear();
    shared.state = ProcState::Unused;
}

/// A new process's first pass through the scheduler lands here, still
/// holding its own lock; release it and head for user space.
extern "C" fn first_sched_userret() {
    let p = Proc::current();
    drop(unsafe { p.shared.remember_locked() });
    crate::interrupt::trap::trap_user_ret(p)
}

/// Creates a new process, copying the parent's address space and trapframe.
///
/// The child returns 0 from the fork; the parent gets the child's pid.
pub fn fork(p: &'static Proc) -> Result<usize, KernelError> {
    let parent_name = p.shared.lock().name.clone();

    let (np, mut np_shared) = allocproc()?;
    let pid = np_shared.pid;

    // Copy user memory, page by page.
    let p_mm = p.mm();
    let np_mm = np_shared.mm.unwrap();
    let copy_res = {
        let mut src = p_mm.lock();
        let mut dst = np_mm.lock();
        src.clone_into(np_mm, &mut dst)
    };
    if copy_res.is_err() {
        free_proc(np, &mut np_shared);
        return Err(copy_res.unwrap_err());
    }

    // Copy saved user registers; fork returns 0 in the child.
    unsafe {
        *np.trapframe_mut() = *p.trapframe_mut();
        np.trapframe_mut().a0 = 0;
    }
    np_shared.name = parent_name;
    drop(np_shared);

    // Parent link first, then publish the child as runnable.
    {
        let guard = wait_lock::lock();
        np.parent.set(Some(p), &guard);
    }
    let mut np_shared = np.shared.lock();
    np_shared.state = ProcState::Runnable;
    scheduler::add_task(np);
    drop(np_shared);

    Ok(pid)
}

/// Exits the current process. Never returns; the slot stays a zombie until
/// the parent reaps it with `wait`.
pub fn exit(p: &'static Proc, code: i32) -> ! {
    assert!(
        !core::ptr::eq(p, init_proc()),
        "init exiting with code {code}"
    );

    let wait_guard = wait_lock::lock();

    // Parent might be sleeping in wait().
    if let Some(parent) = p.parent.get(&wait_guard) {
        wakeup(parent.chan());
    }

    // Give any children to init.
    let init = init_proc();
    for pp in procs() {
        if pp
            .parent
            .get(&wait_guard)
            .is_some_and(|par| core::ptr::eq(par, p))
        {
            pp.parent.set(Some(init), &wait_guard);
            wakeup(init.chan());
        }
    }

    let mut shared = p.shared.lock();
    shared.exit_code = code;
    shared.state = ProcState::Zombie;
    drop(wait_guard);

    // Into the scheduler, never to return.
    scheduler::sched(&mut shared);
    unreachable!("zombie exit");
}

/// Waits for a child to exit and reaps it.
///
/// `pid_filter > 0` waits for that specific child. The child's exit code is
/// copied to `status_va` unless it is null. Returns the reaped child's pid,
/// or an error when there is nothing to wait for.
pub fn wait(
    p: &'static Proc,
    pid_filter: isize,
    status_va: usize,
) -> Result<usize, KernelError> {
    // Resolved before the wait lock: only the process itself can change
    // its own address space, and it is busy waiting.
    let p_mm = p.mm();
    let mut wait_guard = wait_lock::lock();

    loop {
        let mut have_kids = false;
        for pp in procs() {
            if !pp
                .parent
                .get(&wait_guard)
                .is_some_and(|par| core::ptr::eq(par, p))
            {
                continue;
            }

            // The lock makes sure the child is done with exit()'s switch.
            let mut pp_shared = pp.shared.lock();
            if pid_filter > 0 && pp_shared.pid != pid_filter as usize {
                drop(pp_shared);
                continue;
            }
            have_kids = true;

            if pp_shared.state == ProcState::Zombie {
                let pid = pp_shared.pid;
                if status_va != 0 {
                    let exit_code = pp_shared.exit_code;
                    let res = p_mm.lock().copy_to_user(status_va, exit_code.as_bytes());
                    if let Err(e) = res {
                        drop(pp_shared);
                        return Err(e);
                    }
                }
                free_proc(pp, &mut pp_shared);
                return Ok(pid);
            }
            drop(pp_shared);
        }

        if !have_kids || p.shared.lock().killed {
            return Err(KernelError::NoChildProcess);
        }

        // Sleep on ourselves; exit() wakes the parent's channel.
        wait_guard = sleep(p.chan(), wait_guard);
    }
}

/// Gives up the CPU for one scheduling round.
pub fn yield_(p: &Proc) {
    let mut shared = p.shared.lock();
    shared.state = ProcState::Runnable;
    // The scheduler re-enqueues a process that is still runnable.
    scheduler::sched(&mut shared);
    drop(shared);
}

/// Atomically releases `guard` and sleeps on `chan`; reacquires the lock
/// when awakened.
///
/// Holding the process lock across the release is what makes a concurrent
/// `wakeup(chan)` under `guard`'s lock impossible to miss.
pub fn sleep<'a, T>(chan: usize, guard: SpinLockGuard<'a, T>) -> SpinLockGuard<'a, T> {
    let p = Proc::current();
    let mut shared = p.shared.lock();
    let lock = guard.into_lock();

    shared.state = ProcState::Sleeping { chan };
    scheduler::sched(&mut shared);

    // Woke up; sleep_chan is gone with the state.
    drop(shared);
    lock.lock()
}

/// Makes every process sleeping on `chan` runnable, each exactly once.
pub fn wakeup(chan: usize) {
    let current = Proc::try_current().map(core::ptr::from_ref);
    for p in procs() {
        if current == Some(core::ptr::from_ref(p)) {
            continue;
        }
        let mut shared = p.shared.lock();
        if shared.state == (ProcState::Sleeping { chan }) {
            shared.state = ProcState::Runnable;
            scheduler::add_task(p);
        }
        drop(shared);
    }
}

/// Registers the first user process.
fn set_init_proc(p: &'static Proc) {
    INIT_PROC.init(p);
}
