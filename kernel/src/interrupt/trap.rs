//! Trap dispatch.
//!
//! Two entry points: user traps arrive through the trampoline and land in
//! [`trap_user`]; kernel traps go through `kernel_vec` into
//! [`trap_kernel`]. Kernel code is never preempted: a timer interrupt taken
//! in supervisor mode re-arms the tick and returns, and the whole kernel
//! handler runs with interrupts off. The only preemption point is the timer
//! interrupt taken from user mode.

use core::mem;

use riscv::{
    interrupt::{
        Trap,
        supervisor::{Exception, Interrupt},
    },
    register::{
        satp, scause, sepc,
        sstatus::{self, SPP},
        stval,
        stvec::{self, Stvec, TrapMode},
    },
};

use super::{kernel_vec, plic, timer, trampoline};
use crate::{
    console::uart,
    cpu,
    interrupt,
    memory::{VirtAddr, kernel_vm, layout::UART0_IRQ, page_table::PtEntryFlags},
    proc::{self, Proc},
    syscall,
};

/// Registers saved by `kernel_vec` on a supervisor-mode trap.
#[repr(C)]
pub struct KTrapFrame {
    pub ra: usize,
    pub sp: usize,
    pub gp: usize,
    pub tp: usize,
    pub t0: usize,
    pub t1: usize,
    pub t2: usize,
    pub s0: usize,
    pub s1: usize,
    pub a0: usize,
    pub a1: usize,
    pub a2: usize,
    pub a3: usize,
    pub a4: usize,
    pub a5: usize,
    pub a6: usize,
    pub a7: usize,
    pub s2: usize,
    pub s3: usize,
    pub s4: usize,
    pub s5: usize,
    pub s6: usize,
    pub s7: usize,
    pub s8: usize,
    pub s9: usize,
    pub s10: usize,
    pub s11: usize,
    pub t3: usize,
    pub t4: usize,
    pub t5: usize,
    pub t6: usize,
}

fn write_stvec(addr: usize) {
    let mut v = Stvec::from_bits(0);
    v.set_address(addr);
    v.set_trap_mode(TrapMode::Direct);
    unsafe {
        stvec::write(v);
    }
}

/// Points this hart's traps at the kernel vector.
pub fn init_hart() {
    write_stvec(kernel_vec::kernel_vec as usize);
}

fn read_cause() -> Trap<Interrupt, Exception> {
    scause::read().cause().try_into().unwrap()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum IntrKind {
    Timer,
    External,
}

/// Handles a recognized device interrupt; panics (kernel) or kills (user)
/// on anything else via the `None` return.
fn handle_dev_interrupt(int: Interrupt) -> Option<IntrKind> {
    match int {
        Interrupt::SupervisorTimer => {
            // Re-arm the tick. Whether to yield is the caller's decision;
            // kernel threads never do.
            timer::set_next_timer();
            Some(IntrKind::Timer)
        }
        Interrupt::SupervisorExternal => {
            let irq = plic::claim();
            if irq == UART0_IRQ {
                uart::handle_interrupt();
            } else if irq > 0 {
                crate::log_warn!("unexpected external irq={irq}");
            }
            if irq > 0 {
                plic::complete(irq);
            }
            Some(IntrKind::External)
        }
        _ => None,
    }
}

/// Interrupts and exceptions from kernel code.
///
/// Runs with interrupts off, start to finish, and must not nest: the
/// in-kernel-trap flag is fatal to re-enter. Exceptions in the kernel are
/// bugs and panic with a register dump.
pub extern "C" fn trap_kernel(ktf: &KTrapFrame) {
    assert_eq!(
        sstatus::read().spp(),
        SPP::Supervisor,
        "kernel trap not from supervisor mode"
    );
    assert!(!interrupt::is_enabled());

    let cpu = cpu::current();
    assert!(!cpu.in_kernel_trap(), "nested kernel trap");
    unsafe {
        cpu.set_in_kernel_trap(true);
    }

    match read_cause() {
        Trap::Interrupt(int) => {
            if handle_dev_interrupt(int).is_none() {
                panic!("kernel trap: unrecognized interrupt {int:?}");
            }
        }
        Trap::Exception(e) => {
            dump_ktrapframe(ktf);
            panic!(
                "kernel trap: exception {e:?} sepc={:#x} stval={:#x}",
                sepc::read(),
                stval::read()
            );
        }
    }

    unsafe {
        cpu.set_in_kernel_trap(false);
    }
    // Interrupts stay off; sret restores SPIE.
}

fn dump_ktrapframe(ktf: &KTrapFrame) {
    crate::println!(
        "ra={:#x} sp={:#x} gp={:#x} tp={:#x}",
        ktf.ra,
        ktf.sp,
        ktf.gp,
        ktf.tp
    );
    crate::println!(
        "t0={:#x} t1={:#x} t2={:#x} t3={:#x} t4={:#x} t5={:#x} t6={:#x}",
        ktf.t0,
        ktf.t1,
        ktf.t2,
        ktf.t3,
        ktf.t4,
        ktf.t5,
        ktf.t6
    );
    crate::println!(
        "a0={:#x} a1={:#x} a2={:#x} a3={:#x} a4={:#x} a5={:#x} a6={:#x} a7={:#x}",
        ktf.a0,
        ktf.a1,
        ktf.a2,
        ktf.a3,
        ktf.a4,
        ktf.a5,
        ktf.a6,
        ktf.a7
    );
    crate::println!(
        "s0={:#x} s1={:#x} s2={:#x} s3={:#x} s4={:#x} s5={:#x} s6={:#x}",
        ktf.s0,
        ktf.s1,
        ktf.s2,
        ktf.s3,
        ktf.s4,
        ktf.s5,
        ktf.s6
    );
    crate::println!(
        "s7={:#x} s8={:#x} s9={:#x} s10={:#x} s11={:#x}",
        ktf.s7,
        ktf.s8,
        ktf.s9,
        ktf.s10,
        ktf.s11
    );
}

/// Repairs the accessed/dirty bits after a user page fault, mimicking
/// hardware that traps instead of setting them. Returns `false` when the
/// faulting page is simply not mapped.
fn fix_page_fault(p: &'static Proc, va: usize, is_store: bool) -> bool {
    let Ok(va) = VirtAddr::new(va) else {
        return false;
    };
    let mm = p.mm();
    let mut mm = mm.lock();
    let Ok(pte) = mm.walk(va, false) else {
        return false;
    };
    if !pte.is_valid() {
        return false;
    }
    let mut flags = pte.flags() | PtEntryFlags::A;
    if is_store {
        flags |= PtEntryFlags::D;
    }
    pte.set_flags(flags);
    riscv::asm::sfence_vma_all();
    true
}

/// Handles an interrupt, exception, or system call from user space.
///
/// Entered from the trampoline, on the process kernel stack.
pub extern "C" fn trap_user() -> ! {
    assert_eq!(sstatus::read().spp(), SPP::User, "user trap not from user mode");

    // Traps from now on are kernel traps.
    write_stvec(kernel_vec::kernel_vec as usize);

    let p = Proc::current();
    unsafe { p.trapframe_mut() }.epc = sepc::read();

    let mut yield_now = false;
    match read_cause() {
        Trap::Interrupt(int) => match handle_dev_interrupt(int) {
            Some(IntrKind::Timer) => yield_now = true,
            Some(IntrKind::External) => {}
            None => {
                crate::log_error!(
                    "unexpected interrupt {int:?} pid={} sepc={:#x} stval={:#x}",
                    p.pid(),
                    sepc::read(),
                    stval::read()
                );
                proc::exit(p, -1);
            }
        },
        Trap::Exception(Exception::UserEnvCall) => {
            // sepc points at the ecall; return past it.
            unsafe { p.trapframe_mut() }.epc += 4;

            // An interrupt would clobber sepc and friends; they are saved
            // now, so let interrupts in for the syscall itself.
            interrupt::enable();
            syscall::syscall(p);
            interrupt::disable();
        }
        Trap::Exception(
            e @ (Exception::LoadPageFault
            | Exception::StorePageFault
            | Exception::InstructionPageFault),
        ) => {
            let addr = stval::read();
            if !fix_page_fault(p, addr, e == Exception::StorePageFault) {
                crate::log_error!(
                    "page fault {e:?} in pid {}: bad addr={addr:#x} instruction={:#x}, core dumped",
                    p.pid(),
                    unsafe { p.trapframe_mut() }.epc
                );
                p.mm().lock().dump();
                proc::exit(p, -2);
            }
        }
        Trap::Exception(
            e @ (Exception::InstructionMisaligned
            | Exception::LoadMisaligned
            | Exception::StoreMisaligned),
        ) => {
            crate::log_error!(
                "{e:?} in pid {}: bad addr={:#x} instruction={:#x}, core dumped",
                p.pid(),
                stval::read(),
                unsafe { p.trapframe_mut() }.epc
            );
            proc::exit(p, -2);
        }
        Trap::Exception(Exception::IllegalInstruction) => {
            crate::log_error!("illegal instruction in pid {}, core dumped", p.pid());
            proc::exit(p, -3);
        }
        Trap::Exception(e) => {
            crate::log_error!(
                "unexpected exception {e:?} pid={} sepc={:#x} stval={:#x}",
                p.pid(),
                sepc::read(),
                stval::read()
            );
            proc::exit(p, -1);
        }
    }

    if yield_now {
        // The sole preemption point.
        proc::yield_(p);
    }

    trap_user_ret(p)
}

/// Returns to user space through the trampoline.
pub fn trap_user_ret(p: &'static Proc) -> ! {
    // About to switch trap destination back to user_vec; no interrupts
    // until the sret.
    interrupt::disable();

    let satp_val = {
        let mm = p.mm();
        let mm = mm.lock();
        mm.satp()
    };

    let tf = unsafe { p.trapframe_mut() };
    tf.kernel_satp = satp::read().bits();
    tf.kernel_sp = p.kstack_top();
    tf.kernel_trap = trap_user as usize;
    tf.kernel_hartid = cpu::id();
    debug_assert_eq!(tf.kernel_satp, kernel_vm::kernel_satp());

    unsafe {
        // sret will enter user mode with interrupts enabled.
        sstatus::set_spp(SPP::User);
        sstatus::set_spie();
        sepc::write(tf.epc);
    }

    let trampoline_ret = trampoline::user_ret_addr();
    let trampoline_vec = trampoline::user_vec_addr();
    unsafe {
        let user_ret: extern "C" fn(usize, usize, usize) -> ! = mem::transmute(trampoline_ret);
        user_ret(crate::memory::layout::TRAPFRAME, satp_val, trampoline_vec);
    }
}
