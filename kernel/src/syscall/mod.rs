//! The system call multiplexer.
//!
//! Arguments arrive in `a0..a5`, the call number in `a7`, and the result
//! goes back in `a0`. Unknown numbers and failed calls return -1; faults on
//! user buffers are reported the same way, never by killing the caller.

use strum::FromRepr;

use crate::proc::Proc;

mod io;
mod process;
mod system;

/// System call numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(usize)]
pub enum SyscallCode {
    Read = 63,
    Write = 64,
    Exit = 93,
    SchedYield = 124,
    SetPriority = 140,
    GetTimeOfDay = 169,
    GetPid = 172,
    GetPPid = 173,
    Sbrk = 214,
    Clone = 220,
    Execve = 221,
    Wait4 = 260,
    Spawn = 400,
}

/// Dispatches the system call the current process trapped in with.
pub fn syscall(p: &'static Proc) {
    let tf = unsafe { p.trapframe_mut() };
    let n = tf.a7;
    let args = [tf.a0, tf.a1, tf.a2, tf.a3, tf.a4, tf.a5];

    let ret: isize = match SyscallCode::from_repr(n) {
        Some(SyscallCode::Read) => io::read(p, args[0], args[1], args[2]),
        Some(SyscallCode::Write) => io::write(p, args[0], args[1], args[2]),
        Some(SyscallCode::Exit) => process::exit(p, args[0] as i32),
        Some(SyscallCode::SchedYield) => process::sched_yield(p),
        Some(SyscallCode::GetTimeOfDay) => system::get_time_of_day(p, args[0]),
        Some(SyscallCode::GetPid) => process::getpid(p),
        Some(SyscallCode::GetPPid) => process::getppid(p),
        Some(SyscallCode::Clone) => process::clone(p),
        Some(SyscallCode::Execve) => process::execve(p, args[0]),
        Some(SyscallCode::Wait4) => process::wait4(p, args[0] as isize, args[1]),
        // Stubs: recognized but not implemented.
        Some(SyscallCode::Spawn | SyscallCode::SetPriority | SyscallCode::Sbrk) => -1,
        None => {
            crate::log_error!("unknown syscall {n} from pid {}", p.pid());
            -1
        }
    };

    unsafe {
        p.trapframe_mut().a0 = ret as usize;
    }
}
