//! Process-model system calls.

use arrayvec::ArrayVec;

use crate::{
    param::MAX_STR_LEN,
    proc::{self, Proc, exec, wait_lock},
};

pub fn exit(p: &'static Proc, code: i32) -> ! {
    proc::exit(p, code)
}

pub fn sched_yield(p: &'static Proc) -> isize {
    proc::yield_(p);
    0
}

pub fn getpid(p: &Proc) -> isize {
    p.pid() as isize
}

/// The parent's pid, or 0 for a parentless process.
pub fn getppid(p: &Proc) -> isize {
    let guard = wait_lock::lock();
    let ppid = p.parent(&guard).map_or(0, |parent| parent.pid() as isize);
    drop(guard);
    ppid
}

pub fn clone(p: &'static Proc) -> isize {
    match proc::fork(p) {
        Ok(pid) => pid as isize,
        Err(e) => {
            crate::log_warn!("fork failed: {e}");
            -1
        }
    }
}

pub fn execve(p: &'static Proc, name_va: usize) -> isize {
    let mut buf = [0_u8; MAX_STR_LEN];
    let copied = match p.mm().lock().copy_str_from_user(&mut buf, name_va) {
        Ok(n) => n,
        Err(_) => return -1,
    };
    let name_bytes: ArrayVec<u8, MAX_STR_LEN> = buf[..copied]
        .iter()
        .copied()
        .take_while(|&b| b != 0)
        .collect();
    let Ok(name) = core::str::from_utf8(&name_bytes) else {
        return -1;
    };

    match exec::exec(p, name) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

pub fn wait4(p: &'static Proc, pid: isize, status_va: usize) -> isize {
    match proc::wait(p, pid, status_va) {
        Ok(child) => child as isize,
        Err(_) => -1,
    }
}
