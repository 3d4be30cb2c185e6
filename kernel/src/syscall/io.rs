//! Console read/write. There is no file table; fds 0-2 are the console.

use crate::{
    console::{self, STDERR, STDIN, STDOUT},
    error::KernelError,
    proc::Proc,
};

fn ret(res: Result<usize, KernelError>) -> isize {
    match res {
        Ok(n) => n as isize,
        Err(e) => {
            crate::log_debug!("io syscall failed: {e}");
            -1
        }
    }
}

pub fn write(p: &Proc, fd: usize, va: usize, len: usize) -> isize {
    ret((|| {
        if fd != STDOUT && fd != STDERR {
            return Err(KernelError::BadFileDescriptor(fd));
        }
        console::user_write(p.mm(), va, len)
    })())
}

pub fn read(p: &Proc, fd: usize, va: usize, len: usize) -> isize {
    ret((|| {
        if fd != STDIN {
            return Err(KernelError::BadFileDescriptor(fd));
        }
        console::user_read(p.mm(), va, len)
    })())
}
