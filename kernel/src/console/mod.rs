//! Console input and output.
//!
//! Reads are a line at a time. Special input characters:
//!
//! * newline -- end of line
//! * control-h / delete -- backspace
//! * control-u -- kill line
//! * control-d -- end of file
//! * control-p -- reserved (consumed, not stored)
//!
//! There is no file descriptor table; the console is the only device and
//! serves fds 0, 1 and 2 directly.

use line_ring::{CTRL_D, Input, LineRing};

use crate::{
    error::KernelError,
    memory::vm::MmRef,
    proc,
    sbi,
    sync::SpinLock,
};

pub mod print;
pub mod uart;

const INPUT_BUF_SIZE: usize = 128;

pub const STDIN: usize = 0;
pub const STDOUT: usize = 1;
pub const STDERR: usize = 2;

static CONS: SpinLock<LineRing<INPUT_BUF_SIZE>> = SpinLock::new(LineRing::new());

/// The channel console readers sleep on.
fn read_chan() -> usize {
    proc::chan_of(&CONS)
}

pub fn init() {
    uart::init();
}

/// Sends one character to the console.
///
/// Used by `print!` and input echo, not by `write()`. Falls back to the
/// SBI console before the UART is mapped and after a panic.
pub fn put_char(c: u8) {
    if print::PANICKED.load(core::sync::atomic::Ordering::Relaxed) || !uart::is_initialized() {
        sbi::console_putchar(c);
    } else {
        uart::putc_sync(c);
    }
}

/// Echoes a destructive backspace.
fn put_backspace() {
    put_char(0x08);
    put_char(b' ');
    put_char(0x08);
}

/// Feeds one byte of UART input through the line discipline: echo, edit,
/// and wake readers when a line (or EOF) is complete.
pub fn handle_input(c: u8) {
    let mut cons = CONS.lock();
    match cons.push(c) {
        Input::Ignored => {}
        Input::Erased { count } => {
            for _ in 0..count {
                put_backspace();
            }
        }
        Input::Stored { echo, complete } => {
            put_char(echo);
            if complete {
                proc::wakeup(read_chan());
            }
        }
    }
}

/// Copies up to `n` bytes of console input to user memory at `dst_va`.
///
/// Blocks until at least one line (or EOF) is available. Returns early at
/// end of line; an EOF read with no bytes consumed yet returns 0.
pub fn user_read(mm: MmRef, dst_va: usize, n: usize) -> Result<usize, KernelError> {
    let target = n;
    let mut dst_va = dst_va;
    let mut n = n;

    let mut cons = CONS.lock();
    while n > 0 {
        // Wait until the interrupt handler has published some input.
        while cons.is_drained() {
            cons = proc::sleep(read_chan(), cons);
        }

        let c = cons.pop().unwrap();

        if c == CTRL_D {
            if n < target {
                // Save the EOF for the next read, so that this caller gets
                // its partial line and the next read returns 0 bytes.
                cons.unpop();
            }
            break;
        }

        // The console lock is a leaf: drop it before touching the user's
        // address space.
        drop(cons);
        if mm.lock().copy_to_user(dst_va, &[c]).is_err() {
            return Ok(target - n);
        }
        dst_va += 1;
        n -= 1;

        if c == b'\n' {
            // A whole line has arrived; return to the user-level read().
            return Ok(target - n);
        }
        cons = CONS.lock();
    }

    Ok(target - n)
}

/// Writes `n` bytes from user memory at `src_va` to the UART.
///
/// Fails without output if any source byte is unmapped.
pub fn user_write(mm: MmRef, src_va: usize, n: usize) -> Result<usize, KernelError> {
    let mut buf = [0_u8; 128];
    let mut src_va = src_va;
    let mut remaining = n;

    while remaining > 0 {
        let chunk = usize::min(remaining, buf.len());
        mm.lock().copy_from_user(&mut buf[..chunk], src_va)?;
        for &c in &buf[..chunk] {
            uart::putc(c);
        }
        src_va += chunk;
        remaining -= chunk;
    }
    Ok(n)
}
