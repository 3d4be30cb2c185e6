//! Low-level driver for the 16550a UART.
//!
//! Receive is interrupt-driven and feeds the console line discipline one
//! byte at a time. Transmit is synchronous: the sender spins for THR-empty
//! with interrupts masked, so TX never sleeps and never takes an interrupt
//! mid-character.

use core::{hint, ptr, sync::atomic::{AtomicBool, Ordering}};

use crate::{
    console,
    interrupt,
    memory::layout::UART0_BASE,
    sync::SpinLock,
};

const unsafe fn reg(offset: usize) -> *mut u8 {
    unsafe { ptr::without_provenance_mut::<u8>(UART0_BASE).byte_add(offset) }
}

// The UART control registers. Some have different meanings for read vs
// write. See http://byterunner.com/16550.html

/// Receive holding register (input bytes).
const RHR: usize = 0;
/// Transmit holding register (output bytes).
const THR: usize = 0;
/// Interrupt enable register.
const IER: usize = 1;
const IER_RX_ENABLE: u8 = 1 << 0;
/// FIFO control register.
const FCR: usize = 2;
const FCR_FIFO_ENABLE: u8 = 1 << 0;
/// Clears the content of both FIFOs.
const FCR_FIFO_CLEAR: u8 = 3 << 1;
/// Line control register.
const LCR: usize = 3;
const LCR_EIGHT_BITS: u8 = 3;
/// Special mode to set the baud rate.
const LCR_BAUD_LATCH: u8 = 1 << 7;
/// Line status register.
const LSR: usize = 5;
/// Input is waiting to be read from RHR.
const LSR_RX_READY: u8 = 1 << 0;
/// THR can accept another character.
const LSR_TX_IDLE: u8 = 1 << 5;

unsafe fn read_reg(offset: usize) -> u8 {
    unsafe { reg(offset).read_volatile() }
}

unsafe fn write_reg(offset: usize, data: u8) {
    unsafe { reg(offset).write_volatile(data) }
}

static INITED: AtomicBool = AtomicBool::new(false);

/// Serializes transmit from `write()`; a leaf lock.
static TX_LOCK: SpinLock<()> = SpinLock::new(());

pub fn is_initialized() -> bool {
    INITED.load(Ordering::Acquire)
}

pub fn init() {
    unsafe {
        // disable interrupts.
        write_reg(IER, 0x00);

        // special mode to set baud rate.
        write_reg(LCR, LCR_BAUD_LATCH);

        // LSB for baud rate of 38.4K.
        write_reg(0, 0x03);

        // MSB for baud rate of 38.4K.
        write_reg(1, 0x00);

        // leave set-baud mode and set word length to 8 bits, no parity.
        write_reg(LCR, LCR_EIGHT_BITS);

        // reset and enable FIFOs.
        write_reg(FCR, FCR_FIFO_ENABLE | FCR_FIFO_CLEAR);

        // enable receive interrupts; transmit is synchronous.
        write_reg(IER, IER_RX_ENABLE);
    }
    INITED.store(true, Ordering::Release);
}

fn transmit(c: u8) {
    interrupt::with_push_off(|| {
        if console::print::PANICKED.load(Ordering::Relaxed) {
            // Another CPU is dying with the console; stay out of its way.
            loop {
                hint::spin_loop();
            }
        }

        // Wait for Transmit Holding Empty.
        while unsafe { read_reg(LSR) } & LSR_TX_IDLE == 0 {
            hint::spin_loop();
        }
        unsafe {
            write_reg(THR, c);
        }
    });
}

/// Sends one character for kernel printing and input echo.
pub fn putc_sync(c: u8) {
    transmit(c);
}

/// Sends one character on behalf of a user `write()`.
pub fn putc(c: u8) {
    let _tx = TX_LOCK.lock();
    transmit(c);
}

/// Reads one input character, if any is waiting.
fn getc() -> Option<u8> {
    if unsafe { read_reg(LSR) } & LSR_RX_READY != 0 {
        Some(unsafe { read_reg(RHR) })
    } else {
        None
    }
}

/// Drains the receive FIFO into the console, one byte at a time.
///
/// Called from the external-interrupt path.
pub fn handle_interrupt() {
    while let Some(c) = getc() {
        console::handle_input(c);
    }
}
