//! Timer tick programming via the SBI `set_timer` call.

use riscv::register::{sie, time};

use crate::{
    param::{CPU_FREQ, TICKS_PER_SEC},
    sbi,
};

const TICK_INTERVAL: u64 = CPU_FREQ / TICKS_PER_SEC;

/// Current value of the `time` CSR.
pub fn get_cycle() -> u64 {
    time::read() as u64
}

/// Programs the next tick; also clears the pending timer interrupt.
pub fn set_next_timer() {
    sbi::set_timer(get_cycle() + TICK_INTERVAL);
}

/// Unmasks timer interrupts on this hart and asks for the first tick.
pub fn init_hart() {
    unsafe {
        sie::set_stimer();
    }
    set_next_timer();
}
