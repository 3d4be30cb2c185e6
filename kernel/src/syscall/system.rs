//! Clock and machine queries.

use dataview::{Pod, PodMethods as _};

use crate::{interrupt::timer, param::CPU_FREQ, proc::Proc};

#[repr(C)]
#[derive(Clone, Copy, Pod)]
struct TimeVal {
    sec: u64,
    usec: u64,
}

/// Wall-clock time derived from the cycle counter.
pub fn get_time_of_day(p: &Proc, tv_va: usize) -> isize {
    let cycle = timer::get_cycle();
    let tv = TimeVal {
        sec: cycle / CPU_FREQ,
        usec: (cycle % CPU_FREQ) * 1_000_000 / CPU_FREQ,
    };
    match p.mm().lock().copy_to_user(tv_va, tv.as_bytes()) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}
