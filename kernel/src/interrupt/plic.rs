//! The RISC-V platform-level interrupt controller (PLIC).
//!
//! Register indexing uses the machine hartid, not the logical cpuid; the
//! S-mode context of hart `h` is assumed to be `2h + 1`, which the offsets
//! below bake in.

use core::ptr;

use riscv::register::sie;

use crate::{
    cpu,
    memory::layout::{PLIC_BASE, UART0_IRQ, plic_sclaim, plic_senable, plic_spriority},
};

/// Makes the UART0 interrupt eligible for delivery (priority non-zero).
pub fn init() {
    unsafe {
        ptr::without_provenance_mut::<u32>(PLIC_BASE + UART0_IRQ * 4).write_volatile(1);
    }
}

/// Routes UART0 to this hart's S-mode context and unmasks external
/// interrupts in `sie`.
pub fn init_hart() {
    let hart = cpu::current().mhart_id();

    unsafe {
        // set the enable bit for this hart's S-mode for the uart.
        ptr::without_provenance_mut::<u32>(plic_senable(hart)).write_volatile(1 << UART0_IRQ);

        // accept any priority.
        ptr::without_provenance_mut::<u32>(plic_spriority(hart)).write_volatile(0);

        sie::set_sext();
    }
}

/// Asks the PLIC which interrupt to serve. 0 means none.
pub fn claim() -> usize {
    let hart = cpu::current().mhart_id();
    let irq = unsafe { ptr::without_provenance_mut::<u32>(plic_sclaim(hart)).read_volatile() };
    irq as usize
}

/// Tells the PLIC the interrupt has been served.
pub fn complete(irq: usize) {
    let hart = cpu::current().mhart_id();
    unsafe {
        ptr::without_provenance_mut::<u32>(plic_sclaim(hart)).write_volatile(irq as u32);
    }
}
