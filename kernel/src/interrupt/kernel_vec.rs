//! The kernel-mode trap vector.
//!
//! Interrupts and exceptions taken while in supervisor mode land here, on
//! whatever kernel stack is current. All 31 general registers are pushed so
//! the handler can dump them if the trap turns out to be fatal.

use core::{arch::naked_asm, mem::offset_of};

use super::trap::{self, KTrapFrame};

const KTF_SIZE: usize = 256;

const _: () = assert!(size_of::<KTrapFrame>() <= KTF_SIZE);

#[unsafe(naked)]
#[rustc_align(4)]
pub extern "C" fn kernel_vec() {
    unsafe {
        naked_asm!(
            // make room for the trap frame.
            "addi sp, sp, -{ktf_size}",

            "sd ra, {ktf_ra}(sp)",
            "sd gp, {ktf_gp}(sp)",
            "sd tp, {ktf_tp}(sp)",
            "sd t0, {ktf_t0}(sp)",
            "sd t1, {ktf_t1}(sp)",
            "sd t2, {ktf_t2}(sp)",
            "sd s0, {ktf_s0}(sp)",
            "sd s1, {ktf_s1}(sp)",
            "sd a0, {ktf_a0}(sp)",
            "sd a1, {ktf_a1}(sp)",
            "sd a2, {ktf_a2}(sp)",
            "sd a3, {ktf_a3}(sp)",
            "sd a4, {ktf_a4}(sp)",
            "sd a5, {ktf_a5}(sp)",
            "sd a6, {ktf_a6}(sp)",
            "sd a7, {ktf_a7}(sp)",
            "sd s2, {ktf_s2}(sp)",
            "sd s3, {ktf_s3}(sp)",
            "sd s4, {ktf_s4}(sp)",
            "sd s5, {ktf_s5}(sp)",
            "sd s6, {ktf_s6}(sp)",
            "sd s7, {ktf_s7}(sp)",
            "sd s8, {ktf_s8}(sp)",
            "sd s9, {ktf_s9}(sp)",
            "sd s10, {ktf_s10}(sp)",
            "sd s11, {ktf_s11}(sp)",
            "sd t3, {ktf_t3}(sp)",
            "sd t4, {ktf_t4}(sp)",
            "sd t5, {ktf_t5}(sp)",
            "sd t6, {ktf_t6}(sp)",
            // the pre-trap sp, for the register dump.
            "addi t0, sp, {ktf_size}",
            "sd t0, {ktf_sp}(sp)",

            "mv a0, sp",
            "call {trap_kernel}",

            "ld ra, {ktf_ra}(sp)",
            "ld gp, {ktf_gp}(sp)",
            // not tp: it holds this CPU's id.
            "ld t0, {ktf_t0}(sp)",
            "ld t1, {ktf_t1}(sp)",
            "ld t2, {ktf_t2}(sp)",
            "ld s0, {ktf_s0}(sp)",
            "ld s1, {ktf_s1}(sp)",
            "ld a0, {ktf_a0}(sp)",
            "ld a1, {ktf_a1}(sp)",
            "ld a2, {ktf_a2}(sp)",
            "ld a3, {ktf_a3}(sp)",
            "ld a4, {ktf_a4}(sp)",
            "ld a5, {ktf_a5}(sp)",
            "ld a6, {ktf_a6}(sp)",
            "ld a7, {ktf_a7}(sp)",
            "ld s2, {ktf_s2}(sp)",
            "ld s3, {ktf_s3}(sp)",
            "ld s4, {ktf_s4}(sp)",
            "ld s5, {ktf_s5}(sp)",
            "ld s6, {ktf_s6}(sp)",
            "ld s7, {ktf_s7}(sp)",
            "ld s8, {ktf_s8}(sp)",
            "ld s9, {ktf_s9}(sp)",
            "ld s10, {ktf_s10}(sp)",
            "ld s11, {ktf_s11}(sp)",
            "ld t3, {ktf_t3}(sp)",
            "ld t4, {ktf_t4}(sp)",
            "ld t5, {ktf_t5}(sp)",
            "ld t6, {ktf_t6}(sp)",

            "addi sp, sp, {ktf_size}",

            // back to whatever the kernel was doing.
            "sret",
            ktf_size = const KTF_SIZE,
            trap_kernel = sym trap::trap_kernel,
            ktf_ra = const offset_of!(KTrapFrame, ra),
            ktf_sp = const offset_of!(KTrapFrame, sp),
            ktf_gp = const offset_of!(KTrapFrame, gp),
            ktf_tp = const offset_of!(KTrapFrame, tp),
            ktf_t0 = const offset_of!(KTrapFrame, t0),
            ktf_t1 = const offset_of!(KTrapFrame, t1),
            ktf_t2 = const offset_of!(KTrapFrame, t2),
            ktf_s0 = const offset_of!(KTrapFrame, s0),
            ktf_s1 = const offset_of!(KTrapFrame, s1),
            ktf_a0 = const offset_of!(KTrapFrame, a0),
            ktf_a1 = const offset_of!(KTrapFrame, a1),
            ktf_a2 = const offset_of!(KTrapFrame, a2),
            ktf_a3 = const offset_of!(KTrapFrame, a3),
            ktf_a4 = const offset_of!(KTrapFrame, a4),
            ktf_a5 = const offset_of!(KTrapFrame, a5),
            ktf_a6 = const offset_of!(KTrapFrame, a6),
            ktf_a7 = const offset_of!(KTrapFrame, a7),
            ktf_s2 = const offset_of!(KTrapFrame, s2),
            ktf_s3 = const offset_of!(KTrapFrame, s3),
            ktf_s4 = const offset_of!(KTrapFrame, s4),
            ktf_s5 = const offset_of!(KTrapFrame, s5),
            ktf_s6 = const offset_of!(KTrapFrame, s6),
            ktf_s7 = const offset_of!(KTrapFrame, s7),
            ktf_s8 = const offset_of!(KTrapFrame, s8),
            ktf_s9 = const offset_of!(KTrapFrame, s9),
            ktf_s10 = const offset_of!(KTrapFrame, s10),
            ktf_s11 = const offset_of!(KTrapFrame, s11),
            ktf_t3 = const offset_of!(KTrapFrame, t3),
            ktf_t4 = const offset_of!(KTrapFrame, t4),
            ktf_t5 = const offset_of!(KTrapFrame, t5),
            ktf_t6 = const offset_of!(KTrapFrame, t6),
        )
    }
}
