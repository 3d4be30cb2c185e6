//! Kernel and user memory layout.
//!
//! Physical layout (QEMU virt, OpenSBI resident below the kernel):
//!
//! ```text
//! 0x0c00_0000 -- PLIC
//! 0x1000_0000 -- UART0
//! 0x1000_1000 -- VIRTIO0 (reserved, undriven)
//! 0x8000_0000 -- start of DDR; OpenSBI firmware
//! 0x8020_0000 -- kernel image, loaded here by the firmware
//! ```
//!
//! Kernel virtual layout, high half:
//!
//! ```text
//! 0xffff_ffc0_0000_0000 -- direct mapping of physical memory (kva = pa + base)
//! 0xffff_fffd_0000_0000 -- object-pool area, pools separated by a wide gap
//! 0xffff_fffe_0000_0000 -- per-process kernel stacks, guard gap between each
//! 0xffff_ffff_8020_0000 -- kernel image (text RX, rodata R, data/bss RW)
//! 0xffff_ffff_d000_0000 -- device MMIO windows (PLIC, UART0, VIRTIO0)
//! 0xffff_ffff_ff00_0000 -- per-CPU scheduler stacks, guard gap between each
//! ```
//!
//! The user half ends at `MAXVA`; the trampoline page sits at the very top of
//! it, mapped in every address space, with the trapframe page just below.

use super::{PAGE_SIZE, PAGE_SIZE_2M, PhysAddr};
use crate::param::{NCPU, NPROC};

pub const RAM_BASE: usize = 0x8000_0000;
pub const PHYS_MEM_SIZE: usize = 64 * 1024 * 1024;
pub const RAM_END: usize = RAM_BASE + PHYS_MEM_SIZE;

pub const KERNEL_PHYS_BASE: usize = 0x8020_0000;
pub const KERNEL_VIRT_BASE: usize = 0xffff_ffff_8020_0000;
/// Distance between a kernel-image VA and its PA.
pub const KERNEL_OFFSET: usize = KERNEL_VIRT_BASE - KERNEL_PHYS_BASE;

/// Base of the direct mapping of physical memory.
pub const DIRECT_MAP_BASE: usize = 0xffff_ffc0_0000_0000;

/// Base VA of the object-pool area and the gap left between pools.
pub const ALLOCATOR_BASE: usize = 0xffff_fffd_0000_0000;
pub const ALLOCATOR_GAP: usize = 0x100_0000;

/// Kernel stacks: two pages each, spaced two stacks apart so that an
/// overflow lands in an unmapped guard hole.
pub const KERNEL_STACK_SIZE: usize = 2 * PAGE_SIZE;
pub const KERNEL_STACK_PROCS: usize = 0xffff_fffe_0000_0000;
pub const KERNEL_STACK_SCHED: usize = 0xffff_ffff_ff00_0000;

/// Kernel VA of the kernel stack mapped for process slot `i`.
pub const fn proc_stack_va(i: usize) -> usize {
    assert!(i < NPROC);
    KERNEL_STACK_PROCS + 2 * i * KERNEL_STACK_SIZE
}

/// Kernel VA of the scheduler stack for CPU `i`.
pub const fn sched_stack_va(i: usize) -> usize {
    assert!(i < NCPU);
    KERNEL_STACK_SCHED + 2 * i * KERNEL_STACK_SIZE
}

// Device MMIO windows.
pub const MMIO_BASE: usize = 0xffff_ffff_d000_0000;
pub const PLIC_BASE: usize = MMIO_BASE;
pub const PLIC_SIZE: usize = 0x400_0000;
pub const UART0_BASE: usize = PLIC_BASE + PLIC_SIZE;
pub const UART0_SIZE: usize = PAGE_SIZE;
pub const VIRTIO0_BASE: usize = UART0_BASE + UART0_SIZE;
pub const VIRTIO0_SIZE: usize = PAGE_SIZE;

pub const PLIC_PHYS: usize = 0x0c00_0000;
pub const UART0_PHYS: usize = 0x1000_0000;
pub const VIRTIO0_PHYS: usize = 0x1000_1000;

pub const UART0_IRQ: usize = 10;

// PLIC register offsets, indexed by the hart's S-mode context.
pub const fn plic_senable(hart: usize) -> usize {
    PLIC_BASE + 0x2080 + hart * 0x100
}
pub const fn plic_spriority(hart: usize) -> usize {
    PLIC_BASE + 0x20_1000 + hart * 0x2000
}
pub const fn plic_sclaim(hart: usize) -> usize {
    PLIC_BASE + 0x20_1004 + hart * 0x2000
}

// User memory layout.

/// One beyond the highest user virtual address.
///
/// `MAXVA` is one bit less than the Sv39 maximum, to avoid having to
/// sign-extend virtual addresses that have the high bit set.
pub const MAXVA: usize = 1 << (9 + 9 + 9 + 12 - 1);

/// The trampoline page, mapped at the top of every address space.
pub const TRAMPOLINE: usize = MAXVA - PAGE_SIZE;
/// The per-process trapframe page, just under the trampoline.
pub const TRAPFRAME: usize = TRAMPOLINE - PAGE_SIZE;

pub const USTACK_START: usize = 0xffff_0000;
pub const USTACK_SIZE: usize = 8 * PAGE_SIZE;

// Kernel image section bounds, defined in kernel.ld. All are image VAs.
unsafe extern "C" {
    static s_text: [u8; 0];
    static e_text: [u8; 0];
    static s_rodata: [u8; 0];
    static e_rodata: [u8; 0];
    static s_data: [u8; 0];
    static s_bss: [u8; 0];
    static e_bss: [u8; 0];
    static e_kernel: [u8; 0];
    static s_trampoline: [u8; 0];
}

pub fn text_range() -> (usize, usize) {
    unsafe { ((&raw const s_text).addr(), (&raw const e_text).addr()) }
}

pub fn rodata_range() -> (usize, usize) {
    unsafe { ((&raw const s_rodata).addr(), (&raw const e_rodata).addr()) }
}

/// `.data` through `.bss`, mapped as one writable block.
pub fn data_range() -> (usize, usize) {
    unsafe { ((&raw const s_data).addr(), (&raw const e_bss).addr()) }
}

pub fn bss_range() -> (usize, usize) {
    unsafe { ((&raw const s_bss).addr(), (&raw const e_bss).addr()) }
}

pub fn trampoline_addr() -> usize {
    unsafe { (&raw const s_trampoline).addr() }
}

/// PA one past the kernel image, rounded up to a 2 MiB boundary. The direct
/// map and the boot-time page window start here.
pub fn kernel_image_end_2m() -> PhysAddr {
    let end = unsafe { (&raw const e_kernel).addr() };
    PhysAddr::new((end - KERNEL_OFFSET + PAGE_SIZE_2M - 1) & !(PAGE_SIZE_2M - 1))
}

/// Translates a kernel-image VA (a linker symbol) to its PA.
pub fn kiva_to_pa(addr: usize) -> PhysAddr {
    PhysAddr::new(addr - KERNEL_OFFSET)
}

const _: () = {
    assert!(KERNEL_STACK_PROCS + 2 * NPROC * KERNEL_STACK_SIZE < KERNEL_VIRT_BASE);
    assert!(KERNEL_STACK_SCHED + 2 * NCPU * KERNEL_STACK_SIZE < usize::MAX);
    assert!(USTACK_START + USTACK_SIZE < TRAPFRAME);
};
