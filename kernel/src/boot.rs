//! Boot: identity-mapped entry, the pivot into the high half, and
//! secondary-hart bring-up.
//!
//! OpenSBI drops the boot hart at `_entry` in physical-address mode. A
//! boot-time page table, built at compile time from three 1 GiB leaves
//! (the identity-mapped image, the image at its high link address, and a
//! seed of the direct map), is enough to turn paging on and jump to the
//! linked addresses; `kernel_vm::init` then builds the real table and each
//! hart switches to it and moves onto its scheduler stack.
//!
//! Secondary harts are started one at a time through SBI HSM, entering at
//! `_entry_secondary` with their assigned cpuid in `a1`. Each mirrors the
//! pivot, counts itself in, and parks until the boot hart finishes
//! platform init.

use core::{
    arch::{global_asm, naked_asm},
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use crate::{
    console, cpu, interrupt,
    memory::{PAGE_SIZE, kernel_vm, layout, page, vm},
    param::NCPU,
    proc, sbi,
};

const BOOT_STACK_SLOT: usize = 2 * PAGE_SIZE;

/// Early stacks, one slot per CPU, below `s_bss` so zeroing the BSS leaves
/// them alone.
#[unsafe(link_section = ".bss.stack")]
static mut BOOT_STACK: [u8; BOOT_STACK_SLOT * NCPU] = [0; BOOT_STACK_SLOT * NCPU];

const SATP_MODE_SV39: usize = 8 << 60;

/// Number of secondary harts that have reached supervisor Rust code.
static BOOTED_CPUS: AtomicUsize = AtomicUsize::new(0);

/// Set by the boot hart once the platform (console, allocators, process
/// table, init app) is up; secondaries hold their schedulers until then.
static PLATFORM_READY: AtomicBool = AtomicBool::new(false);

#[repr(C, align(4096))]
struct BootPageTable([u64; 512]);

/// `V|R|W|X|A|D|G`: a fully-permissioned giga-leaf.
const BOOT_PTE_RWX: u64 = 0xef;
/// `V|R|W|A|D|G`: the direct-map seed carries no execute permission.
const BOOT_PTE_RW: u64 = 0xe7;

const fn giga_leaf(pa: u64, flags: u64) -> u64 {
    ((pa >> 12) << 10) | flags
}

const fn vpn2(va: usize) -> usize {
    (va >> 30) & 0x1ff
}

/// The boot-time page table. Three 1 GiB leaves, all onto the first
/// gigabyte of DDR.
static BOOT_PAGE_TABLE: BootPageTable = {
    let mut table = [0_u64; 512];
    let ram = layout::RAM_BASE as u64;
    // The identity map keeps the instructions between `csrw satp` and the
    // jump into the high half fetchable.
    table[vpn2(layout::RAM_BASE)] = giga_leaf(ram, BOOT_PTE_RWX);
    // The kernel image at its link address.
    table[vpn2(layout::KERNEL_VIRT_BASE)] = giga_leaf(ram, BOOT_PTE_RWX);
    // A seed of the direct map, for `kernel_vm::init`'s page window.
    table[vpn2(layout::DIRECT_MAP_BASE + layout::RAM_BASE)] = giga_leaf(ram, BOOT_PTE_RW);
    BootPageTable(table)
};

global_asm!(
    r"
    .section .text.entry

    # Boot hart entry, physical addresses, a0 = mhartid.
    .globl _entry
    _entry:
        la sp, {boot_stack}
        li t0, {stack_slot}
        add sp, sp, t0

        la t0, {boot_page_table}
        srli t0, t0, 12
        li t1, {satp_mode}
        or t0, t0, t1
        sfence.vma zero, zero
        csrw satp, t0
        sfence.vma zero, zero

        # relocate sp and pc into the high half
        li t1, {kernel_offset}
        add sp, sp, t1
        la t2, {boot_hart_start}
        add t2, t2, t1
        jr t2

    # Secondary hart entry via SBI HSM, a0 = mhartid, a1 = assigned cpuid.
    .globl _entry_secondary
    _entry_secondary:
        la sp, {boot_stack}
        addi t0, a1, 1
        li t1, {stack_slot}
        mul t0, t0, t1
        add sp, sp, t0

        la t0, {boot_page_table}
        srli t0, t0, 12
        li t1, {satp_mode}
        or t0, t0, t1
        sfence.vma zero, zero
        csrw satp, t0
        sfence.vma zero, zero

        li t1, {kernel_offset}
        add sp, sp, t1
        la t2, {secondary_hart_start}
        add t2, t2, t1
        jr t2

    .text
    ",
    boot_stack = sym BOOT_STACK,
    stack_slot = const BOOT_STACK_SLOT,
    boot_page_table = sym BOOT_PAGE_TABLE,
    satp_mode = const SATP_MODE_SV39,
    kernel_offset = const layout::KERNEL_OFFSET,
    boot_hart_start = sym boot_hart_start,
    secondary_hart_start = sym secondary_hart_start,
);

fn clean_bss() {
    let (start, end) = layout::bss_range();
    unsafe {
        core::ptr::with_exposed_provenance_mut::<u8>(start).write_bytes(0, end - start);
    }
}

/// Moves onto a new stack and never comes back.
#[unsafe(naked)]
unsafe extern "C" fn pivot_stack(stack_top: usize, f: extern "C" fn() -> !) -> ! {
    unsafe {
        naked_asm!("mv sp, a0", "jr a1");
    }
}

/// First Rust code on the boot hart, in the high half on the boot-time
/// page table.
extern "C" fn boot_hart_start(hartid: usize) -> ! {
    clean_bss();
    unsafe {
        cpu::set_id(0);
        cpu::getcpu(0).set_mhart_id(hartid);
    }

    crate::println!();
    crate::println!("hcore is booting on hart {hartid}");
    crate::println!();

    kernel_vm::init();
    kernel_vm::init_hart();
    interrupt::trap::init_hart();

    start_secondary_harts(hartid);

    let stack_top = cpu::current().sched_stack_top();
    unsafe { pivot_stack(stack_top, boot_platform_init) }
}

/// The rest of boot, on the boot CPU's scheduler stack.
extern "C" fn boot_platform_init() -> ! {
    console::init();
    interrupt::plic::init();
    page::init(kernel_vm::take_frame_range());
    vm::init();
    proc::init();
    proc::apps::init();
    proc::exec::load_init_app();

    PLATFORM_READY.store(true, Ordering::Release);

    interrupt::timer::init_hart();
    interrupt::plic::init_hart();

    crate::log_info!("start scheduler!");
    proc::scheduler::schedule()
}

/// Starts every other hart, one at a time, waiting for each to check in
/// before starting the next.
fn start_secondary_harts(boot_hartid: usize) {
    unsafe extern "C" {
        fn _entry_secondary();
    }
    let entry_pa = layout::kiva_to_pa(_entry_secondary as usize).addr();

    let mut cpuid = 1;
    for hartid in 0..NCPU {
        if hartid == boot_hartid || cpuid >= NCPU {
            continue;
        }
        let err = sbi::hart_start(hartid, entry_pa, cpuid);
        if err != 0 {
            crate::log_warn!("hart {hartid} failed to start: sbi error {err}");
            continue;
        }
        while BOOTED_CPUS.load(Ordering::Acquire) < cpuid {
            core::hint::spin_loop();
        }
        crate::log_info!("hart {hartid} up as cpu {cpuid}");
        cpuid += 1;
    }
}

/// First Rust code on a secondary hart, mirroring the boot hart's pivot.
extern "C" fn secondary_hart_start(hartid: usize, cpuid: usize) -> ! {
    unsafe {
        cpu::set_id(cpuid);
        cpu::getcpu(cpuid).set_mhart_id(hartid);
    }
    kernel_vm::init_hart();
    interrupt::trap::init_hart();

    BOOTED_CPUS.fetch_add(1, Ordering::Release);

    let stack_top = cpu::current().sched_stack_top();
    unsafe { pivot_stack(stack_top, secondary_main) }
}

extern "C" fn secondary_main() -> ! {
    while !PLATFORM_READY.load(Ordering::Acquire) {
        core::hint::spin_loop();
    }
    crate::log_info!("hart {} starting", cpu::current().mhart_id());

    interrupt::timer::init_hart();
    interrupt::plic::init_hart();
    proc::scheduler::schedule()
}
