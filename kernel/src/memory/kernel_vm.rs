//! The kernel page table.
//!
//! `init` builds the one kernel table on the boot CPU, while paging still
//! runs on the boot-time table; `init_hart` points each hart's `satp` at it.
//! Page-table pages allocated before the frame allocator exists come from a
//! bump window at the start of the direct map, right after the kernel image;
//! whatever the window did not use is handed to the frame allocator.

use core::ops::Range;

use riscv::{asm, register::satp};

use super::{
    PAGE_SIZE, PAGE_SIZE_2M, PageRound as _, PhysAddr,
    layout::{
        self, DIRECT_MAP_BASE, KERNEL_STACK_SIZE, PLIC_BASE, PLIC_PHYS, PLIC_SIZE, RAM_END,
        TRAMPOLINE, UART0_BASE, UART0_PHYS, UART0_SIZE, VIRTIO0_BASE, VIRTIO0_PHYS, VIRTIO0_SIZE,
    },
    page,
    page_table::{PageTable, PtEntry, PtEntryFlags, entry_index, make_satp},
};
use crate::{
    cpu,
    param::NCPU,
    sync::{Once, SpinLock},
};

static KVM: Once<SpinLock<KernelVm>> = Once::new();

/// The kernel `satp` value, cached so the trap-return path never takes the
/// table lock.
static KERNEL_SATP: Once<usize> = Once::new();

struct KernelVm {
    root: PhysAddr,
    /// Bump window for early table pages, in direct-map KVAs.
    window_next: usize,
    window_end: usize,
}

impl KernelVm {
    /// One zeroed page for a table, from the frame allocator once it is up,
    /// from the boot window before that.
    fn alloc_kernel_page(&mut self) -> PhysAddr {
        if page::is_initialized() {
            return page::alloc_zeroed_page().expect("out of frames for kernel page table");
        }

        assert!(self.window_next < self.window_end, "boot page window exhausted");
        assert!(self.window_next.is_page_aligned());
        let kva = self.window_next;
        self.window_next += PAGE_SIZE;

        let pa = PhysAddr::new(kva - DIRECT_MAP_BASE);
        unsafe {
            pa.as_kva_ptr::<u8>().write_bytes(0, PAGE_SIZE);
        }
        pa
    }

    /// Installs the mapping `[va, va+size) -> [pa, pa+size)`.
    ///
    /// Uses a 2 MiB leaf whenever `va`, `pa` and the remaining size allow
    /// one. Panics if any page in the range is already mapped, or if the
    /// range would cross an existing leaf.
    fn map(&mut self, va: usize, pa: PhysAddr, size: usize, perm: PtEntryFlags) {
        assert!(va.is_page_aligned(), "va={va:#x}");
        assert!(pa.is_page_aligned(), "pa={pa:#x}");
        assert!(size.is_page_aligned() && size > 0, "size={size:#x}");

        let mut va = va;
        let mut pa = pa;
        let end = va + size;

        while va < end {
            let root = unsafe { PageTable::from_pa(self.root) };
            let l2e = &mut root.0[entry_index(2, va)];
            let l1_pa = if l2e.is_valid() {
                assert!(l2e.is_table(), "va {va:#x} already mapped at level 2");
                l2e.phys_addr()
            } else {
                let pt = self.alloc_kernel_page();
                *l2e = PtEntry::new(pt, PtEntryFlags::V);
                pt
            };

            let l1 = unsafe { PageTable::from_pa(l1_pa) };
            let l1e = &mut l1.0[entry_index(1, va)];
            if !l1e.is_valid()
                && va % PAGE_SIZE_2M == 0
                && pa.addr() % PAGE_SIZE_2M == 0
                && end - va >= PAGE_SIZE_2M
            {
                *l1e = PtEntry::new(pa, perm | PtEntryFlags::V);
                va += PAGE_SIZE_2M;
                pa = pa.byte_add(PAGE_SIZE_2M);
                continue;
            }
            let l0_pa = if l1e.is_valid() {
                assert!(l1e.is_table(), "va {va:#x} already mapped at level 1");
                l1e.phys_addr()
            } else {
                let pt = self.alloc_kernel_page();
                *l1e = PtEntry::new(pt, PtEntryFlags::V);
                pt
            };

            let l0 = unsafe { PageTable::from_pa(l0_pa) };
            let l0e = &mut l0.0[entry_index(0, va)];
            assert!(!l0e.is_valid(), "va {va:#x} already mapped at level 0");
            *l0e = PtEntry::new(pa, perm | PtEntryFlags::V);
            va += PAGE_SIZE;
            pa = pa.byte_add(PAGE_SIZE);
        }
    }
}

/// Builds the kernel page table.
///
/// Five concerns, in order: the kernel image with split permissions, the
/// trampoline page, the device MMIO windows, one scheduler stack per CPU,
/// and the direct map of all RAM past the image. `A`/`D` are pre-set on
/// every kernel mapping so hardware that faults to maintain them never
/// faults inside the kernel.
pub fn init() {
    use PtEntryFlags as F;

    let window_base = layout::kernel_image_end_2m().to_kva();
    let mut vm = KernelVm {
        root: PhysAddr::new(0),
        window_next: window_base,
        window_end: window_base + PAGE_SIZE_2M,
    };
    vm.root = vm.alloc_kernel_page();
    crate::log_info!("boot page window: [{:#x}, {:#x})", window_base, vm.window_end);

    let g_rx = F::A.union(F::RX).union(F::G);
    let g_ro = F::A.union(F::R).union(F::G);
    let g_rw = F::AD.union(F::RW).union(F::G);

    // Kernel image: .text RX, .rodata R, .data/.bss RW.
    let (s_text, e_text) = layout::text_range();
    vm.map(s_text, layout::kiva_to_pa(s_text), e_text - s_text, g_rx);
    let (s_rodata, e_rodata) = layout::rodata_range();
    vm.map(s_rodata, layout::kiva_to_pa(s_rodata), e_rodata - s_rodata, g_ro);
    let (s_data, e_bss) = layout::data_range();
    vm.map(s_data, layout::kiva_to_pa(s_data), e_bss - s_data, g_rw);

    // Trampoline, at the top of the user half; not global, it also exists
    // in every user table.
    vm.map(
        TRAMPOLINE,
        layout::kiva_to_pa(layout::trampoline_addr()),
        PAGE_SIZE,
        F::A.union(F::RX),
    );

    // Device MMIO windows.
    vm.map(PLIC_BASE, PhysAddr::new(PLIC_PHYS), PLIC_SIZE, g_rw);
    vm.map(UART0_BASE, PhysAddr::new(UART0_PHYS), UART0_SIZE, g_rw);
    vm.map(VIRTIO0_BASE, PhysAddr::new(VIRTIO0_PHYS), VIRTIO0_SIZE, g_rw);

    // Scheduler stacks, one per CPU, a stack-sized hole between them.
    for i in 0..NCPU {
        let va = layout::sched_stack_va(i);
        for page_va in (va..va + KERNEL_STACK_SIZE).step_by(PAGE_SIZE) {
            let frame = vm.alloc_kernel_page();
            vm.map(page_va, frame, PAGE_SIZE, g_rw);
        }
        unsafe {
            cpu::getcpu(i).set_sched_stack_top(va + KERNEL_STACK_SIZE);
        }
    }

    // Direct map of all RAM past the image, 2 MiB leaves.
    let direct_pa = layout::kernel_image_end_2m();
    vm.map(
        DIRECT_MAP_BASE + direct_pa.addr(),
        direct_pa,
        RAM_END - direct_pa.addr(),
        g_rw,
    );

    KERNEL_SATP.init(make_satp(vm.root));
    KVM.init(SpinLock::new(vm));
}

/// Switches this hart to the kernel page table.
pub fn init_hart() {
    let root = KVM.get().lock().root;
    asm::sfence_vma_all();
    unsafe {
        satp::set(satp::Mode::Sv39, 0, root.phys_page_num().value());
    }
    asm::sfence_vma_all();
}

/// The `satp` value of the kernel page table, for trapframes.
pub fn kernel_satp() -> usize {
    *KERNEL_SATP.get()
}

/// Frames between the boot window's cursor and the end of RAM; the frame
/// allocator takes ownership of these. Call once.
pub fn take_frame_range() -> Range<*mut u8> {
    let mut vm = KVM.get().lock();
    let start = vm.window_next.page_roundup();
    // The rest of the window must come from the frame allocator now.
    vm.window_next = vm.window_end;
    let start_ptr: *mut u8 = core::ptr::with_exposed_provenance_mut(start);
    let end_ptr: *mut u8 = core::ptr::with_exposed_provenance_mut(DIRECT_MAP_BASE + RAM_END);
    start_ptr..end_ptr
}

/// Maps the kernel stack for process slot `i` and returns its top.
pub fn map_proc_stack(i: usize) -> usize {
    let va = layout::proc_stack_va(i);
    let mut vm = KVM.get().lock();
    for page_va in (va..va + KERNEL_STACK_SIZE).step_by(PAGE_SIZE) {
        let frame = page::alloc_zeroed_page().expect("out of frames for kernel stacks");
        vm.map(
            page_va,
            frame,
            PAGE_SIZE,
            PtEntryFlags::AD.union(PtEntryFlags::RW).union(PtEntryFlags::G),
        );
    }
    va + KERNEL_STACK_SIZE
}

/// Backs `[va, va + npages * PAGE_SIZE)` with fresh zeroed frames for an
/// object pool.
pub fn map_pool_pages(va: usize, npages: usize) {
    let mut vm = KVM.get().lock();
    for i in 0..npages {
        let frame = page::alloc_zeroed_page().expect("out of frames for object pools");
        vm.map(
            va + i * PAGE_SIZE,
            frame,
            PAGE_SIZE,
            PtEntryFlags::AD.union(PtEntryFlags::RW).union(PtEntryFlags::G),
        );
    }
}
