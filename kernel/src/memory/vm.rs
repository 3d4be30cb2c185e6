//! Per-process address spaces.
//!
//! An `mm` owns an Sv39 root table and a singly linked list of VMAs. VMAs
//! are page-aligned, half-open ranges that never overlap within one `mm`;
//! mapping a VMA allocates a fresh frame per page. `fork` clones every VMA
//! and byte-copies the backing frames through the direct map; there is no
//! copy-on-write.
//!
//! `mm` and `vma` objects live in their own pools. Both are only touched
//! under the owning `mm`'s lock.

use core::ptr::NonNull;

use riscv::asm;

use super::{
    PAGE_SIZE, PageRound as _, PhysAddr, VirtAddr,
    layout::MAXVA,
    page,
    page_table::{PageTable, PtEntry, PtEntryFlags, entry_index},
    pool::Pool,
};
use crate::{
    error::KernelError,
    param::{NMM, NVMA},
    sync::{SpinLock, SpinLockGuard},
};

static MM_POOL: Pool<Mm> = Pool::new("mm");
static VMA_POOL: Pool<Vma> = Pool::new("vma");

/// Arms the `mm` and `vma` pools. Called once at boot, after the frame
/// allocator is up.
pub fn init() {
    MM_POOL.init(NMM);
    VMA_POOL.init(NVMA);
}

/// A virtual memory area: one contiguous, uniformly-permissioned mapping.
pub struct Vma {
    owner: Option<MmRef>,
    next: Option<VmaRef>,
    pub vm_start: usize,
    pub vm_end: usize,
    pub pte_flags: PtEntryFlags,
}

/// Handle to a pool-allocated [`Vma`].
///
/// The pointee is only dereferenced while the owning `mm`'s lock is held.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct VmaRef(NonNull<Vma>);

unsafe impl Send for VmaRef {}

impl VmaRef {
    /// # Safety
    ///
    /// Caller must hold the owning `mm`'s lock.
    unsafe fn get<'a>(self) -> &'a mut Vma {
        unsafe { &mut *self.0.as_ptr() }
    }

}

pub struct Mm {
    data: SpinLock<MmData>,
}

/// Handle to a pool-allocated [`Mm`].
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct MmRef(NonNull<Mm>);

unsafe impl Send for MmRef {}

impl MmRef {
    pub fn lock(self) -> SpinLockGuard<'static, MmData> {
        unsafe { self.0.as_ref() }.data.lock()
    }
}

pub struct MmData {
    /// Root page-table frame.
    pgt: PhysAddr,
    vma_head: Option<VmaRef>,
    refcnt: usize,
}

/// Creates an empty address space with a fresh root table.
pub fn create_mm() -> Result<MmRef, KernelError> {
    let pgt = page::alloc_zeroed_page()?;
    let slot = match MM_POOL.alloc_zeroed() {
        Ok(slot) => slot,
        Err(e) => {
            unsafe { page::free_page(pgt) };
            return Err(e);
        }
    };
    unsafe {
        slot.write(Mm {
            data: SpinLock::new(MmData {
                pgt,
                vma_head: None,
                refcnt: 1,
            }),
        });
    }
    Ok(MmRef(slot))
}

/// Tears the address space down: every VMA, every frame, the page tables,
/// and finally the `mm` object itself.
///
/// # Safety
///
/// No other reference to `mm` may remain in use.
pub unsafe fn free_mm(mm: MmRef) {
    let refcnt = {
        let mut data = mm.lock();
        data.free_pages();
        data.free_tables();
        unsafe { page::free_page(data.pgt) };
        data.refcnt -= 1;
        data.refcnt
    };
    if refcnt == 0 {
        unsafe { MM_POOL.free(mm.0) };
    }
}

impl MmData {
    /// `satp` for this address space.
    pub fn satp(&self) -> usize {
        super::page_table::make_satp(self.pgt)
    }

    /// Returns the L0 PTE for `va`, building missing intermediate tables
    /// when `alloc` is set.
    pub fn walk(&mut self, va: VirtAddr, alloc: bool) -> Result<&mut PtEntry, KernelError> {
        assert!(va.addr() < MAXVA, "invalid user VA");

        let mut table = unsafe { PageTable::from_pa(self.pgt) };
        for level in (1..=2).rev() {
            let pte = &mut table.0[entry_index(level, va.addr())];
            if pte.is_valid() {
                table = unsafe { PageTable::from_pa(pte.phys_addr()) };
            } else {
                if !alloc {
                    return Err(KernelError::AddressNotMapped(va));
                }
                let new_table = page::alloc_zeroed_page()?;
                *pte = PtEntry::new(new_table, PtEntryFlags::V);
                table = unsafe { PageTable::from_pa(new_table) };
            }
        }
        Ok(&mut table.0[entry_index(0, va.addr())])
    }

    /// Looks up a page-aligned user VA, returning the mapped frame.
    ///
    /// Only resolves user-accessible pages.
    pub fn walk_addr(&mut self, va: VirtAddr) -> Result<PhysAddr, KernelError> {
        assert!(va.is_page_aligned(), "unaligned va {va:#x}");

        let pte = *self.walk(va, false)?;
        if !pte.is_valid() {
            return Err(KernelError::AddressNotMapped(va));
        }
        if !pte.flags().contains(PtEntryFlags::U) {
            crate::log_warn!("walk_addr hit a kernel-only pte: va={va:#x}");
            return Err(KernelError::InaccessibleMemory(va));
        }
        Ok(pte.phys_addr())
    }

    /// Allocates an unlinked VMA object describing `[start, end)`.
    pub fn create_vma(
        &mut self,
        owner: MmRef,
        start: usize,
        end: usize,
        pte_flags: PtEntryFlags,
    ) -> Result<VmaRef, KernelError> {
        let slot = VMA_POOL.alloc_zeroed()?;
        unsafe {
            slot.write(Vma {
                owner: Some(owner),
                next: None,
                vm_start: start,
                vm_end: end,
                pte_flags,
            });
        }
        Ok(VmaRef(slot))
    }

    /// Maps every page of `vma` to a freshly allocated frame and links the
    /// VMA into this address space.
    ///
    /// The new frames keep their allocation poison; callers that need zeroed
    /// or initialised memory overwrite them afterwards.
    pub fn map_vma(&mut self, vma: VmaRef) -> Result<(), KernelError> {
        let (start, end, flags) = {
            let v = unsafe { vma.get() };
            (v.vm_start, v.vm_end, v.pte_flags)
        };
        assert!(start < MAXVA && end <= MAXVA, "user mapping beyond the top");
        assert!(start.is_page_aligned() && end.is_page_aligned());
        assert!(
            flags.intersects(PtEntryFlags::RWX),
            "vma without R/W/X: {flags:?}"
        );

        for va in (start..end).step_by(PAGE_SIZE) {
            let va = VirtAddr::new(va)?;
            let pte = self.walk(va, true)?;
            if pte.is_valid() {
                crate::log_warn!("remap at {va:#x}");
                return Err(KernelError::Remap(va));
            }
            let frame = page::alloc_page()?;
            *pte = PtEntry::new(frame, flags | PtEntryFlags::V);
        }
        asm::sfence_vma_all();

        let head = self.vma_head.take();
        unsafe { vma.get() }.next = head;
        self.vma_head = Some(vma);
        Ok(())
    }

    /// Maps one page at `va` to an already-owned frame (trampoline or
    /// trapframe). Returns the VMA, linked in only when `link` is set.
    pub fn map_fixed(
        &mut self,
        owner: MmRef,
        va: usize,
        pa: PhysAddr,
        pte_flags: PtEntryFlags,
        link: bool,
    ) -> Result<VmaRef, KernelError> {
        let vma = self.create_vma(owner, va, va + PAGE_SIZE, pte_flags)?;
        let va = VirtAddr::new(va)?;
        let pte = self.walk(va, true)?;
        if pte.is_valid() {
            crate::log_warn!("remap at {va:#x}");
            unsafe { VMA_POOL.free(vma.0) };
            return Err(KernelError::Remap(va));
        }
        *pte = PtEntry::new(pa, pte_flags | PtEntryFlags::V);
        asm::sfence_vma_all();

        if link {
            let head = self.vma_head.take();
            unsafe { vma.get() }.next = head;
            self.vma_head = Some(vma);
        }
        Ok(vma)
    }

    /// Clears the PTEs of `vma`, optionally freeing the backing frames, and
    /// releases the VMA object. The VMA must not be on this mm's list.
    pub fn unmap_vma(&mut self, vma: VmaRef, free_frames: bool) {
        self.clear_vma_ptes(vma, free_frames);
        unsafe { VMA_POOL.free(vma.0) };
    }

    fn clear_vma_ptes(&mut self, vma: VmaRef, free_frames: bool) {
        let (start, end) = {
            let v = unsafe { vma.get() };
            assert!(v.owner.is_some(), "vma without an owner");
            assert!(v.vm_start.is_page_aligned() && v.vm_end.is_page_aligned());
            (v.vm_start, v.vm_end)
        };
        for va in (start..end).step_by(PAGE_SIZE) {
            let va = VirtAddr::new(va).unwrap();
            match self.walk(va, false) {
                Err(_) => crate::log_warn!("unmap of unmapped address {va:#x}"),
                Ok(pte) => {
                    let pa = pte.phys_addr();
                    pte.clear();
                    if free_frames {
                        unsafe { page::free_page(pa) };
                    }
                }
            }
        }
        asm::sfence_vma_all();
    }

    /// Unmaps and frees every linked VMA and its frames. The page tables
    /// and any fixed (unlinked) mappings survive; `exec` relies on that.
    pub fn free_pages(&mut self) {
        let mut cur = self.vma_head.take();
        while let Some(vma) = cur {
            cur = unsafe { vma.get() }.next;
            self.unmap_vma(vma, true);
        }
    }

    /// Frees all L1/L0 table pages. Leaf mappings must already be gone
    /// (fixed mappings excepted: their PTEs are cleared by the caller
    /// beforehand).
    fn free_tables(&mut self) {
        let root = unsafe { PageTable::from_pa(self.pgt) };
        for l2e in &mut root.0 {
            if !l2e.is_table() {
                continue;
            }
            let l1 = unsafe { PageTable::from_pa(l2e.phys_addr()) };
            for l1e in &mut l1.0 {
                if l1e.is_table() {
                    unsafe { page::free_page(l1e.phys_addr()) };
                }
            }
            unsafe { page::free_page(l2e.phys_addr()) };
            l2e.clear();
        }
    }

    /// Clones every linked VMA of `self` into `target`: same ranges, same
    /// flags, new frames, contents copied byte for byte. The fork path.
    pub fn clone_into(&mut self, target_ref: MmRef, target: &mut MmData) -> Result<(), KernelError> {
        let res = (|| {
            let mut cur = self.vma_head;
            while let Some(vma) = cur {
                let (start, end, flags, next) = {
                    let v = unsafe { vma.get() };
                    (v.vm_start, v.vm_end, v.pte_flags, v.next)
                };
                let new_vma = target.create_vma(target_ref, start, end, flags)?;
                target.map_vma(new_vma)?;

                for va in (start..end).step_by(PAGE_SIZE) {
                    let va = VirtAddr::new(va)?;
                    let src = self.walk_addr(va)?;
                    let dst = target.walk_addr(va)?;
                    unsafe {
                        dst.as_kva_ptr::<u8>()
                            .copy_from_nonoverlapping(src.as_kva_ptr(), PAGE_SIZE);
                    }
                }
                cur = next;
            }
            Ok(())
        })();

        if res.is_err() {
            target.free_pages();
        }
        res
    }

    /// Copies `src` to user memory at `dst_va`.
    pub fn copy_to_user(&mut self, dst_va: usize, src: &[u8]) -> Result<(), KernelError> {
        let mut dst_va = dst_va;
        let mut src = src;
        while !src.is_empty() {
            let va0 = dst_va.page_rounddown();
            let pa0 = self.walk_addr(VirtAddr::new(va0)?)?;
            let offset = dst_va - va0;
            let n = usize::min(PAGE_SIZE - offset, src.len());
            unsafe {
                pa0.byte_add(offset)
                    .as_kva_ptr::<u8>()
                    .copy_from_nonoverlapping(NonNull::from(&src[0]), n);
            }
            src = &src[n..];
            dst_va = va0 + PAGE_SIZE;
        }
        Ok(())
    }

    /// Copies user memory at `src_va` into `dst`.
    pub fn copy_from_user(&mut self, dst: &mut [u8], src_va: usize) -> Result<(), KernelError> {
        let mut src_va = src_va;
        let mut dst = dst;
        while !dst.is_empty() {
            let va0 = src_va.page_rounddown();
            let pa0 = self.walk_addr(VirtAddr::new(va0)?)?;
            let offset = src_va - va0;
            let n = usize::min(PAGE_SIZE - offset, dst.len());
            unsafe {
                NonNull::from(&mut dst[0])
                    .copy_from_nonoverlapping(pa0.byte_add(offset).as_kva_ptr::<u8>(), n);
            }
            dst = &mut dst[n..];
            src_va = va0 + PAGE_SIZE;
        }
        Ok(())
    }

    /// Prints every valid leaf mapping. For debugging dead processes.
    pub fn dump(&self) {
        crate::println!("page table at {:#x}:", self.pgt);
        let root = unsafe { PageTable::from_pa(self.pgt) };
        for (i2, l2e) in root.0.iter().enumerate() {
            if !l2e.is_table() {
                continue;
            }
            let l1 = unsafe { PageTable::from_pa(l2e.phys_addr()) };
            for (i1, l1e) in l1.0.iter().enumerate() {
                if !l1e.is_table() {
                    continue;
                }
                let l0 = unsafe { PageTable::from_pa(l1e.phys_addr()) };
                for (i0, l0e) in l0.0.iter().enumerate() {
                    if !l0e.is_leaf() {
                        continue;
                    }
                    let va = (i2 << 30) | (i1 << 21) | (i0 << 12);
                    crate::println!(
                        "  {va:#x} -> {:#x} {:?}",
                        l0e.phys_addr(),
                        l0e.flags()
                    );
                }
            }
        }
    }

    /// Copies a NUL-terminated string from user memory, stopping at the
    /// first NUL or at `dst.len()` bytes. Returns the number of bytes
    /// written, including the NUL when one was found.
    pub fn copy_str_from_user(&mut self, dst: &mut [u8], src_va: usize) -> Result<usize, KernelError> {
        let mut src_va = src_va;
        let mut written = 0;
        while written < dst.len() {
            let va0 = src_va.page_rounddown();
            let pa0 = self.walk_addr(VirtAddr::new(va0)?)?;
            let offset = src_va - va0;
            let n = usize::min(PAGE_SIZE - offset, dst.len() - written);

            let src_page =
                unsafe { core::slice::from_raw_parts(pa0.byte_add(offset).as_kva_ptr().as_ptr(), n) };
            for &b in src_page {
                dst[written] = b;
                written += 1;
                if b == 0 {
                    return Ok(written);
                }
            }
            src_va = va0 + PAGE_SIZE;
        }
        Ok(written)
    }
}
