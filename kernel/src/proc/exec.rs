//! Program loading: `exec` and the first process.
//!
//! `PT_LOAD` segments are mapped as VMAs and filled from the in-kernel ELF
//! image through the direct map. Above the segments sit an (initially
//! empty) brk area and a fixed-size user stack just under `USTACK_START`.

use super::{Proc, ProcShared, ProcState, apps, elf, scheduler};
use crate::{
    error::KernelError,
    memory::{
        PAGE_SIZE,
        addr::{page_rounddown, page_roundup},
        layout::{USTACK_SIZE, USTACK_START},
        page_table::PtEntryFlags,
        vm::MmRef,
    },
    sync::SpinLockGuard,
};

fn segment_flags(p_flags: u32) -> PtEntryFlags {
    // User pages start with A/D clear; the first touch faults and the
    // trap handler sets the bits.
    let mut flags = PtEntryFlags::U;
    if p_flags & elf::PF_R != 0 {
        flags |= PtEntryFlags::R;
    }
    if p_flags & elf::PF_W != 0 {
        flags |= PtEntryFlags::W;
    }
    if p_flags & elf::PF_X != 0 {
        flags |= PtEntryFlags::X;
    }
    flags
}

/// Copies `[p_offset, p_offset + p_filesz)` of the image into the freshly
/// mapped pages of `[va, va_end)`, zeroing the bss tail.
fn fill_segment(
    mm: MmRef,
    va: usize,
    va_end: usize,
    file: &[u8],
) -> Result<(), KernelError> {
    let mut mm_data = mm.lock();
    let mut file_off = 0;
    for page_va in (va..va_end).step_by(PAGE_SIZE) {
        let pa = mm_data.walk_addr(crate::memory::VirtAddr::new(page_va)?)?;
        let dst = unsafe { core::slice::from_raw_parts_mut(pa.as_kva_ptr().as_ptr(), PAGE_SIZE) };

        let copy = usize::min(file.len() - file_off, PAGE_SIZE);
        dst[..copy].copy_from_slice(&file[file_off..file_off + copy]);
        dst[copy..].fill(0);
        file_off += copy;
    }
    Ok(())
}

/// Builds `p`'s user image from an ELF: segments, brk area, user stack,
/// entry point and stack pointer.
///
/// The address space must contain nothing but the trampoline and trapframe
/// when this is called. The caller decides the resulting scheduling state.
pub fn load_user_elf(
    app: &apps::UserApp,
    p: &Proc,
    shared: &mut SpinLockGuard<ProcShared>,
) -> Result<(), KernelError> {
    let header = elf::file_header(app.elf).ok_or(KernelError::InvalidExecutable)?;
    let mm = shared.mm.expect("load into a proc without an address space");

    let mut max_va_end = 0;
    for i in 0..header.phnum as usize {
        let phdr =
            elf::program_header(app.elf, &header, i).ok_or(KernelError::InvalidExecutable)?;
        if phdr.ty != elf::PT_LOAD {
            continue;
        }
        let vaddr = usize::try_from(phdr.vaddr).map_err(|_| KernelError::InvalidExecutable)?;
        if phdr.filesz > phdr.memsz {
            return Err(KernelError::InvalidExecutable);
        }

        let va = page_rounddown(vaddr);
        let va_end = page_roundup(vaddr + usize::try_from(phdr.memsz).unwrap());
        if va != vaddr {
            // Segments are linked page-aligned; anything else is a
            // build problem, not a runtime case.
            return Err(KernelError::InvalidExecutable);
        }

        {
            let mut mm_data = mm.lock();
            let vma = mm_data.create_vma(mm, va, va_end, segment_flags(phdr.flags))?;
            mm_data.map_vma(vma)?;
        }

        let off = usize::try_from(phdr.off).map_err(|_| KernelError::InvalidExecutable)?;
        let filesz = usize::try_from(phdr.filesz).unwrap();
        if off + filesz > app.elf.len() {
            return Err(KernelError::InvalidExecutable);
        }
        fill_segment(mm, va, va_end, &app.elf[off..off + filesz])?;

        max_va_end = usize::max(max_va_end, va_end);
    }

    // An empty brk area above the image; sbrk would grow it.
    let brk_start = page_roundup(max_va_end);
    {
        let mut mm_data = mm.lock();
        let vma = mm_data.create_vma(mm, brk_start, brk_start, PtEntryFlags::URW)?;
        mm_data.map_vma(vma)?;
        shared.vma_brk = Some(vma);
    }

    // The user stack, fixed size, fixed place.
    {
        let mut mm_data = mm.lock();
        let vma = mm_data.create_vma(
            mm,
            USTACK_START,
            USTACK_START + USTACK_SIZE,
            PtEntryFlags::URW,
        )?;
        mm_data.map_vma(vma)?;
        shared.vma_ustack = Some(vma);
    }

    let tf = unsafe { p.trapframe_mut() };
    tf.sp = USTACK_START + USTACK_SIZE;
    tf.epc = usize::try_from(header.entry).map_err(|_| KernelError::InvalidExecutable)?;

    Ok(())
}

/// Replaces the calling process's image with `name`'s.
///
/// Keeps the trapframe and trampoline mappings; everything else below them
/// is torn down first. The process stays `Running` and returns to user
/// space at the new entry point.
pub fn exec(p: &'static Proc, name: &str) -> Result<(), KernelError> {
    let app = apps::get(name)?;

    let mut shared = p.shared().lock();
    shared.vma_ustack = None;
    shared.vma_brk = None;
    shared.mm.unwrap().lock().free_pages();

    load_user_elf(app, p, &mut shared)?;
    shared.set_name(name);
    Ok(())
}

/// Creates pid 1 and loads the init application into it.
pub fn load_init_app() {
    let app = match apps::get(apps::INIT_APP) {
        Ok(app) => app,
        Err(_) => {
            crate::log_warn!("no init application; nothing will run");
            return;
        }
    };

    let (p, mut shared) = super::allocproc().expect("no proc slot for init");
    load_user_elf(app, p, &mut shared).expect("loading init failed");
    shared.set_name(apps::INIT_APP);
    super::set_init_proc(p);

    shared.state = ProcState::Runnable;
    scheduler::add_task(p);
    drop(shared);
}
