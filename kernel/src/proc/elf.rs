//! Format of an ELF executable file.

use dataview::{DataView, Pod};

pub const ELF_MAGIC: u32 = 0x464c_457f; // "\x7FELF" in little endian

/// File header.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod)]
pub struct ElfHeader {
    pub magic: u32,
    pub elf: [u8; 12],
    pub ty: u16,
    pub machine: u16,
    pub version: u32,
    pub entry: u64,
    pub phoff: u64,
    pub shoff: u64,
    pub flags: u32,
    pub ehsize: u16,
    pub phentsize: u16,
    pub phnum: u16,
    pub shentsize: u16,
    pub shnum: u16,
    pub shstrndx: u16,
}

/// Program segment header.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod)]
pub struct ProgramHeader {
    pub ty: u32,
    pub flags: u32,
    pub off: u64,
    pub vaddr: u64,
    pub paddr: u64,
    pub filesz: u64,
    pub memsz: u64,
    pub align: u64,
}

/// Loadable segment type.
pub const PT_LOAD: u32 = 1;

// Segment flag bits.
pub const PF_X: u32 = 1 << 0;
pub const PF_W: u32 = 1 << 1;
pub const PF_R: u32 = 1 << 2;

/// Reads the file header out of an ELF image, if it is one.
///
/// Returned by value: the embedded image bytes have no alignment to lend.
pub fn file_header(elf: &[u8]) -> Option<ElfHeader> {
    if elf.len() < size_of::<ElfHeader>() {
        return None;
    }
    let header: ElfHeader = DataView::from(elf).read(0);
    (header.magic == ELF_MAGIC).then_some(header)
}

/// Reads the `i`-th program header.
pub fn program_header(elf: &[u8], header: &ElfHeader, i: usize) -> Option<ProgramHeader> {
    let off = usize::try_from(header.phoff).ok()? + i * size_of::<ProgramHeader>();
    if off + size_of::<ProgramHeader>() > elf.len() {
        return None;
    }
    Some(DataView::from(elf).read(off))
}
