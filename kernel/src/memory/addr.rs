//! Address types.
//!
//! Three kinds of addresses appear in this kernel:
//!
//! * [`PhysAddr`] — a physical address. Never dereferenced directly; the
//!   direct map turns it into a usable pointer.
//! * [`VirtAddr`] — a *user* virtual address, always below `MAXVA`.
//! * plain `usize` — kernel virtual addresses (image, direct map, MMIO,
//!   stacks, pools), which are just locations in the kernel's own address
//!   space and carry no extra invariant worth a wrapper.

use core::{fmt, ptr::NonNull};

use super::{PAGE_SHIFT, PAGE_SIZE, layout};
use crate::error::KernelError;

pub const fn page_roundup(addr: usize) -> usize {
    (addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

pub const fn page_rounddown(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

pub const fn is_page_aligned(addr: usize) -> bool {
    addr % PAGE_SIZE == 0
}

pub trait PageRound {
    fn page_roundup(&self) -> Self;
    fn page_rounddown(&self) -> Self;
    fn is_page_aligned(&self) -> bool;
}

impl PageRound for usize {
    fn page_roundup(&self) -> Self {
        page_roundup(*self)
    }

    fn page_rounddown(&self) -> Self {
        page_rounddown(*self)
    }

    fn is_page_aligned(&self) -> bool {
        is_page_aligned(*self)
    }
}

/// User virtual address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtAddr(usize);

impl fmt::LowerHex for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl VirtAddr {
    /// One beyond the highest possible user virtual address.
    pub const MAX: Self = Self(layout::MAXVA);

    pub const fn new(addr: usize) -> Result<Self, KernelError> {
        if addr > Self::MAX.0 {
            return Err(KernelError::TooLargeVirtualAddress(addr));
        }
        Ok(Self(addr))
    }

    pub const fn addr(self) -> usize {
        self.0
    }

    pub const fn byte_add(self, offset: usize) -> Result<Self, KernelError> {
        let Some(addr) = self.0.checked_add(offset) else {
            return Err(KernelError::TooLargeVirtualAddress(usize::MAX));
        };
        Self::new(addr)
    }
}

impl PageRound for VirtAddr {
    fn page_roundup(&self) -> Self {
        Self(page_roundup(self.0))
    }

    fn page_rounddown(&self) -> Self {
        Self(page_rounddown(self.0))
    }

    fn is_page_aligned(&self) -> bool {
        is_page_aligned(self.0)
    }
}

/// Physical page number of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysPageNum(usize);

impl PhysPageNum {
    pub const fn new(value: usize) -> Self {
        Self(value)
    }

    pub const fn phys_addr(self) -> PhysAddr {
        PhysAddr(self.0 << PAGE_SHIFT)
    }

    pub const fn value(self) -> usize {
        self.0
    }
}

/// Physical address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysAddr(usize);

impl fmt::LowerHex for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl PhysAddr {
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    pub const fn addr(self) -> usize {
        self.0
    }

    pub const fn phys_page_num(self) -> PhysPageNum {
        PhysPageNum(self.0 >> PAGE_SHIFT)
    }

    pub const fn byte_add(self, offset: usize) -> Self {
        Self(self.0 + offset)
    }

    /// Kernel VA of this physical address through the direct map.
    pub const fn to_kva(self) -> usize {
        self.0 + layout::DIRECT_MAP_BASE
    }

    /// Pointer to this physical address through the direct map.
    pub fn as_kva_ptr<T>(self) -> NonNull<T> {
        assert!(self.0 != 0);
        NonNull::new(core::ptr::with_exposed_provenance_mut(self.to_kva())).unwrap()
    }

    /// Recovers the PA of a direct-map pointer.
    pub fn of_kva<T>(ptr: NonNull<T>) -> Self {
        let kva = ptr.addr().get();
        assert!(kva >= layout::DIRECT_MAP_BASE);
        Self(kva - layout::DIRECT_MAP_BASE)
    }

    /// `true` if this address lies in the RAM the kernel manages.
    pub const fn is_valid_ram(self) -> bool {
        self.0 >= layout::KERNEL_PHYS_BASE && self.0 < layout::RAM_END
    }
}

impl PageRound for PhysAddr {
    fn page_roundup(&self) -> Self {
        Self(page_roundup(self.0))
    }

    fn page_rounddown(&self) -> Self {
        Self(page_rounddown(self.0))
    }

    fn is_page_aligned(&self) -> bool {
        is_page_aligned(self.0)
    }
}
