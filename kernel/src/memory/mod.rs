pub use self::addr::{PageRound, PhysAddr, PhysPageNum, VirtAddr};

/// Bytes per page.
pub const PAGE_SIZE: usize = 4096;

/// Bits of offset within a page.
pub const PAGE_SHIFT: usize = 12;

/// Bytes per level-1 huge page.
pub const PAGE_SIZE_2M: usize = 2 * 1024 * 1024;

pub mod addr;
pub mod kernel_vm;
pub mod layout;
pub mod page;
pub mod page_table;
pub mod pool;
pub mod vm;
