use crate::memory::VirtAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    #[error("no free process slot")]
    NoFreeProc,
    #[error("no free page frame")]
    NoFreePage,
    #[error("object pool exhausted")]
    PoolExhausted,
    #[error("virtual address too large: {0:#x}")]
    TooLargeVirtualAddress(usize),
    #[error("page not mapped: va={0:#x}")]
    AddressNotMapped(VirtAddr),
    #[error("page not user accessible: va={0:#x}")]
    InaccessibleMemory(VirtAddr),
    #[error("remap of mapped address: va={0:#x}")]
    Remap(VirtAddr),
    #[error("no child process")]
    NoChildProcess,
    #[error("no such application")]
    AppNotFound,
    #[error("invalid executable")]
    InvalidExecutable,
    #[error("bad file descriptor: {0}")]
    BadFileDescriptor(usize),
}
