//! Formatted console output and the panic handler.

use core::{
    fmt::{self, Write as _},
    sync::atomic::{AtomicBool, Ordering},
};

use riscv::register::{scause, sepc, sstatus, stval};

use crate::{console, interrupt, sbi};

/// Set on the first panic; freezes other writers and reroutes output to the
/// SBI console, which needs no lock or mapping.
pub static PANICKED: AtomicBool = AtomicBool::new(false);

// Lock to avoid interleaving concurrent prints.
struct Print {
    locking: AtomicBool,
    lock: crate::sync::SpinLock<()>,
}

static PRINT: Print = Print {
    locking: AtomicBool::new(true),
    lock: crate::sync::SpinLock::new(()),
};

struct Writer<'a> {
    _guard: Option<crate::sync::SpinLockGuard<'a, ()>>,
}

impl fmt::Write for Writer<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for b in s.bytes() {
            console::put_char(b);
        }
        Ok(())
    }
}

pub fn _print(args: fmt::Arguments) {
    let guard = PRINT
        .locking
        .load(Ordering::Relaxed)
        .then(|| PRINT.lock.lock());
    let mut writer = Writer { _guard: guard };
    writer.write_fmt(args).unwrap();
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::console::print::_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! println {
    () => {
        $crate::print!("\n")
    };
    ($($arg:tt)*) => {
        $crate::print!("{}\n", format_args!($($arg)*))
    };
}

/// Compile-time log filter.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 1,
    Warn,
    Info,
    Debug,
}

pub const MAX_LOG_LEVEL: LogLevel = LogLevel::Info;

pub fn log_enabled(level: LogLevel) -> bool {
    level <= MAX_LOG_LEVEL
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if $crate::console::print::log_enabled($crate::console::print::LogLevel::Error) {
            $crate::println!("[ERROR] {}", format_args!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if $crate::console::print::log_enabled($crate::console::print::LogLevel::Warn) {
            $crate::println!("[WARN] {}", format_args!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if $crate::console::print::log_enabled($crate::console::print::LogLevel::Info) {
            $crate::println!("[INFO] {}", format_args!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if $crate::console::print::log_enabled($crate::console::print::LogLevel::Debug) {
            $crate::println!("[DEBUG] {}", format_args!($($arg)*));
        }
    };
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    interrupt::disable();
    PANICKED.store(true, Ordering::Relaxed);
    PRINT.locking.store(false, Ordering::Relaxed);

    println!("panic: {info}");
    println!(
        "  sepc={:#x} scause={:#x} stval={:#x} sstatus={:#x}",
        sepc::read(),
        scause::read().bits(),
        stval::read(),
        sstatus::read().bits(),
    );
    sbi::shutdown();
}
