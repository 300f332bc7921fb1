// Kernel limits and tunables
use log::LevelFilter;

/// Name reported by the `SysGetName` syscall.
pub const OS_NAME: &str = "crimos";

/// Number of entries in the process table.
pub const PROC_MAX: usize = 20;

/// Size of each process stack in bytes.
pub const PROC_STACK_SIZE: usize = 8192;

/// Size of the name buffer in a PCB, terminator included.
pub const PROC_NAME_LEN: usize = 32;

/// Number of I/O ring buffers each process owns.
pub const PROC_IO_MAX: usize = 2;

/// I/O index conventionally used for input.
pub const PROC_IO_IN: usize = 0;

/// I/O index conventionally used for output.
pub const PROC_IO_OUT: usize = 1;

/// Capacity of every per-process ring buffer.
pub const IO_BUF_SIZE: usize = 256;

/// Number of timer callbacks that can be registered at once.
pub const TIMER_CALLBACKS_MAX: usize = 16;

/// Kernel heap placement (virtual).
pub const HEAP_START: usize = 0x_4444_4444_0000;
pub const HEAP_SIZE: usize = 1024 * 1024; // 1 MiB

/// Runtime configuration handed to the kernel context at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Ticks a process may hold the CPU before it is preempted.
    pub timeslice: u32,
    /// Timer interrupts per second.
    pub tick_rate: u32,
    /// Maximum level passed through the logger.
    pub log_level: LevelFilter,
    /// Ticks between console drains of process output. Zero disables draining.
    pub console_interval: u32,
}

impl KernelConfig {
    pub const DEFAULT: Self = Self {
        timeslice: 5,
        tick_rate: 100,
        log_level: LevelFilter::Info,
        console_interval: 10,
    };
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
