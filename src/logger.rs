// Kernel logger: `log` records go to COM1, warnings and errors also to the screen
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

use crate::serial_println;
use crate::vga_buffer::{self, Color};

pub struct KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        serial_println!(
            "[{:5}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        );

        let color = match record.level() {
            Level::Error => Color::LightRed,
            Level::Warn => Color::Yellow,
            _ => return,
        };
        vga_buffer::print_colored(
            color,
            format_args!("[{}] {}\n", record.level(), record.args()),
        );
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Installs the kernel logger. Fails if a logger is already set.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}
