#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(crimos::test_runner)]
#![reexport_test_harness_main = "test_main"]

use bootloader::{entry_point, BootInfo};
use core::panic::PanicInfo;
use crimos::config::{KernelConfig, PROC_IO_OUT, PROC_NAME_LEN};
use crimos::process::{ProcEntry, ProcType};
use crimos::{gdt, kernel, println, timer, user};

entry_point!(kernel_main);

fn kernel_main(boot_info: &'static BootInfo) -> ! {
    let config = KernelConfig::default();
    if crimos::logger::init(config.log_level).is_err() {
        println!("logger already installed");
    }

    println!("Welcome to crimos!");
    crimos::init();
    crimos::init_heap(boot_info);

    // no tick may switch stacks before the processes and the PIT are set up
    x86_64::instructions::interrupts::without_interrupts(|| {
        kernel::boot(config, gdt::kernel_selectors());
        kernel::with_kernel(|kernel| {
            let demos: [(ProcEntry, &str); 3] =
                [(greeter, "greeter"), (clock, "clock"), (counter, "counter")];
            for (entry, name) in demos {
                if let Err(e) = kernel.create(entry, name, ProcType::User) {
                    log::error!("unable to start {}: {}", name, e);
                }
            }
        });
        if let Err(e) = timer::init_pit(config.tick_rate) {
            log::error!("unable to start the timer: {}", e);
        }
    });

    #[cfg(test)]
    test_main();

    // the first timer tick moves execution onto a process stack
    crimos::hlt_loop();
}

/// Prints its identity once, then exits.
extern "C" fn greeter() -> ! {
    let mut os = [0u8; PROC_NAME_LEN];
    let mut name = [0u8; PROC_NAME_LEN];
    user::sys_get_name(&mut os);
    user::proc_get_name(&mut name);

    let mut line = [0u8; 96];
    let len = format_line(&mut line, |w| {
        use core::fmt::Write;
        writeln!(
            w,
            "hello from {} (pid {}) on {}",
            c_str(&name),
            user::proc_get_pid(),
            c_str(&os)
        )
    });
    user::io_write(PROC_IO_OUT, &line[..len]);
    user::proc_exit();
}

/// Reports the uptime every two seconds.
extern "C" fn clock() -> ! {
    loop {
        let mut line = [0u8; 64];
        let len = format_line(&mut line, |w| {
            use core::fmt::Write;
            writeln!(w, "uptime {}s", user::sys_get_time())
        });
        user::io_write(PROC_IO_OUT, &line[..len]);
        user::proc_sleep(2);
    }
}

/// Busy process that only ever loses the CPU to preemption.
extern "C" fn counter() -> ! {
    let mut count: u64 = 0;
    loop {
        count = count.wrapping_add(1);
        if count % 50_000_000 == 0 {
            user::io_write(PROC_IO_OUT, b"counter still running\n");
        }
    }
}

/// Formats into `buf`, truncating on overflow. Returns the bytes written.
fn format_line(buf: &mut [u8], f: impl FnOnce(&mut LineWriter) -> core::fmt::Result) -> usize {
    let mut writer = LineWriter { buf, len: 0 };
    let _ = f(&mut writer);
    writer.len
}

struct LineWriter<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl core::fmt::Write for LineWriter<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let room = self.buf.len() - self.len;
        let n = s.len().min(room);
        self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        if n < s.len() {
            return Err(core::fmt::Error);
        }
        Ok(())
    }
}

fn c_str(bytes: &[u8]) -> &str {
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    core::str::from_utf8(&bytes[..len]).unwrap_or("?")
}

/// This function is called on panic.
#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    crimos::serial_println!("{}", info);
    println!("{}", info);
    crimos::hlt_loop();
}

#[cfg(test)]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    crimos::test_panic_handler(info)
}

#[test_case]
fn trivial_assertion() {
    assert_eq!(1, 1);
}
