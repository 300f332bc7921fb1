#![no_std]
#![no_main]

use bootloader::{entry_point, BootInfo};
use core::panic::PanicInfo;
use core::sync::atomic::{AtomicU64, Ordering};
use crimos::config::{KernelConfig, PROC_IO_OUT, PROC_NAME_LEN};
use crimos::kernel::{self, Kernel};
use crimos::process::{Pid, ProcType};
use crimos::timer::{self, Repeat};
use crimos::{exit_qemu, gdt, serial_print, serial_println, user, QemuExitCode};

/// Ticks before the run is declared hung.
const WATCHDOG_TICKS: u64 = 3000;

static SPINS_A: AtomicU64 = AtomicU64::new(0);
static SPINS_B: AtomicU64 = AtomicU64::new(0);

entry_point!(main);

fn main(boot_info: &'static BootInfo) -> ! {
    serial_print!("preemption::processes_share_the_cpu...\t");

    crimos::init();
    crimos::init_heap(boot_info);

    let config = KernelConfig {
        console_interval: 0,
        ..KernelConfig::DEFAULT
    };
    x86_64::instructions::interrupts::without_interrupts(|| {
        kernel::boot(config, gdt::kernel_selectors());
        kernel::with_kernel(|kernel| {
            spawn(kernel, spinner_a, "spinner_a");
            spawn(kernel, spinner_b, "spinner_b");
            spawn(kernel, leaver, "leaver");
            spawn(kernel, checker, "checker");
            if let Err(e) = kernel
                .timer_mut()
                .register(watchdog, WATCHDOG_TICKS, Repeat::Times(1))
            {
                panic!("unable to arm the watchdog: {}", e);
            }
        });
        if let Err(e) = timer::init_pit(config.tick_rate) {
            panic!("unable to start the timer: {}", e);
        }
    });

    crimos::hlt_loop();
}

fn spawn(kernel: &mut Kernel, entry: extern "C" fn() -> !, name: &str) {
    if let Err(e) = kernel.create(entry, name, ProcType::Kernel) {
        panic!("unable to create {}: {}", name, e);
    }
}

fn watchdog(_: &mut Kernel) {
    panic!("processes did not finish within {} ticks", WATCHDOG_TICKS);
}

extern "C" fn spinner_a() -> ! {
    loop {
        SPINS_A.fetch_add(1, Ordering::Relaxed);
    }
}

extern "C" fn spinner_b() -> ! {
    loop {
        SPINS_B.fetch_add(1, Ordering::Relaxed);
    }
}

extern "C" fn leaver() -> ! {
    user::proc_exit();
}

/// Exercises the syscall vector from a preempted process, then checks that
/// both spinners got CPU time.
extern "C" fn checker() -> ! {
    check(user::proc_get_pid() == 4, "checker has pid 4");

    let mut name = [0u8; PROC_NAME_LEN];
    check(user::proc_get_name(&mut name) == 0, "proc_get_name succeeds");
    check(name.starts_with(b"checker\0"), "proc_get_name copies the name");
    check(user::sys_get_name(&mut name) == 0, "sys_get_name succeeds");
    check(name.starts_with(b"crimos\0"), "sys_get_name copies the OS name");

    check(user::io_write(PROC_IO_OUT, b"abc") == 3, "io_write stores bytes");
    let mut buf = [0u8; 8];
    check(user::io_read(PROC_IO_OUT, &mut buf) == 3, "io_read returns them");
    check(&buf[..3] == b"abc", "io_read copies them");
    check(user::io_flush(crimos::config::PROC_IO_MAX) == -1, "bad io index fails");

    let before = user::sys_get_time();
    check(user::proc_sleep(1) == 0, "proc_sleep succeeds");
    check(user::sys_get_time() > before, "sleep lasts at least a second");

    let leaver_pid: Pid = 3;
    let leaver_gone = kernel::with_kernel(|kernel| kernel.lookup(leaver_pid).is_none());
    check(leaver_gone == Some(true), "exited process left the table");

    check(SPINS_A.load(Ordering::Relaxed) > 0, "spinner_a ran");
    check(SPINS_B.load(Ordering::Relaxed) > 0, "spinner_b ran");

    serial_println!("[ok]");
    exit_qemu(QemuExitCode::Success);
    crimos::hlt_loop();
}

fn check(condition: bool, what: &str) {
    if !condition {
        panic!("check failed: {}", what);
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    crimos::test_panic_handler(info)
}
