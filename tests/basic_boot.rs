#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(crimos::test_runner)]
#![reexport_test_harness_main = "test_main"]

use core::panic::PanicInfo;

#[no_mangle]
pub extern "C" fn _start() -> ! {
    test_main();

    loop {}
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    crimos::test_panic_handler(info)
}

#[test_case]
fn test_println() {
    crimos::println!("test_println output");
}

#[test_case]
fn test_serial_println() {
    crimos::serial_println!("test_serial_println output");
}
