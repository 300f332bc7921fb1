// Keyboard IRQ handler: decodes scancodes and echoes keys to the screen
use lazy_static::lazy_static;
use pc_keyboard::{layouts, DecodedKey, HandleControl, KeyCode, Keyboard, ScancodeSet1};
use spin::Mutex;
use x86_64::instructions::port::Port;

use crate::kernel::Kernel;
use crate::print;

const DATA_PORT: u16 = 0x60;

lazy_static! {
    static ref KEYBOARD: Mutex<Keyboard<layouts::Us104Key, ScancodeSet1>> = Mutex::new(
        Keyboard::new(ScancodeSet1::new(), layouts::Us104Key, HandleControl::Ignore)
    );
}

/// Handles IRQ1. F1 dumps the process table to the log.
pub fn handle_irq(kernel: &mut Kernel) {
    let mut port = Port::new(DATA_PORT);
    let scancode: u8 = unsafe { port.read() };

    let mut keyboard = KEYBOARD.lock();
    let Ok(Some(event)) = keyboard.add_byte(scancode) else {
        return;
    };
    match keyboard.process_keyevent(event) {
        Some(DecodedKey::Unicode(character)) => print!("{}", character),
        Some(DecodedKey::RawKey(KeyCode::F1)) => kernel.dump(),
        Some(DecodedKey::RawKey(_)) | None => {}
    }
}
