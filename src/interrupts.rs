// src/interrupts.rs
use crate::kernel::{self, Kernel};
use crate::process::TrapFrame;
use crate::{gdt, hlt_loop, keyboard, syscalls};
use lazy_static::lazy_static;
use pic8259::ChainedPics;
use spin;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};
use x86_64::PrivilegeLevel;
use x86_64::VirtAddr;

pub const PIC_1_OFFSET: u8 = 32;
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

#[derive(Debug, Clone, Copy)]
#[repr(u8)]
pub enum InterruptIndex {
    Timer = PIC_1_OFFSET,
    Keyboard,
    Syscall = 0x80,
}

impl InterruptIndex {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    fn as_usize(self) -> usize {
        usize::from(self.as_u8())
    }
}

pub static PICS: spin::Mutex<ChainedPics> =
    spin::Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

/// Handler run for a trapped vector, with the kernel locked.
pub type IrqHandler = fn(&mut Kernel);

static IRQ_HANDLERS: spin::Mutex<[Option<IrqHandler>; 256]> = spin::Mutex::new([None; 256]);

/// Installs `handler` for `vector`, replacing any previous one.
pub fn register_irq(vector: InterruptIndex, handler: IrqHandler) {
    IRQ_HANDLERS.lock()[vector.as_usize()] = Some(handler);
}

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        idt.page_fault.set_handler_fn(page_fault_handler);
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(gdt::DOUBLE_FAULT_IST_INDEX);
        }
        unsafe {
            idt[InterruptIndex::Timer.as_usize()]
                .set_handler_addr(VirtAddr::new(timer_entry as usize as u64));
            idt[InterruptIndex::Keyboard.as_usize()]
                .set_handler_addr(VirtAddr::new(keyboard_entry as usize as u64));
            idt[InterruptIndex::Syscall.as_usize()]
                .set_handler_addr(VirtAddr::new(syscall_entry as usize as u64))
                .set_privilege_level(PrivilegeLevel::Ring3);
        }
        idt
    };
}

pub fn init_idt() {
    IDT.load();
}

/// Registers the timer, keyboard and syscall handlers.
pub fn init_handlers() {
    register_irq(InterruptIndex::Timer, Kernel::timer_interrupt);
    register_irq(InterruptIndex::Keyboard, keyboard::handle_irq);
    register_irq(InterruptIndex::Syscall, syscalls::dispatch);
}

extern "x86-interrupt" fn breakpoint_handler(stack_frame: InterruptStackFrame) {
    log::warn!("EXCEPTION: BREAKPOINT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn page_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    use x86_64::registers::control::Cr2;

    log::error!("EXCEPTION: PAGE FAULT");
    log::error!("Accessed Address: {:?}", Cr2::read());
    log::error!("Error Code: {:?}", error_code);
    log::error!("{:#?}", stack_frame);
    hlt_loop();
}

extern "x86-interrupt" fn double_fault_handler(
    stack_frame: InterruptStackFrame,
    _error_code: u64,
) -> ! {
    panic!("EXCEPTION: DOUBLE FAULT\n{:#?}", stack_frame);
}

// Saves the general-purpose registers below the CPU's interrupt frame so the
// stack holds a `TrapFrame`, then resumes from whichever frame
// `trap_dispatch` returns. The push order must mirror the field order of
// `TrapFrame`.
macro_rules! trap_entry {
    ($name:ident, $vector:expr) => {
        #[unsafe(naked)]
        extern "C" fn $name() -> ! {
            core::arch::naked_asm!(
                "push rax",
                "push rbx",
                "push rcx",
                "push rdx",
                "push rsi",
                "push rdi",
                "push rbp",
                "push r8",
                "push r9",
                "push r10",
                "push r11",
                "push r12",
                "push r13",
                "push r14",
                "push r15",

                // 40 bytes of CPU frame plus 120 bytes of registers keep rsp
                // 16-byte aligned for the call
                "mov rdi, rsp",
                "mov rsi, {vector}",
                "cld",
                "call {dispatch}",

                // switch to the frame of the process being resumed
                "mov rsp, rax",

                "pop r15",
                "pop r14",
                "pop r13",
                "pop r12",
                "pop r11",
                "pop r10",
                "pop r9",
                "pop r8",
                "pop rbp",
                "pop rdi",
                "pop rsi",
                "pop rdx",
                "pop rcx",
                "pop rbx",
                "pop rax",

                "iretq",
                vector = const $vector,
                dispatch = sym trap_dispatch,
            );
        }
    };
}

trap_entry!(timer_entry, InterruptIndex::Timer as u8);
trap_entry!(keyboard_entry, InterruptIndex::Keyboard as u8);
trap_entry!(syscall_entry, InterruptIndex::Syscall as u8);

/// Common trap path. Returns the frame to resume, which is `frame` itself
/// until the kernel context exists.
extern "C" fn trap_dispatch(frame: *mut TrapFrame, vector: u64) -> *mut TrapFrame {
    let handler = IRQ_HANDLERS.lock()[vector as usize];
    let resume = kernel::with_kernel(|kernel| {
        kernel.trap_enter(frame as usize);
        if let Some(handler) = handler {
            handler(kernel);
        }
        kernel.trap_exit()
    });

    if (PIC_1_OFFSET as u64..PIC_2_OFFSET as u64 + 8).contains(&vector) {
        unsafe {
            PICS.lock().notify_end_of_interrupt(vector as u8);
        }
    }

    match resume {
        Some(addr) => addr as *mut TrapFrame,
        None => frame,
    }
}

#[test_case]
fn test_breakpoint_exception() {
    // invoke a breakpoint exception
    x86_64::instructions::interrupts::int3();
}

#[test_case]
fn test_syscall_vector_before_boot_resumes_caller() {
    // without a kernel context the trap path hands back the caller's own frame
    let id: u64 = 0;
    let rax: u64;
    unsafe {
        core::arch::asm!("int 0x80", inlateout("rax") id => rax);
    }
    assert_eq!(rax, id);
}
