// Process-side syscall wrappers
//
// Each wrapper loads the syscall number into `rax` and its arguments into
// `rdi`, `rsi` and `rdx`, then traps through `int 0x80`. The result comes
// back in `rax`; failures are `-1`.
use core::arch::asm;

use crate::process::Pid;
use crate::syscalls::SyscallNumber;

#[inline(always)]
unsafe fn syscall0(number: SyscallNumber) -> i64 {
    let ret: i64;
    asm!("int 0x80", inlateout("rax") number as u64 => ret);
    ret
}

#[inline(always)]
unsafe fn syscall1(number: SyscallNumber, arg0: u64) -> i64 {
    let ret: i64;
    asm!("int 0x80", inlateout("rax") number as u64 => ret, in("rdi") arg0);
    ret
}

#[inline(always)]
unsafe fn syscall3(number: SyscallNumber, arg0: u64, arg1: u64, arg2: u64) -> i64 {
    let ret: i64;
    asm!(
        "int 0x80",
        inlateout("rax") number as u64 => ret,
        in("rdi") arg0,
        in("rsi") arg1,
        in("rdx") arg2,
    );
    ret
}

/// Whole seconds since boot.
pub fn sys_get_time() -> i64 {
    unsafe { syscall0(SyscallNumber::SysGetTime) }
}

/// Copies the OS name, NUL-terminated, into `buf`.
pub fn sys_get_name(buf: &mut [u8; crate::config::PROC_NAME_LEN]) -> i64 {
    unsafe { syscall1(SyscallNumber::SysGetName, buf.as_mut_ptr() as u64) }
}

pub fn proc_sleep(seconds: u64) -> i64 {
    unsafe { syscall1(SyscallNumber::ProcSleep, seconds) }
}

pub fn proc_exit() -> ! {
    unsafe {
        syscall0(SyscallNumber::ProcExit);
    }
    // an exited process is never resumed
    unreachable!("process resumed after exit")
}

pub fn proc_get_pid() -> Pid {
    unsafe { syscall0(SyscallNumber::ProcGetPid) as Pid }
}

/// Copies the caller's name, NUL-terminated, into `buf`.
pub fn proc_get_name(buf: &mut [u8; crate::config::PROC_NAME_LEN]) -> i64 {
    unsafe { syscall1(SyscallNumber::ProcGetName, buf.as_mut_ptr() as u64) }
}

pub fn io_read(io: usize, buf: &mut [u8]) -> i64 {
    unsafe {
        syscall3(
            SyscallNumber::IoRead,
            io as u64,
            buf.as_mut_ptr() as u64,
            buf.len() as u64,
        )
    }
}

pub fn io_write(io: usize, buf: &[u8]) -> i64 {
    unsafe {
        syscall3(
            SyscallNumber::IoWrite,
            io as u64,
            buf.as_ptr() as u64,
            buf.len() as u64,
        )
    }
}

pub fn io_flush(io: usize) -> i64 {
    unsafe { syscall1(SyscallNumber::IoFlush, io as u64) }
}
