// src/syscalls.rs
use core::fmt;

use crate::config::{IO_BUF_SIZE, OS_NAME, PROC_IO_MAX, PROC_NAME_LEN};
use crate::kernel::Kernel;
use crate::process::TrapFrame;
use crate::ringbuf::RingBuf;

/// System call numbers, passed in `rax`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum SyscallNumber {
    SysGetTime = 1,
    SysGetName = 2,
    ProcSleep = 3,
    ProcExit = 4,
    ProcGetPid = 5,
    ProcGetName = 6,
    IoRead = 7,
    IoWrite = 8,
    IoFlush = 9,
}

impl TryFrom<u64> for SyscallNumber {
    type Error = u64;

    fn try_from(id: u64) -> Result<Self, Self::Error> {
        Ok(match id {
            1 => SyscallNumber::SysGetTime,
            2 => SyscallNumber::SysGetName,
            3 => SyscallNumber::ProcSleep,
            4 => SyscallNumber::ProcExit,
            5 => SyscallNumber::ProcGetPid,
            6 => SyscallNumber::ProcGetName,
            7 => SyscallNumber::IoRead,
            8 => SyscallNumber::IoWrite,
            9 => SyscallNumber::IoFlush,
            _ => return Err(id),
        })
    }
}

/// System call arguments, taken from the caller's saved registers
#[derive(Debug, Clone, Copy)]
pub struct SyscallArgs {
    pub arg0: u64, // rdi
    pub arg1: u64, // rsi
    pub arg2: u64, // rdx
}

impl From<&TrapFrame> for SyscallArgs {
    fn from(frame: &TrapFrame) -> Self {
        Self {
            arg0: frame.rdi,
            arg1: frame.rsi,
            arg2: frame.rdx,
        }
    }
}

/// System call result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallResult {
    Success(u64),
    Error(SyscallError),
}

/// System call errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    NoActiveProcess,
    NullBuffer,
    InvalidIo,
    NoIoBuffer,
}

impl fmt::Display for SyscallError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SyscallError::NoActiveProcess => write!(f, "No active process"),
            SyscallError::NullBuffer => write!(f, "Null buffer"),
            SyscallError::InvalidIo => write!(f, "I/O index out of range"),
            SyscallError::NoIoBuffer => write!(f, "No I/O buffer"),
        }
    }
}

/// Value left in the caller's `rax` when a syscall fails.
pub const SYSCALL_FAILED: u64 = -1i64 as u64;

/// Convert syscall result to u64 for return value
impl From<SyscallResult> for u64 {
    fn from(result: SyscallResult) -> u64 {
        match result {
            SyscallResult::Success(value) => value,
            SyscallResult::Error(_) => SYSCALL_FAILED,
        }
    }
}

impl From<Result<u64, SyscallError>> for SyscallResult {
    fn from(result: Result<u64, SyscallError>) -> Self {
        match result {
            Ok(value) => SyscallResult::Success(value),
            Err(err) => SyscallResult::Error(err),
        }
    }
}

/// Handles the syscall trapped by the active process and leaves the result in
/// its saved `rax`. An unknown syscall number halts the kernel, even when no
/// process is running.
pub fn dispatch(kernel: &mut Kernel) {
    let caller = kernel.scheduler().active();
    let frame = match caller {
        Some(entry) => *kernel.procs().trapframe(entry),
        None => match kernel.trapped_frame() {
            Some(frame) => frame,
            None => {
                log::warn!("syscall without a saved frame ignored");
                return;
            }
        },
    };

    let number = match SyscallNumber::try_from(frame.rax) {
        Ok(number) => number,
        Err(id) => match caller {
            Some(entry) => panic!(
                "Invalid system call {} from pid {}",
                id,
                kernel.procs().proc(entry).pid
            ),
            None => panic!("Invalid system call {} outside of any process", id),
        },
    };

    let Some(caller) = caller else {
        log::warn!("syscall {:?} outside of any process ignored", number);
        return;
    };
    let pid = kernel.procs().proc(caller).pid;
    let args = SyscallArgs::from(&frame);

    let result: SyscallResult = match number {
        SyscallNumber::SysGetTime => Ok(sys_get_time(kernel)),
        SyscallNumber::SysGetName => sys_get_name(args),
        SyscallNumber::ProcSleep => proc_sleep(kernel, args),
        SyscallNumber::ProcExit => proc_exit(kernel),
        SyscallNumber::ProcGetPid => proc_get_pid(kernel),
        SyscallNumber::ProcGetName => proc_get_name(kernel, args),
        SyscallNumber::IoRead => io_read(kernel, args),
        SyscallNumber::IoWrite => io_write(kernel, args),
        SyscallNumber::IoFlush => io_flush(kernel, args),
    }
    .into();

    if let SyscallResult::Error(e) = result {
        log::debug!("syscall {:?} from pid {} failed: {}", number, pid, e);
    }

    // an exited caller never resumes; its entry may already be reused
    let still_live = kernel
        .procs()
        .entry_to_proc(caller)
        .is_some_and(|p| p.pid == pid);
    if still_live {
        kernel.procs_mut().trapframe_mut(caller).rax = result.into();
    }
}

/// Whole seconds since boot.
pub fn sys_get_time(kernel: &Kernel) -> u64 {
    kernel.ticks() / u64::from(kernel.config().tick_rate.max(1))
}

pub fn sys_get_name(args: SyscallArgs) -> Result<u64, SyscallError> {
    let mut name = [0u8; PROC_NAME_LEN];
    let len = OS_NAME.len().min(PROC_NAME_LEN - 1);
    name[..len].copy_from_slice(&OS_NAME.as_bytes()[..len]);
    copy_out(args.arg0, &name[..len + 1])?;
    Ok(0)
}

/// Sleeps the caller for `arg0` seconds.
pub fn proc_sleep(kernel: &mut Kernel, args: SyscallArgs) -> Result<u64, SyscallError> {
    let pid = kernel.active().ok_or(SyscallError::NoActiveProcess)?.pid;
    let ticks = args.arg0.saturating_mul(u64::from(kernel.config().tick_rate));
    kernel
        .sleep(pid, ticks)
        .map_err(|_| SyscallError::NoActiveProcess)?;
    Ok(0)
}

pub fn proc_exit(kernel: &mut Kernel) -> Result<u64, SyscallError> {
    kernel
        .exit_active()
        .map_err(|_| SyscallError::NoActiveProcess)?;
    Ok(0)
}

pub fn proc_get_pid(kernel: &Kernel) -> Result<u64, SyscallError> {
    let proc = kernel.active().ok_or(SyscallError::NoActiveProcess)?;
    Ok(proc.pid as u64)
}

pub fn proc_get_name(kernel: &Kernel, args: SyscallArgs) -> Result<u64, SyscallError> {
    let proc = kernel.active().ok_or(SyscallError::NoActiveProcess)?;
    copy_out(args.arg0, proc.name_with_nul())?;
    Ok(0)
}

/// Reads up to `arg2` bytes from I/O buffer `arg0` into `arg1`.
pub fn io_read(kernel: &mut Kernel, args: SyscallArgs) -> Result<u64, SyscallError> {
    let ring = io_buffer(kernel, args.arg0)?;
    let buf = user_buffer(args.arg1, args.arg2)?;
    Ok(ring.read(buf) as u64)
}

/// Writes up to `arg2` bytes from `arg1` to I/O buffer `arg0`.
pub fn io_write(kernel: &mut Kernel, args: SyscallArgs) -> Result<u64, SyscallError> {
    let ring = io_buffer(kernel, args.arg0)?;
    let buf = user_buffer(args.arg1, args.arg2)?;
    Ok(ring.write(buf) as u64)
}

pub fn io_flush(kernel: &mut Kernel, args: SyscallArgs) -> Result<u64, SyscallError> {
    io_buffer(kernel, args.arg0)?.flush();
    Ok(0)
}

/// I/O buffer `io` of the active process.
fn io_buffer(kernel: &mut Kernel, io: u64) -> Result<&mut RingBuf, SyscallError> {
    let entry = kernel
        .scheduler()
        .active()
        .ok_or(SyscallError::NoActiveProcess)?;
    let io = usize::try_from(io)
        .ok()
        .filter(|&io| io < PROC_IO_MAX)
        .ok_or(SyscallError::InvalidIo)?;
    kernel.procs_mut().proc_mut(entry).io[io]
        .as_mut()
        .ok_or(SyscallError::NoIoBuffer)
}

/// The caller's buffer at `addr`. Lengths beyond one ring buffer are clamped,
/// since no transfer can move more than that.
fn user_buffer<'a>(addr: u64, len: u64) -> Result<&'a mut [u8], SyscallError> {
    if addr == 0 {
        return Err(SyscallError::NullBuffer);
    }
    let len = usize::try_from(len).unwrap_or(usize::MAX).min(IO_BUF_SIZE);
    // SAFETY: processes share the kernel address space; the caller vouches
    // for `len` bytes at `addr`.
    Ok(unsafe { core::slice::from_raw_parts_mut(addr as *mut u8, len) })
}

fn copy_out(addr: u64, bytes: &[u8]) -> Result<(), SyscallError> {
    if addr == 0 {
        return Err(SyscallError::NullBuffer);
    }
    // SAFETY: as in `user_buffer`; name buffers hold `PROC_NAME_LEN` bytes.
    unsafe {
        core::ptr::copy_nonoverlapping(bytes.as_ptr(), addr as *mut u8, bytes.len());
    }
    Ok(())
}
