// Process Control Block
use core::fmt;

use crate::config::{PROC_IO_MAX, PROC_NAME_LEN};
use crate::process::context::ProcStack;
use crate::ringbuf::RingBuf;

/// Process ID type
pub type Pid = i32;

/// The idle process. Created first, never destroyed.
pub const IDLE_PID: Pid = 0;

/// Entry point of a process. Processes never return; they call `proc_exit`.
pub type ProcEntry = extern "C" fn() -> !;

/// Process state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcState {
    /// Unused table slot, or a process that has exited
    #[default]
    None,
    /// Ready to run
    Idle,
    /// Currently executing
    Active,
    /// Waiting for its wake tick
    Sleeping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcType {
    #[default]
    Kernel,
    User,
}

/// Which scheduler queue currently lists the process. Never implies ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedQueue {
    #[default]
    None,
    Run,
    Sleep,
}

#[derive(Debug, Default)]
pub struct Proc {
    pub pid: Pid,
    /// Position in the process table. Stays fixed for the slot's lifetime.
    pub entry: usize,
    name: [u8; PROC_NAME_LEN],
    pub kind: ProcType,
    pub state: ProcState,
    pub start_time: u64,
    pub run_time: u64,
    /// Ticks since the process was last scheduled
    pub cpu_time: u32,
    /// Absolute tick at which a sleeping process wakes
    pub sleep_time: u64,
    /// Byte offset of the live trapframe inside this process's stack
    pub trapframe: usize,
    pub queue: SchedQueue,
    pub io: [Option<RingBuf>; PROC_IO_MAX],
}

impl Proc {
    /// A cleared PCB for table slot `entry`.
    pub fn vacant(entry: usize) -> Self {
        Self {
            pid: -1,
            entry,
            trapframe: ProcStack::INITIAL_FRAME,
            ..Self::default()
        }
    }

    pub fn is_live(&self) -> bool {
        self.state != ProcState::None
    }

    /// Stores `name`, truncated to `PROC_NAME_LEN - 1` bytes and terminated.
    pub fn set_name(&mut self, name: &str) {
        let len = name.len().min(PROC_NAME_LEN - 1);
        self.name = [0; PROC_NAME_LEN];
        self.name[..len].copy_from_slice(&name.as_bytes()[..len]);
    }

    pub fn name(&self) -> &str {
        let bytes = &self.name[..self.name_len()];
        match core::str::from_utf8(bytes) {
            Ok(name) => name,
            // truncation may have split a multi-byte character
            Err(e) => core::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or(""),
        }
    }

    /// The name including its terminator, as copied out to processes.
    pub fn name_with_nul(&self) -> &[u8] {
        &self.name[..self.name_len() + 1]
    }

    fn name_len(&self) -> usize {
        self.name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(PROC_NAME_LEN - 1)
    }
}

/// Process management errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessError {
    /// Every table entry is in use
    NoFreeSlot,
    /// The pid counter has run out
    PidsExhausted,
    /// Absent, exited, or the idle process
    Invalid,
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProcessError::NoFreeSlot => write!(f, "process table is full"),
            ProcessError::PidsExhausted => write!(f, "no process ids left"),
            ProcessError::Invalid => write!(f, "invalid process"),
        }
    }
}
