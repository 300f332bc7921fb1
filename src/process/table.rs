// Process table and slot allocator
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::ptr;

use crate::config::{IO_BUF_SIZE, PROC_MAX, PROC_STACK_SIZE};
use crate::process::context::{ProcStack, Selectors, TrapFrame};
use crate::process::pcb::{Pid, Proc, ProcEntry, ProcessError, ProcState, ProcType, IDLE_PID};
use crate::process::scheduler::Scheduler;
use crate::queue::Queue;
use crate::ringbuf::RingBuf;

/// Owns every PCB and every process stack. Entries are handed out and taken
/// back through a free-list queue, so an entry is either in use or free.
pub struct ProcTable {
    procs: Box<[Proc]>,
    stacks: Box<[ProcStack]>,
    allocator: Queue,
    /// Entries of exited processes whose stacks may still be in use
    exited: Queue,
    next_pid: Pid,
}

impl ProcTable {
    pub fn new() -> Self {
        let procs: Vec<Proc> = (0..PROC_MAX).map(Proc::vacant).collect();
        let mut stacks = Vec::with_capacity(PROC_MAX);
        for _ in 0..PROC_MAX {
            stacks.push(ProcStack::zeroed());
        }

        let mut allocator = Queue::new(PROC_MAX);
        for entry in 0..PROC_MAX {
            if allocator.enqueue(entry as i32).is_err() {
                panic!("process allocator smaller than the process table");
            }
        }

        Self {
            procs: procs.into_boxed_slice(),
            stacks: stacks.into_boxed_slice(),
            allocator,
            exited: Queue::new(PROC_MAX),
            next_pid: IDLE_PID,
        }
    }

    /// Creates a process and registers it with `scheduler`.
    ///
    /// The trapframe is carved out of the top of the process's own stack and
    /// primed so the first resume jumps to `entry_point` with interrupts on.
    pub fn create(
        &mut self,
        scheduler: &mut Scheduler,
        entry_point: ProcEntry,
        name: &str,
        kind: ProcType,
        now: u64,
        selectors: Selectors,
    ) -> Result<Pid, ProcessError> {
        let pid = self.next_pid;
        let next_pid = pid.checked_add(1).ok_or(ProcessError::PidsExhausted)?;
        let entry = self
            .allocator
            .dequeue()
            .map_err(|_| ProcessError::NoFreeSlot)? as usize;
        self.next_pid = next_pid;

        let stack = &mut self.stacks[entry];
        stack.clear();
        // one return-address slot below the top keeps the entry function's
        // stack aligned the way a call would have left it
        let rsp = (stack.top() - 8) as u64;
        *stack.frame_mut(ProcStack::INITIAL_FRAME) =
            TrapFrame::new_process(entry_point as usize as u64, rsp, selectors);

        let proc = &mut self.procs[entry];
        *proc = Proc::vacant(entry);
        proc.pid = pid;
        proc.kind = kind;
        proc.start_time = now;
        proc.set_name(name);
        proc.io = core::array::from_fn(|_| Some(RingBuf::new(IO_BUF_SIZE)));

        scheduler.add(proc);

        log::info!("created process {} ({}) entry={}", proc.name(), pid, entry);
        Ok(pid)
    }

    /// Destroys a live process other than the idle process.
    ///
    /// Fails without side effects on an absent or exited pid.
    pub fn destroy(&mut self, scheduler: &mut Scheduler, pid: Pid) -> Result<(), ProcessError> {
        if pid == IDLE_PID {
            return Err(ProcessError::Invalid);
        }
        let entry = self.entry_of(pid).ok_or(ProcessError::Invalid)?;
        scheduler.remove(&mut self.procs[entry]);
        self.release(entry);
        log::info!("destroyed process {} entry={}", pid, entry);
        Ok(())
    }

    /// Marks the process in `entry` exited. Its slot is reclaimed by [`reap`]
    /// once nothing executes on its stack.
    ///
    /// [`reap`]: ProcTable::reap
    pub fn retire(&mut self, scheduler: &mut Scheduler, entry: usize) {
        let proc = &mut self.procs[entry];
        scheduler.remove(proc);
        proc.state = ProcState::None;
        log::info!("process {} ({}) exited", proc.name(), proc.pid);
        if let Err(e) = self.exited.enqueue(entry as i32) {
            panic!("unable to park exited entry {}: {}", entry, e);
        }
    }

    /// Reclaims exited entries, skipping `in_use` (the stack the current trap
    /// is running on).
    pub fn reap(&mut self, in_use: Option<usize>) {
        for _ in 0..self.exited.len() {
            let entry = match self.exited.dequeue() {
                Ok(entry) => entry as usize,
                Err(e) => panic!("unable to drain exited entries: {}", e),
            };
            if Some(entry) == in_use {
                if let Err(e) = self.exited.enqueue(entry as i32) {
                    panic!("unable to requeue exited entry {}: {}", entry, e);
                }
                continue;
            }
            self.release(entry);
        }
    }

    /// Zeroes the PCB and stack of `entry` and hands the entry back.
    fn release(&mut self, entry: usize) {
        self.procs[entry] = Proc::vacant(entry);
        self.stacks[entry].clear();
        if let Err(e) = self.allocator.enqueue(entry as i32) {
            panic!("unable to free process entry {}: {}", entry, e);
        }
    }

    /// Linear scan for a live process.
    pub fn lookup_by_pid(&self, pid: Pid) -> Option<&Proc> {
        self.procs.iter().find(|p| p.is_live() && p.pid == pid)
    }

    pub fn entry_of(&self, pid: Pid) -> Option<usize> {
        self.lookup_by_pid(pid).map(|p| p.entry)
    }

    pub fn entry_to_proc(&self, entry: usize) -> Option<&Proc> {
        self.procs.get(entry).filter(|p| p.is_live())
    }

    /// Table position of `proc`, if it is one of this table's live PCBs.
    pub fn proc_to_entry(&self, proc: &Proc) -> Option<usize> {
        let entry = proc.entry;
        let slot = self.procs.get(entry)?;
        (ptr::eq(slot, proc) && slot.is_live()).then_some(entry)
    }

    /// Slot access by entry, live or not.
    pub fn proc(&self, entry: usize) -> &Proc {
        &self.procs[entry]
    }

    pub fn proc_mut(&mut self, entry: usize) -> &mut Proc {
        &mut self.procs[entry]
    }

    pub fn live(&self) -> impl Iterator<Item = &Proc> {
        self.procs.iter().filter(|p| p.is_live())
    }

    pub fn live_mut(&mut self) -> impl Iterator<Item = &mut Proc> {
        self.procs.iter_mut().filter(|p| p.is_live())
    }

    /// Number of live processes.
    pub fn len(&self) -> usize {
        self.live().count()
    }

    pub fn free_entries(&self) -> usize {
        self.allocator.len()
    }

    pub fn exited_entries(&self) -> usize {
        self.exited.len()
    }

    pub fn trapframe(&self, entry: usize) -> &TrapFrame {
        self.stacks[entry].frame(self.procs[entry].trapframe)
    }

    pub fn trapframe_mut(&mut self, entry: usize) -> &mut TrapFrame {
        let offset = self.procs[entry].trapframe;
        self.stacks[entry].frame_mut(offset)
    }

    /// Address the trap exit path resumes `entry` from.
    pub fn trapframe_addr(&self, entry: usize) -> usize {
        self.stacks[entry].bottom() + self.procs[entry].trapframe
    }

    /// Entry whose stack contains `addr`.
    pub fn stack_holding(&self, addr: usize) -> Option<usize> {
        self.stacks
            .iter()
            .position(|s| (s.bottom()..s.bottom() + PROC_STACK_SIZE).contains(&addr))
    }

    /// Records a trapframe captured at `addr` for `entry`. Returns false if no
    /// whole frame fits in that stack at `addr`.
    pub fn record_trapframe(&mut self, entry: usize, addr: usize) -> bool {
        match self.stacks[entry].frame_offset(addr) {
            Some(offset) => {
                self.procs[entry].trapframe = offset;
                true
            }
            None => false,
        }
    }
}

impl Default for ProcTable {
    fn default() -> Self {
        Self::new()
    }
}
