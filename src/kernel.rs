// Kernel context: owner of the process table, scheduler and timer
//
// All core state lives in one `Kernel`. The booted instance sits behind a
// spin lock in `KERNEL` and is only touched from trap handlers or with
// interrupts disabled; tests build their own instances.
use conquer_once::spin::OnceCell;
use spin::Mutex;
use x86_64::instructions::interrupts;

use crate::config::{KernelConfig, IO_BUF_SIZE, PROC_IO_OUT};
use crate::print;
use crate::process::{
    Pid, Proc, ProcEntry, ProcTable, ProcType, ProcessError, Scheduler, Selectors, TrapFrame,
    IDLE_PID,
};
use crate::timer::{Repeat, Timer};

static KERNEL: OnceCell<Mutex<Kernel>> = OnceCell::uninit();

/// Body of pid 0. Runs whenever nothing else is ready.
extern "C" fn kernel_idle() -> ! {
    loop {
        interrupts::enable_and_hlt();
    }
}

/// Per-tick scheduler accounting, registered as the first timer callback.
fn scheduler_tick(kernel: &mut Kernel) {
    kernel.scheduler.tick(&mut kernel.procs);
}

/// Moves buffered process output to the display.
fn drain_console(kernel: &mut Kernel) {
    kernel.drain_output(|name, bytes| {
        print!("[{}] ", name);
        for &byte in bytes {
            print!("{}", byte as char);
        }
    });
}

pub struct Kernel {
    config: KernelConfig,
    selectors: Selectors,
    timer: Timer,
    procs: ProcTable,
    scheduler: Scheduler,
    /// Entry whose stack holds the frame of the trap being handled
    trap_entry: Option<usize>,
    /// Address of that frame, for as long as the trap is handled
    trap_frame: Option<usize>,
}

impl Kernel {
    /// Builds the core state and the idle process.
    pub fn new(config: KernelConfig, selectors: Selectors) -> Self {
        let mut kernel = Self {
            config,
            selectors,
            timer: Timer::new(),
            procs: ProcTable::new(),
            scheduler: Scheduler::new(config.timeslice),
            trap_entry: None,
            trap_frame: None,
        };

        if let Err(e) = kernel.timer.register(scheduler_tick, 1, Repeat::Forever) {
            panic!("unable to register the scheduler tick: {}", e);
        }
        if config.console_interval > 0 {
            let interval = u64::from(config.console_interval);
            if let Err(e) = kernel.timer.register(drain_console, interval, Repeat::Forever) {
                panic!("unable to register the console drain: {}", e);
            }
        }

        match kernel.create(kernel_idle, "kernel_idle", ProcType::Kernel) {
            Ok(IDLE_PID) => {}
            Ok(pid) => panic!("idle process created with pid {}", pid),
            Err(e) => panic!("unable to create the idle process: {}", e),
        }
        kernel
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Ticks since boot.
    pub fn ticks(&self) -> u64 {
        self.timer.ticks()
    }

    pub fn timer_mut(&mut self) -> &mut Timer {
        &mut self.timer
    }

    pub fn procs(&self) -> &ProcTable {
        &self.procs
    }

    pub fn procs_mut(&mut self) -> &mut ProcTable {
        &mut self.procs
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    pub fn create(
        &mut self,
        entry_point: ProcEntry,
        name: &str,
        kind: ProcType,
    ) -> Result<Pid, ProcessError> {
        let now = self.timer.ticks();
        self.procs
            .create(&mut self.scheduler, entry_point, name, kind, now, self.selectors)
            .map_err(|e| {
                log::warn!("unable to create process {}: {}", name, e);
                e
            })
    }

    /// Destroys `pid`. A process whose stack the current trap runs on is only
    /// retired; its entry is reclaimed by a later trap.
    pub fn destroy(&mut self, pid: Pid) -> Result<(), ProcessError> {
        match self.procs.entry_of(pid) {
            Some(entry) if pid != IDLE_PID && Some(entry) == self.trap_entry => {
                self.procs.retire(&mut self.scheduler, entry);
                Ok(())
            }
            _ => self.procs.destroy(&mut self.scheduler, pid).map_err(|e| {
                log::warn!("unable to destroy process {}: {}", pid, e);
                e
            }),
        }
    }

    pub fn lookup(&self, pid: Pid) -> Option<&Proc> {
        self.procs.lookup_by_pid(pid)
    }

    /// Puts `pid` to sleep for `ticks` timer ticks. The idle process never
    /// sleeps.
    pub fn sleep(&mut self, pid: Pid, ticks: u64) -> Result<(), ProcessError> {
        if pid == IDLE_PID {
            return Err(ProcessError::Invalid);
        }
        let entry = self.procs.entry_of(pid).ok_or(ProcessError::Invalid)?;
        let now = self.timer.ticks();
        self.scheduler.sleep(self.procs.proc_mut(entry), ticks, now);
        Ok(())
    }

    /// Ends the active process. The next scheduling pass picks a successor.
    pub fn exit_active(&mut self) -> Result<Pid, ProcessError> {
        let entry = self.scheduler.active().ok_or(ProcessError::Invalid)?;
        let pid = self.procs.proc(entry).pid;
        if pid == IDLE_PID {
            return Err(ProcessError::Invalid);
        }
        self.procs.retire(&mut self.scheduler, entry);
        Ok(pid)
    }

    /// The running process.
    pub fn active(&self) -> Option<&Proc> {
        self.scheduler.active().and_then(|e| self.procs.entry_to_proc(e))
    }

    pub fn active_trapframe_mut(&mut self) -> Option<&mut TrapFrame> {
        let entry = self.scheduler.active()?;
        Some(self.procs.trapframe_mut(entry))
    }

    /// Advances the clock one tick and runs every callback due on it.
    pub fn timer_interrupt(&mut self) {
        let due = self.timer.advance();
        for callback in due.into_iter().flatten() {
            callback(self);
        }
    }

    /// One scheduling pass at the current tick.
    pub fn schedule(&mut self) -> Pid {
        let now = self.timer.ticks();
        self.scheduler.run(&mut self.procs, now)
    }

    /// Records the frame a trap saved at `frame_addr` and reclaims exited
    /// entries that are no longer executing.
    pub fn trap_enter(&mut self, frame_addr: usize) {
        self.trap_frame = Some(frame_addr);
        self.trap_entry = self.procs.stack_holding(frame_addr);
        if let Some(entry) = self.scheduler.active() {
            if Some(entry) == self.trap_entry && !self.procs.record_trapframe(entry, frame_addr) {
                panic!(
                    "trapframe at {:#x} does not fit the stack of entry {}",
                    frame_addr, entry
                );
            }
        }
        self.procs.reap(self.trap_entry);
    }

    /// Registers saved by the trap being handled, wherever they were pushed.
    pub fn trapped_frame(&self) -> Option<TrapFrame> {
        let addr = self.trap_frame?;
        // SAFETY: `trap_enter` received this address from the trap path, and
        // the frame stays in place until `trap_exit`.
        Some(unsafe { core::ptr::read(addr as *const TrapFrame) })
    }

    /// Runs the scheduling pass and returns the frame address to resume.
    pub fn trap_exit(&mut self) -> usize {
        self.schedule();
        self.trap_entry = None;
        self.trap_frame = None;
        match self.scheduler.active() {
            Some(entry) => self.procs.trapframe_addr(entry),
            None => panic!("no process selectable"),
        }
    }

    /// Hands each process's buffered output to `sink`, emptying the buffers.
    pub fn drain_output(&mut self, mut sink: impl FnMut(&str, &[u8])) {
        let mut chunk = [0u8; IO_BUF_SIZE];
        for proc in self.procs.live_mut() {
            let n = match proc.io[PROC_IO_OUT].as_mut() {
                Some(out) => out.read(&mut chunk),
                None => 0,
            };
            if n > 0 {
                sink(proc.name(), &chunk[..n]);
            }
        }
    }

    /// Logs the process table.
    pub fn dump(&self) {
        log::info!(
            "tick {}: {} processes, run queue {}, sleep queue {}",
            self.ticks(),
            self.procs.len(),
            self.scheduler.run_queue_len(),
            self.scheduler.sleep_queue_len()
        );
        for proc in self.procs.live() {
            log::info!(
                "  pid={} name={} kind={:?} state={:?} queue={:?} run={} cpu={}",
                proc.pid,
                proc.name(),
                proc.kind,
                proc.state,
                proc.queue,
                proc.run_time,
                proc.cpu_time
            );
        }
    }
}

/// Builds the global kernel context. Called once during boot.
pub fn boot(config: KernelConfig, selectors: Selectors) {
    let kernel = Kernel::new(config, selectors);
    if KERNEL.try_init_once(|| Mutex::new(kernel)).is_err() {
        panic!("kernel context initialized twice");
    }
    log::info!("kernel context ready, timeslice {} ticks", config.timeslice);
}

/// Runs `f` on the global kernel with interrupts disabled. Returns `None`
/// before `boot`.
pub fn with_kernel<R>(f: impl FnOnce(&mut Kernel) -> R) -> Option<R> {
    interrupts::without_interrupts(|| {
        let kernel = KERNEL.try_get().ok()?;
        let mut guard = kernel.lock();
        Some(f(&mut guard))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcState;
    use alloc::string::String;
    use alloc::vec::Vec;

    extern "C" fn spin() -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    fn quiet_kernel() -> Kernel {
        let config = KernelConfig {
            console_interval: 0,
            ..KernelConfig::DEFAULT
        };
        Kernel::new(config, Selectors::default())
    }

    /// One timer interrupt: callbacks, then the pass at trap exit.
    fn tick(kernel: &mut Kernel) -> Pid {
        kernel.timer_interrupt();
        kernel.schedule()
    }

    #[test_case]
    fn test_new_creates_idle() {
        let kernel = quiet_kernel();
        let idle = kernel.lookup(IDLE_PID).unwrap();
        assert_eq!(idle.name(), "kernel_idle");
        assert_eq!(kernel.procs().len(), 1);
        assert_eq!(kernel.scheduler().run_queue_len(), 0);
    }

    #[test_case]
    fn test_timer_drives_round_robin() {
        let mut kernel = quiet_kernel();
        kernel.create(spin, "A", ProcType::Kernel).unwrap();
        kernel.create(spin, "B", ProcType::Kernel).unwrap();
        let trace: Vec<Pid> = (0..20).map(|_| tick(&mut kernel)).collect();
        assert_eq!(
            trace,
            [1, 1, 1, 1, 1, 2, 2, 2, 2, 2, 1, 1, 1, 1, 1, 2, 2, 2, 2, 2]
        );
        assert_eq!(kernel.lookup(1).unwrap().run_time, 10);
    }

    #[test_case]
    fn test_destroy_idle_fails() {
        let mut kernel = quiet_kernel();
        assert_eq!(kernel.destroy(IDLE_PID), Err(ProcessError::Invalid));
        assert_eq!(kernel.destroy(IDLE_PID), Err(ProcessError::Invalid));
        assert!(kernel.lookup(IDLE_PID).is_some());
    }

    #[test_case]
    fn test_destroy_active_falls_back_to_idle() {
        let mut kernel = quiet_kernel();
        let pid = kernel.create(spin, "doomed", ProcType::Kernel).unwrap();
        assert_eq!(tick(&mut kernel), pid);
        kernel.destroy(pid).unwrap();
        assert!(kernel.active().is_none());
        assert_eq!(kernel.schedule(), IDLE_PID);
    }

    #[test_case]
    fn test_exit_is_reaped_after_leaving_stack() {
        let mut kernel = quiet_kernel();
        let pid = kernel.create(spin, "short", ProcType::Kernel).unwrap();
        assert_eq!(tick(&mut kernel), pid);
        let entry = kernel.scheduler().active().unwrap();
        let frame = kernel.procs().trapframe_addr(entry);
        let free = kernel.procs().free_entries();

        // the exit syscall traps on the process's own stack
        kernel.trap_enter(frame);
        assert_eq!(kernel.exit_active(), Ok(pid));
        kernel.trap_enter(frame);
        assert!(kernel.lookup(pid).is_none());
        assert_eq!(kernel.procs().free_entries(), free);

        let resume = kernel.trap_exit();
        assert_eq!(kernel.active().unwrap().pid, IDLE_PID);
        kernel.trap_enter(resume);
        assert_eq!(kernel.procs().free_entries(), free + 1);
        assert_eq!(kernel.procs().exited_entries(), 0);
    }

    #[test_case]
    fn test_trap_enter_records_frame() {
        let mut kernel = quiet_kernel();
        let pid = kernel.create(spin, "p", ProcType::Kernel).unwrap();
        tick(&mut kernel);
        let entry = kernel.procs().entry_of(pid).unwrap();
        let deeper = kernel.procs().trapframe_addr(entry) - 256;
        kernel.trap_enter(deeper);
        assert_eq!(kernel.trap_exit(), deeper);
    }

    #[test_case]
    fn test_trapped_frame_outside_processes() {
        let mut kernel = quiet_kernel();
        assert!(kernel.trapped_frame().is_none());

        let frame = TrapFrame {
            rax: 5,
            ..TrapFrame::default()
        };
        kernel.trap_enter(&frame as *const TrapFrame as usize);
        assert!(kernel.active().is_none());
        assert_eq!(kernel.trapped_frame().unwrap().rax, 5);

        kernel.trap_exit();
        assert!(kernel.trapped_frame().is_none());
    }

    #[test_case]
    fn test_sleep_wakes_on_tick() {
        let mut kernel = quiet_kernel();
        let pid = kernel.create(spin, "sleeper", ProcType::Kernel).unwrap();
        while kernel.ticks() < 100 {
            assert_eq!(tick(&mut kernel), pid);
        }
        kernel.sleep(pid, 200).unwrap();
        assert_eq!(kernel.schedule(), IDLE_PID);
        while kernel.ticks() < 299 {
            assert_eq!(tick(&mut kernel), IDLE_PID);
            assert_eq!(kernel.lookup(pid).unwrap().state, ProcState::Sleeping);
        }
        assert_eq!(tick(&mut kernel), pid);
        assert_eq!(kernel.ticks(), 300);
        assert_eq!(kernel.sleep(IDLE_PID, 1), Err(ProcessError::Invalid));
    }

    #[test_case]
    fn test_drain_output() {
        let mut kernel = quiet_kernel();
        let pid = kernel.create(spin, "writer", ProcType::Kernel).unwrap();
        let entry = kernel.procs().entry_of(pid).unwrap();
        if let Some(out) = kernel.procs_mut().proc_mut(entry).io[PROC_IO_OUT].as_mut() {
            out.write(b"hello");
        }

        let mut seen = String::new();
        kernel.drain_output(|name, bytes| {
            seen.push_str(name);
            seen.push(':');
            seen.push_str(core::str::from_utf8(bytes).unwrap());
        });
        assert_eq!(seen, "writer:hello");

        let mut calls = 0;
        kernel.drain_output(|_, _| calls += 1);
        assert_eq!(calls, 0);
    }
}
