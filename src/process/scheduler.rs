// Round-robin process scheduler
//
// Queues hold pids only; the process table owns every PCB. A queued pid that
// no longer resolves, or a queue operation that fails, means the kernel state
// is corrupt and is fatal.
use crate::config::PROC_MAX;
use crate::process::pcb::{Pid, Proc, ProcState, SchedQueue, IDLE_PID};
use crate::process::table::ProcTable;
use crate::queue::{Queue, QueueError};

pub struct Scheduler {
    run_queue: Queue,
    sleep_queue: Queue,
    /// Table entry of the running process
    active: Option<usize>,
    timeslice: u32,
}

fn queue_failure(what: &str, err: QueueError) -> ! {
    panic!("scheduler: unable to {}: {}", what, err)
}

impl Scheduler {
    pub fn new(timeslice: u32) -> Self {
        Self {
            run_queue: Queue::new(PROC_MAX),
            sleep_queue: Queue::new(PROC_MAX),
            active: None,
            timeslice,
        }
    }

    /// Makes `proc` ready: back of the run queue, Idle, fresh time slice.
    ///
    /// The idle process is only marked Idle. It is never queued because every
    /// pass falls back to it when the run queue is empty.
    pub fn add(&mut self, proc: &mut Proc) {
        proc.state = ProcState::Idle;
        proc.cpu_time = 0;
        if proc.pid == IDLE_PID {
            proc.queue = SchedQueue::None;
            return;
        }
        proc.queue = SchedQueue::Run;
        if let Err(e) = self.run_queue.enqueue(proc.pid) {
            queue_failure("add a process to the run queue", e);
        }
    }

    /// Takes `proc` out of whichever queue lists it, keeping the order of the
    /// rest. Clears the active process if it was `proc`.
    pub fn remove(&mut self, proc: &mut Proc) {
        let queue = match proc.queue {
            SchedQueue::Run => Some(&mut self.run_queue),
            SchedQueue::Sleep => Some(&mut self.sleep_queue),
            SchedQueue::None => None,
        };

        if let Some(queue) = queue {
            for _ in 0..queue.len() {
                let pid = queue
                    .dequeue()
                    .unwrap_or_else(|e| queue_failure("drain a queue", e));
                if pid == proc.pid {
                    continue;
                }
                if let Err(e) = queue.enqueue(pid) {
                    queue_failure("requeue a process", e);
                }
            }
            proc.queue = SchedQueue::None;
        }

        if self.active == Some(proc.entry) {
            self.active = None;
        }
    }

    /// Puts `proc` to sleep until tick `now + ticks`. A wake tick past the end
    /// of the clock means the process never wakes.
    pub fn sleep(&mut self, proc: &mut Proc, ticks: u64, now: u64) {
        proc.sleep_time = now.saturating_add(ticks);
        proc.state = ProcState::Sleeping;
        self.remove(proc);
        proc.queue = SchedQueue::Sleep;
        if let Err(e) = self.sleep_queue.enqueue(proc.pid) {
            queue_failure("add a process to the sleep queue", e);
        }
    }

    /// Per-tick accounting for the running process. Makes no decision.
    pub fn tick(&self, table: &mut ProcTable) {
        if let Some(entry) = self.active {
            let proc = table.proc_mut(entry);
            proc.run_time += 1;
            proc.cpu_time += 1;
        }
    }

    /// One scheduling pass. Returns the pid left running.
    ///
    /// A process is preempted once it has used its time slice. The idle
    /// process ignores the time slice and is unscheduled on every pass.
    pub fn run(&mut self, table: &mut ProcTable, now: u64) -> Pid {
        // an exited process may still be recorded as active
        if let Some(entry) = self.active {
            if table.proc(entry).state != ProcState::Active {
                self.active = None;
            }
        }

        // idle yields on every pass so sleepers wake on their exact tick
        if let Some(entry) = self.active {
            let proc = table.proc_mut(entry);
            if proc.cpu_time >= self.timeslice || proc.pid == IDLE_PID {
                proc.cpu_time = 0;
                if proc.pid != IDLE_PID {
                    self.add(proc);
                } else {
                    proc.state = ProcState::Idle;
                }
                log::trace!("unscheduling process pid={}, name={}", proc.pid, proc.name());
                self.active = None;
            }
        }

        let entry = match self.active {
            Some(entry) => entry,
            None => {
                self.wake_sleepers(table, now);

                let pid = self.run_queue.dequeue().unwrap_or(IDLE_PID);
                let entry = table
                    .entry_of(pid)
                    .unwrap_or_else(|| panic!("scheduler: no process for queued pid {}", pid));
                let proc = table.proc_mut(entry);
                proc.queue = SchedQueue::None;
                log::trace!("scheduling process pid={}, name={}", proc.pid, proc.name());
                self.active = Some(entry);
                entry
            }
        };

        let proc = table.proc_mut(entry);
        proc.state = ProcState::Active;
        proc.pid
    }

    /// Sweeps the whole sleep queue once. Wake ticks are not ordered by queue
    /// position, so every sleeper is checked.
    fn wake_sleepers(&mut self, table: &mut ProcTable, now: u64) {
        for _ in 0..self.sleep_queue.len() {
            let pid = self
                .sleep_queue
                .dequeue()
                .unwrap_or_else(|e| queue_failure("drain the sleep queue", e));
            let entry = table
                .entry_of(pid)
                .unwrap_or_else(|| panic!("scheduler: no process for sleeping pid {}", pid));
            let proc = table.proc_mut(entry);

            if now >= proc.sleep_time {
                log::trace!("process pid={} woke up", pid);
                self.add(proc);
            } else if let Err(e) = self.sleep_queue.enqueue(pid) {
                queue_failure("requeue a sleeping process", e);
            }
        }
    }

    /// Table entry of the running process.
    pub fn active(&self) -> Option<usize> {
        self.active
    }

    pub fn run_queue_len(&self) -> usize {
        self.run_queue.len()
    }

    pub fn sleep_queue_len(&self) -> usize {
        self.sleep_queue.len()
    }

    pub fn is_runnable(&mut self, pid: Pid) -> bool {
        self.run_queue.contains(pid)
    }

    pub fn is_sleeping(&mut self, pid: Pid) -> bool {
        self.sleep_queue.contains(pid)
    }

    /// Pids in the run queue, front first.
    pub fn run_order(&mut self) -> alloc::vec::Vec<Pid> {
        let mut order = alloc::vec::Vec::with_capacity(self.run_queue.len());
        for _ in 0..self.run_queue.len() {
            let pid = self
                .run_queue
                .dequeue()
                .unwrap_or_else(|e| queue_failure("drain the run queue", e));
            order.push(pid);
            if let Err(e) = self.run_queue.enqueue(pid) {
                queue_failure("requeue a process", e);
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::context::Selectors;
    use crate::process::pcb::ProcType;
    use alloc::vec::Vec;

    extern "C" fn spin() -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    fn setup(timeslice: u32, workers: usize) -> (ProcTable, Scheduler) {
        let mut table = ProcTable::new();
        let mut sched = Scheduler::new(timeslice);
        for n in 0..=workers {
            let name = if n == 0 { "kernel_idle" } else { "worker" };
            table
                .create(&mut sched, spin, name, ProcType::Kernel, 0, Selectors::default())
                .unwrap();
        }
        (table, sched)
    }

    /// One timer interrupt followed by the pass at trap exit.
    fn step(table: &mut ProcTable, sched: &mut Scheduler, now: u64) -> Pid {
        sched.tick(table);
        let pid = sched.run(table, now);
        let active = table.live().filter(|p| p.state == ProcState::Active).count();
        assert_eq!(active, 1);
        pid
    }

    fn sleep(table: &mut ProcTable, sched: &mut Scheduler, pid: Pid, ticks: u64, now: u64) {
        let entry = table.entry_of(pid).unwrap();
        sched.sleep(table.proc_mut(entry), ticks, now);
    }

    #[test_case]
    fn test_round_robin_trace() {
        let (mut table, mut sched) = setup(5, 2);
        let trace: Vec<Pid> = (1..=20).map(|now| step(&mut table, &mut sched, now)).collect();
        assert_eq!(
            trace,
            [1, 1, 1, 1, 1, 2, 2, 2, 2, 2, 1, 1, 1, 1, 1, 2, 2, 2, 2, 2]
        );
    }

    #[test_case]
    fn test_idle_runs_only_when_nothing_is_ready() {
        let (mut table, mut sched) = setup(5, 0);
        assert_eq!(sched.run_queue_len(), 0);
        assert_eq!(step(&mut table, &mut sched, 1), IDLE_PID);
        assert_eq!(table.proc(0).queue, SchedQueue::None);
    }

    #[test_case]
    fn test_every_process_selected_within_window() {
        let workers = 4;
        let (mut table, mut sched) = setup(3, workers);
        let mut selections: Vec<Pid> = Vec::new();
        for now in 1..=100 {
            let pid = step(&mut table, &mut sched, now);
            if selections.last() != Some(&pid) {
                selections.push(pid);
            }
        }
        for window in selections.windows(workers) {
            for pid in 1..=workers as Pid {
                assert!(window.contains(&pid));
            }
        }
    }

    #[test_case]
    fn test_sleeper_absent_until_wake_tick() {
        let (mut table, mut sched) = setup(5, 1);
        for now in 1..=100 {
            assert_eq!(step(&mut table, &mut sched, now), 1);
        }

        sleep(&mut table, &mut sched, 1, 200, 100);
        assert!(sched.is_sleeping(1));
        assert!(!sched.is_runnable(1));
        assert_eq!(sched.run(&mut table, 100), IDLE_PID);

        for now in 101..300 {
            assert_eq!(step(&mut table, &mut sched, now), IDLE_PID);
            assert!(!sched.is_runnable(1));
            assert_eq!(table.lookup_by_pid(1).unwrap().state, ProcState::Sleeping);
        }
        assert_eq!(step(&mut table, &mut sched, 300), 1);
        assert!(!sched.is_sleeping(1));
    }

    #[test_case]
    fn test_sleep_past_end_of_clock() {
        let (mut table, mut sched) = setup(5, 1);
        sleep(&mut table, &mut sched, 1, u64::MAX.saturating_mul(100), 7);
        assert_eq!(table.lookup_by_pid(1).unwrap().sleep_time, u64::MAX);

        for now in 8..50 {
            assert_eq!(step(&mut table, &mut sched, now), IDLE_PID);
        }
        assert!(sched.is_sleeping(1));
        assert_eq!(sched.run(&mut table, u64::MAX - 1), IDLE_PID);
        assert!(sched.is_sleeping(1));
    }

    #[test_case]
    fn test_same_wake_tick_keeps_sleep_order() {
        let (mut table, mut sched) = setup(5, 2);
        sleep(&mut table, &mut sched, 2, 10, 0);
        sleep(&mut table, &mut sched, 1, 10, 0);
        assert_eq!(sched.run(&mut table, 0), IDLE_PID);

        for now in 1..10 {
            assert_eq!(step(&mut table, &mut sched, now), IDLE_PID);
        }
        assert_eq!(step(&mut table, &mut sched, 10), 2);
        assert_eq!(sched.run_order(), [1]);
    }

    #[test_case]
    fn test_remove_keeps_queue_order() {
        let (mut table, mut sched) = setup(5, 3);
        let entry = table.entry_of(2).unwrap();
        sched.remove(table.proc_mut(entry));
        assert_eq!(sched.run_order(), [1, 3]);
        assert_eq!(table.proc(entry).queue, SchedQueue::None);
    }
}
