// Process management: PCBs, the process table and the scheduler
pub mod context;
pub mod pcb;
pub mod scheduler;
pub mod table;

pub use context::{ProcStack, Selectors, TrapFrame};
pub use pcb::{Pid, Proc, ProcEntry, ProcState, ProcType, ProcessError, SchedQueue, IDLE_PID};
pub use scheduler::Scheduler;
pub use table::ProcTable;
