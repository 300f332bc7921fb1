// Register snapshots and the per-process stacks that hold them
//
// A process is resumed by pointing the trap exit path at its trapframe; there
// is no separate save area. Each stack owns its process's snapshot.
use core::mem::{align_of, size_of};

use crate::config::PROC_STACK_SIZE;

/// RFLAGS for a fresh process: reserved bit 1 plus IF.
pub const RFLAGS_DEFAULT: u64 = 0x202;

/// Register state captured by trap entry, lowest address first.
///
/// The general-purpose registers are pushed by the trampolines in
/// `interrupts`; `rip` through `ss` are pushed by the CPU. Keep the two in
/// sync.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrapFrame {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,

    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl TrapFrame {
    pub const SIZE: usize = size_of::<TrapFrame>();

    /// Frame that starts a process at `entry` with its stack pointer at `rsp`.
    pub fn new_process(entry: u64, rsp: u64, selectors: Selectors) -> Self {
        Self {
            rip: entry,
            rflags: RFLAGS_DEFAULT,
            cs: selectors.cs,
            ss: selectors.ss,
            rsp,
            ..Self::default()
        }
    }
}

/// Segment selectors copied from the kernel into every new trapframe.
///
/// Processes share the kernel's protection context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Selectors {
    pub cs: u64,
    pub ss: u64,
}

/// One process stack. 16-byte aligned so the trapframe at its top is too.
#[repr(C, align(16))]
pub struct ProcStack([u8; PROC_STACK_SIZE]);

impl ProcStack {
    /// Offset of the initial trapframe: the snapshot sits at the very top.
    pub const INITIAL_FRAME: usize = PROC_STACK_SIZE - TrapFrame::SIZE;

    pub const fn zeroed() -> Self {
        Self([0; PROC_STACK_SIZE])
    }

    pub fn clear(&mut self) {
        self.0.fill(0);
    }

    /// Lowest address of the region.
    pub fn bottom(&self) -> usize {
        self.0.as_ptr() as usize
    }

    /// One past the highest address; where a downward-growing stack begins.
    pub fn top(&self) -> usize {
        self.bottom() + PROC_STACK_SIZE
    }

    /// Offset of a trapframe at `addr`, if a whole frame fits in this stack there.
    pub fn frame_offset(&self, addr: usize) -> Option<usize> {
        let offset = addr.checked_sub(self.bottom())?;
        (Self::is_frame_offset(offset)).then_some(offset)
    }

    pub fn frame(&self, offset: usize) -> &TrapFrame {
        assert!(
            Self::is_frame_offset(offset),
            "trapframe offset {:#x} out of bounds",
            offset
        );
        // SAFETY: the offset is aligned and the frame lies inside the buffer;
        // TrapFrame is plain u64 fields, valid for any bit pattern.
        unsafe { &*(self.0.as_ptr().add(offset) as *const TrapFrame) }
    }

    pub fn frame_mut(&mut self, offset: usize) -> &mut TrapFrame {
        assert!(
            Self::is_frame_offset(offset),
            "trapframe offset {:#x} out of bounds",
            offset
        );
        // SAFETY: as in `frame`, and `&mut self` makes the access exclusive.
        unsafe { &mut *(self.0.as_mut_ptr().add(offset) as *mut TrapFrame) }
    }

    fn is_frame_offset(offset: usize) -> bool {
        offset % align_of::<TrapFrame>() == 0 && offset <= Self::INITIAL_FRAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;

    #[test_case]
    fn test_trapframe_layout() {
        assert_eq!(TrapFrame::SIZE, 20 * 8);
        assert_eq!(ProcStack::INITIAL_FRAME % 16, 0);
    }

    #[test_case]
    fn test_initial_frame_sits_at_top() {
        let mut stack = Box::new(ProcStack::zeroed());
        let selectors = Selectors { cs: 0x08, ss: 0x10 };
        *stack.frame_mut(ProcStack::INITIAL_FRAME) =
            TrapFrame::new_process(0x1234, stack.top() as u64, selectors);

        let frame = stack.frame(ProcStack::INITIAL_FRAME);
        assert_eq!(frame.rip, 0x1234);
        assert_eq!(frame.rflags, RFLAGS_DEFAULT);
        assert_eq!(frame.cs, 0x08);
        assert_eq!(frame.ss, 0x10);
        let frame_addr = frame as *const TrapFrame as usize;
        assert_eq!(frame_addr + TrapFrame::SIZE, stack.top());
    }

    #[test_case]
    fn test_frame_offset_bounds() {
        let stack = Box::new(ProcStack::zeroed());
        let bottom = stack.bottom();
        assert_eq!(stack.frame_offset(bottom), Some(0));
        assert_eq!(
            stack.frame_offset(bottom + ProcStack::INITIAL_FRAME),
            Some(ProcStack::INITIAL_FRAME)
        );
        assert_eq!(stack.frame_offset(bottom + ProcStack::INITIAL_FRAME + 8), None);
        assert_eq!(stack.frame_offset(bottom + 4), None);
        assert_eq!(stack.frame_offset(bottom - 8), None);
    }
}
