//! Per-goroutine shadow call stack (spec §3 "Shadow call frame", §4.5.6,
//! P4). Frames are pushed on call and popped either on a matched return
//! or when an observation reveals the recorded stack size is no longer
//! below the current stack size (panic/defer/longjmp unwinds).

use std::collections::HashMap;

use crate::binary::types::FunctionId;

#[derive(Copy, Clone, Debug)]
pub struct ShadowFrame {
    pub function: FunctionId,
    pub return_address: u64,
    pub used_stack_size_at_entry: u64,
}

#[derive(Default)]
pub struct ShadowStacks {
    by_goroutine: HashMap<i64, Vec<ShadowFrame>>,
}

impl ShadowStacks {
    pub fn new() -> ShadowStacks {
        ShadowStacks::default()
    }

    pub fn depth(&self, goroutine_id: i64) -> usize {
        self.by_goroutine.get(&goroutine_id).map(Vec::len).unwrap_or(0)
    }

    pub fn peek(&self, goroutine_id: i64) -> Option<ShadowFrame> {
        self.by_goroutine.get(&goroutine_id).and_then(|s| s.last()).copied()
    }

    pub fn push(&mut self, goroutine_id: i64, frame: ShadowFrame) {
        self.by_goroutine.entry(goroutine_id).or_default().push(frame);
    }

    /// Pops every frame whose `used_stack_size_at_entry` is at or beyond
    /// `used_stack_size`, invoking `on_pop` for each so the caller can
    /// clear the matching conditional return breakpoint (spec §4.5.6).
    /// Returns the popped frames, outermost first.
    pub fn unwind_to<F: FnMut(&ShadowFrame)>(
        &mut self,
        goroutine_id: i64,
        used_stack_size: u64,
        mut on_pop: F,
    ) -> Vec<ShadowFrame> {
        let stack = self.by_goroutine.entry(goroutine_id).or_default();
        let mut popped = Vec::new();
        while let Some(top) = stack.last() {
            if top.used_stack_size_at_entry >= used_stack_size {
                let frame = stack.pop().unwrap();
                on_pop(&frame);
                popped.push(frame);
            } else {
                break;
            }
        }
        popped
    }

    pub fn drop_goroutine(&mut self, goroutine_id: i64) {
        self.by_goroutine.remove(&goroutine_id);
    }

    /// Frames deeper than (pushed after) the frame whose
    /// `used_stack_size_at_entry` equals `handler_used_stack_size` — the
    /// panic-machinery frames between the handler and the current PC
    /// that §4.5.9 says shouldn't count toward the printed depth. Since
    /// `used_stack_size_at_entry` strictly increases with call depth
    /// (P4), frames pushed after the handler have a *larger* value, not
    /// a smaller one.
    pub fn frames_above(&self, goroutine_id: i64, handler_used_stack_size: u64) -> usize {
        match self.by_goroutine.get(&goroutine_id) {
            Some(stack) => stack
                .iter()
                .filter(|f| f.used_stack_size_at_entry > handler_used_stack_size)
                .count(),
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(fid: usize, ret: u64, size: u64) -> ShadowFrame {
        ShadowFrame { function: FunctionId(fid), return_address: ret, used_stack_size_at_entry: size }
    }

    #[test]
    fn push_and_depth() {
        let mut s = ShadowStacks::new();
        s.push(1, frame(0, 0x10, 100));
        s.push(1, frame(1, 0x20, 120));
        assert_eq!(s.depth(1), 2);
    }

    #[test]
    fn unwind_to_pops_monotone_stale_frames() {
        let mut s = ShadowStacks::new();
        s.push(1, frame(0, 0x10, 100));
        s.push(1, frame(1, 0x20, 150));
        let mut popped_returns = Vec::new();
        s.unwind_to(1, 150, |f| popped_returns.push(f.return_address));
        assert_eq!(popped_returns, vec![0x20]);
        assert_eq!(s.depth(1), 1);
    }

    #[test]
    fn unwind_leaves_strictly_shallower_frames_alone() {
        let mut s = ShadowStacks::new();
        s.push(1, frame(0, 0x10, 100));
        s.unwind_to(1, 50, |_| {});
        assert_eq!(s.depth(1), 1);
    }

    #[test]
    fn frames_above_counts_only_deeper_frames() {
        let mut s = ShadowStacks::new();
        s.push(1, frame(0, 0x10, 100)); // ancestor, below the handler
        s.push(1, frame(1, 0x20, 150)); // the handler's own frame
        s.push(1, frame(2, 0x30, 200)); // panic-machinery frame above it
        s.push(1, frame(3, 0x40, 250)); // another one above it
        assert_eq!(s.frames_above(1, 150), 2);
    }

    #[test]
    fn drop_goroutine_clears_its_stack_only() {
        let mut s = ShadowStacks::new();
        s.push(1, frame(0, 0x10, 100));
        s.push(2, frame(0, 0x10, 100));
        s.drop_goroutine(1);
        assert_eq!(s.depth(1), 0);
        assert_eq!(s.depth(2), 1);
    }
}
