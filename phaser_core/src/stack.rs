//! LIFO stack of active scopes.

use crate::context::PhaseContext;
use crate::diagnostics::ReportBuilder;
use crate::error::PhaseError;
use crate::state::{PhaseId, PhaseRef};

/// A descriptor paired with its live context.
#[derive(Debug)]
pub struct PhaseData {
    pub state: PhaseRef,
    pub context: PhaseContext,
}

impl PhaseData {
    pub fn phase(&self) -> PhaseId {
        self.state.id()
    }
}

/// The scope stack.
///
/// An empty stack behaves as if the sentinel ("complete") scope were on top,
/// so [`PhaseStack::peek`] always has an answer. The stack is not internally
/// synchronized; only the owning tracker touches it.
#[derive(Debug)]
pub struct PhaseStack {
    frames: Vec<PhaseData>,
    sentinel: PhaseData,
}

impl PhaseStack {
    /// Creates an empty stack whose sentinel uses `complete`.
    pub fn new(complete: PhaseRef) -> Self {
        Self {
            frames: Vec::with_capacity(16),
            sentinel: PhaseData {
                state: complete.clone(),
                context: PhaseContext::empty(complete),
            },
        }
    }

    /// Pushes a switched context.
    pub fn push(&mut self, state: PhaseRef, context: PhaseContext) -> Result<(), PhaseError> {
        if !context.is_switched() {
            return Err(PhaseError::NotSwitched);
        }
        self.frames.push(PhaseData { state, context });
        Ok(())
    }

    /// Removes the top frame. `None` on an empty stack.
    pub fn pop(&mut self) -> Option<PhaseData> {
        self.frames.pop()
    }

    /// The top frame, or the sentinel when empty.
    pub fn peek(&self) -> &PhaseData {
        self.frames.last().unwrap_or(&self.sentinel)
    }

    /// The top real frame. The sentinel is never handed out mutably.
    pub fn peek_mut(&mut self) -> Option<&mut PhaseData> {
        self.frames.last_mut()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frames from top to bottom.
    pub fn iter(&self) -> impl Iterator<Item = &PhaseData> {
        self.frames.iter().rev()
    }

    /// True once the stack has reached `threshold` frames.
    pub fn check_for_runaways(&self, threshold: usize) -> bool {
        self.frames.len() >= threshold
    }

    /// Renders every frame, top first.
    pub fn dump(&self) -> Vec<String> {
        let mut report = ReportBuilder::detached();
        if self.frames.is_empty() {
            report.add(format!("  {} (empty stack)", self.sentinel.phase()));
        }
        for (i, frame) in self.iter().enumerate() {
            report.add(format!("  #{} {}", self.frames.len() - i, frame.phase()));
            frame.context.print_custom(&mut report, 6);
        }
        report.into_lines()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BuiltinPhase;

    fn stack() -> PhaseStack {
        PhaseStack::new(BuiltinPhase::Complete.into_ref())
    }

    fn switched(phase: BuiltinPhase) -> (PhaseRef, PhaseContext) {
        let state = phase.into_ref();
        let mut ctx = PhaseContext::new(state.clone());
        ctx.mark_switched();
        (state, ctx)
    }

    #[test]
    fn test_peek_on_empty_returns_sentinel() {
        let mut stack = stack();
        assert!(stack.is_empty());
        assert_eq!(stack.peek().phase(), BuiltinPhase::Complete.phase_id());
        assert!(stack.peek().context.is_empty());
        assert!(stack.peek_mut().is_none());
        assert!(stack.pop().is_none());
    }

    #[test]
    fn test_push_requires_switched() {
        let mut stack = stack();
        let state = BuiltinPhase::BlockTick.into_ref();
        let ctx = PhaseContext::new(state.clone());
        assert_eq!(stack.push(state, ctx).unwrap_err(), PhaseError::NotSwitched);
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn test_lifo_order() {
        let mut stack = stack();
        let (s, c) = switched(BuiltinPhase::BlockTick);
        stack.push(s, c).unwrap();
        let (s, c) = switched(BuiltinPhase::NeighborNotify);
        stack.push(s, c).unwrap();

        assert_eq!(stack.depth(), 2);
        let order: Vec<PhaseId> = stack.iter().map(|f| f.phase()).collect();
        assert_eq!(
            order,
            vec![BuiltinPhase::NeighborNotify.phase_id(), BuiltinPhase::BlockTick.phase_id()]
        );
        assert_eq!(stack.pop().map(|f| f.phase()), Some(BuiltinPhase::NeighborNotify.phase_id()));
        assert_eq!(stack.peek().phase(), BuiltinPhase::BlockTick.phase_id());
    }

    #[test]
    fn test_runaway_threshold() {
        let mut stack = stack();
        for _ in 0..5 {
            let (s, c) = switched(BuiltinPhase::NeighborNotify);
            stack.push(s, c).unwrap();
        }
        assert!(!stack.check_for_runaways(6));
        let (s, c) = switched(BuiltinPhase::NeighborNotify);
        stack.push(s, c).unwrap();
        assert!(stack.check_for_runaways(6));
        assert_eq!(stack.dump().iter().filter(|l| l.contains("neighbor_notify")).count(), 6);
    }
}
