//! Per-descriptor context caches.
//!
//! Hot descriptors (neighbour notification, unwinding) are entered many
//! times per tick. Each keeps at most `capacity` reset contexts around.

use crate::context::PhaseContext;
use crate::state::{PhaseId, PhaseRef};
use std::collections::HashMap;

#[derive(Debug)]
pub struct ContextPool {
    caches: HashMap<PhaseId, Vec<PhaseContext>>,
    capacity: usize,
    reused: u64,
}

impl ContextPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            caches: HashMap::new(),
            capacity,
            reused: 0,
        }
    }

    /// Returns a pristine context for `state`, recycled when one is cached.
    pub fn acquire(&mut self, state: &PhaseRef) -> PhaseContext {
        match self.caches.get_mut(&state.id()).and_then(|cache| cache.pop()) {
            Some(mut ctx) => {
                self.reused += 1;
                ctx.reset(state.clone());
                ctx
            }
            None => PhaseContext::new(state.clone()),
        }
    }

    /// Resets `ctx` and keeps it if its descriptor's cache has room.
    pub fn release(&mut self, mut ctx: PhaseContext) {
        if self.capacity == 0 || ctx.is_empty() {
            return;
        }
        let state = ctx.state().clone();
        let cache = self.caches.entry(state.id()).or_default();
        if cache.len() < self.capacity {
            ctx.reset(state);
            cache.push(ctx);
        }
    }

    /// Cached contexts for `phase`.
    pub fn cached(&self, phase: PhaseId) -> usize {
        self.caches.get(&phase).map_or(0, Vec::len)
    }

    /// Number of acquisitions served from a cache.
    pub fn reused(&self) -> u64 {
        self.reused
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Blocks, CaptureCategory};
    use crate::BuiltinPhase;
    use phaser_env::{BlockPos, BlockState, BlockTransaction, ChangeFlags, UserId};

    #[test]
    fn test_release_caps_per_descriptor() {
        let state = BuiltinPhase::NeighborNotify.into_ref();
        let mut pool = ContextPool::new(2);
        for _ in 0..5 {
            pool.release(PhaseContext::new(state.clone()));
        }
        assert_eq!(pool.cached(state.id()), 2);
        assert_eq!(pool.cached(BuiltinPhase::Unwinding.phase_id()), 0);
    }

    #[test]
    fn test_recycled_context_is_reset() {
        let state = BuiltinPhase::BlockTick.into_ref();
        let mut pool = ContextPool::new(1);

        let mut ctx = pool.acquire(&state);
        ctx.set_owner(UserId::from_seed(1)).unwrap().add_captures().unwrap();
        ctx.mark_switched();
        {
            let blocks = ctx.buffer_mut::<Blocks>().unwrap();
            for x in 0..16 {
                blocks.push(BlockTransaction::new(
                    BlockPos::new(x, 64, 0),
                    BlockState::AIR,
                    BlockState(1),
                    ChangeFlags::ALL,
                ));
            }
            blocks.drain();
        }
        pool.release(ctx);

        let mut ctx = pool.acquire(&state);
        assert_eq!(pool.reused(), 1);
        assert!(!ctx.is_switched());
        assert_eq!(ctx.owner(), None);
        assert!(!ctx.has_captures());
        assert!(ctx.captures().enabled().is_empty());
        assert!(!ctx.is_capturing(CaptureCategory::Blocks));
        assert!(ctx.buffer_mut::<Blocks>().is_err());

        ctx.add_captures().unwrap();
        let blocks = ctx.buffer_mut::<Blocks>().unwrap();
        assert!(blocks.is_empty());
        assert!(blocks.capacity() >= 16);
    }

    #[test]
    fn test_zero_capacity_disables_caching() {
        let state = BuiltinPhase::BlockTick.into_ref();
        let mut pool = ContextPool::new(0);
        pool.release(PhaseContext::new(state.clone()));
        assert_eq!(pool.cached(state.id()), 0);
    }
}
