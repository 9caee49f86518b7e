//! Phaser Core - Execution-Scope Stack with Causal Attribution
//!
//! This library keeps simulation side effects attributable and reversible:
//! 1. **Attribution**: every mutation is tagged with the scope it happened in
//!    (source, owner, notifier), including effects of effects
//! 2. **Transactions**: scopes buffer mutations and commit them as batched,
//!    cancellable events when they complete
//! 3. **Containment**: protocol violations are reported once and repaired,
//!    never propagated as panics
//!
//! # Example
//!
//! ```ignore
//! use phaser_core::{BuiltinPhase, PhaseTracker};
//! use phaser_env::{BlockPos, BlockState, ChangeFlags, ListenerBus};
//!
//! let mut tracker = PhaseTracker::new(world, ListenerBus::new());
//! let tick = BuiltinPhase::BlockTick.into_ref();
//!
//! let mut ctx = tracker.create_context(&tick);
//! ctx.add_captures()?;
//! tracker.scoped(ctx, |t| {
//!     t.set_block_state(BlockPos::new(0, 64, 0), BlockState(1), ChangeFlags::ALL);
//! })?;
//! ```

pub mod capture;
pub mod config;
pub mod context;
pub mod deferred;
pub mod diagnostics;
pub mod error;
pub mod phases;
pub mod pool;
pub mod processing;
pub mod stack;
pub mod state;
pub mod tracker;

#[cfg(test)]
mod testing;

// Re-export key types for convenience
pub use capture::{
    BlockDrop, BlockDrops, BlockEntitySpawns, BlockSpawn, Blocks, CaptureBuffer, CaptureCategory, CaptureKind,
    Captures, Entities, EntityDrop, EntityDrops, ItemDrops, ScheduledTicks,
};
pub use config::{AsyncPolicy, TrackerConfig};
pub use context::PhaseContext;
pub use deferred::AsyncMutations;
pub use diagnostics::{DiagnosticSink, Diagnostics, MemorySink, Report, ReportBuilder, ReportKind, TracingSink};
pub use error::{ConfigError, PhaseError};
pub use phases::BuiltinPhase;
pub use pool::ContextPool;
pub use processing::unwind_captures;
pub use stack::{PhaseData, PhaseStack};
pub use state::{PhaseId, PhaseRef, PhaseState};
pub use tracker::{MutationOutcome, PhaseGuard, PhaseTracker, TrackerStats};
