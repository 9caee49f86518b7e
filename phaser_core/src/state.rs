//! Scope descriptors.
//!
//! A descriptor is an immutable policy object: it says which mutation
//! categories a scope buffers, whether the scope permits spawns, which scopes
//! may be entered while it is active, and how its buffers are committed when
//! the scope completes. Many live contexts share one descriptor instance.

use crate::context::PhaseContext;
use crate::error::PhaseError;
use crate::tracker::PhaseTracker;
use phaser_env::SpawnType;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Stable, comparable descriptor identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PhaseId(pub &'static str);

impl PhaseId {
    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shared handle to a descriptor.
pub type PhaseRef = Arc<dyn PhaseState>;

/// The small interface every kind of scope implements.
///
/// Capability predicates are pure functions of `(descriptor, context)`, so one
/// descriptor can behave differently depending on what a context opted into.
/// The defaults describe a scope that captures nothing, allows spawns and
/// accepts every transition.
pub trait PhaseState: fmt::Debug + Send + Sync {
    fn id(&self) -> PhaseId;

    /// Buffer structural block changes instead of applying them.
    fn does_bulk_block_capture(&self, _ctx: &PhaseContext) -> bool {
        false
    }

    /// Apply block changes speculatively, one event per change.
    fn does_block_event_tracking(&self, _ctx: &PhaseContext) -> bool {
        false
    }

    /// Buffer entity spawns instead of applying them.
    fn does_bulk_entity_capture(&self, _ctx: &PhaseContext) -> bool {
        false
    }

    /// Attribute item drops to the block at the context's capture position.
    fn tracks_block_specific_drops(&self, _ctx: &PhaseContext) -> bool {
        false
    }

    /// Buffer item drops per entity.
    fn tracks_entity_drops(&self, _ctx: &PhaseContext) -> bool {
        false
    }

    fn does_capture_item_drops(&self, _ctx: &PhaseContext) -> bool {
        false
    }

    fn does_capture_scheduled_ticks(&self, _ctx: &PhaseContext) -> bool {
        false
    }

    fn allows_entity_spawns(&self) -> bool {
        true
    }

    /// Neighbour notifications raised inside this scope do not open a nested scope.
    fn ignores_notifications(&self) -> bool {
        false
    }

    /// Commit captures under a dedicated unwinding scope.
    fn requires_post(&self) -> bool {
        false
    }

    /// Whether `next` may be entered directly while this scope is on top.
    fn can_switch_to(&self, _next: &dyn PhaseState) -> bool {
        true
    }

    fn spawn_type(&self) -> SpawnType {
        SpawnType::Passive
    }

    /// Drains the context's buffers and commits (or discards) them.
    ///
    /// Called at most once per completed scope, even when nothing was
    /// captured. The tracker is passed back in so commits can open nested
    /// scopes of their own.
    ///
    /// Skipped when the scope completes while `max_block_processing_depth`
    /// unwinds are already in progress: its captures are discarded and a
    /// [`ReportKind::MaxProcessingDepth`](crate::ReportKind::MaxProcessingDepth)
    /// report is emitted instead.
    fn unwind(&self, ctx: &mut PhaseContext, tracker: &mut PhaseTracker) -> Result<(), PhaseError>;
}
