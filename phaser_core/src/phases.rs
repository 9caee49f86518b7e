//! Built-in scope kinds.
//!
//! Each kind is a value in a policy table rather than a subclass. The table
//! is consulted by the [`PhaseState`] predicates together with what the
//! context opted into.

use crate::capture::CaptureCategory;
use crate::context::PhaseContext;
use crate::error::PhaseError;
use crate::processing;
use crate::state::{PhaseId, PhaseRef, PhaseState};
use crate::tracker::PhaseTracker;
use phaser_env::SpawnType;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BuiltinPhase {
    /// Sentinel at the bottom of every stack
    Complete,
    /// Commits the captures of a completed scope
    Unwinding,
    NeighborNotify,
    BlockTick,
    EntityTick,
    /// A user acting on the world
    Interaction,
    Explosion,
    /// Silent rollback of a cancelled speculative change
    Restoration,
    WorldGeneration,
    Plugin,
    /// Replay of mutations submitted from foreign threads
    DeferredReplay,
}

/// Capability row of the policy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Policy {
    bulk_blocks: bool,
    block_events: bool,
    bulk_entities: bool,
    block_drops: bool,
    entity_drops: bool,
    item_drops: bool,
    ticks: bool,
    spawns: bool,
    ignores_notifications: bool,
    requires_post: bool,
    spawn_type: SpawnType,
}

const INERT: Policy = Policy {
    bulk_blocks: false,
    block_events: false,
    bulk_entities: false,
    block_drops: false,
    entity_drops: false,
    item_drops: false,
    ticks: false,
    spawns: true,
    ignores_notifications: false,
    requires_post: false,
    spawn_type: SpawnType::Passive,
};

const CAPTURING: Policy = Policy {
    bulk_blocks: true,
    bulk_entities: true,
    block_drops: true,
    item_drops: true,
    requires_post: true,
    ..INERT
};

impl BuiltinPhase {
    pub const ALL: [BuiltinPhase; 11] = [
        BuiltinPhase::Complete,
        BuiltinPhase::Unwinding,
        BuiltinPhase::NeighborNotify,
        BuiltinPhase::BlockTick,
        BuiltinPhase::EntityTick,
        BuiltinPhase::Interaction,
        BuiltinPhase::Explosion,
        BuiltinPhase::Restoration,
        BuiltinPhase::WorldGeneration,
        BuiltinPhase::Plugin,
        BuiltinPhase::DeferredReplay,
    ];

    pub const fn phase_id(self) -> PhaseId {
        PhaseId(match self {
            BuiltinPhase::Complete => "complete",
            BuiltinPhase::Unwinding => "unwinding",
            BuiltinPhase::NeighborNotify => "neighbor_notify",
            BuiltinPhase::BlockTick => "block_tick",
            BuiltinPhase::EntityTick => "entity_tick",
            BuiltinPhase::Interaction => "interaction",
            BuiltinPhase::Explosion => "explosion",
            BuiltinPhase::Restoration => "restoration",
            BuiltinPhase::WorldGeneration => "world_generation",
            BuiltinPhase::Plugin => "plugin",
            BuiltinPhase::DeferredReplay => "deferred_replay",
        })
    }

    /// Looks a built-in kind up by its id.
    pub fn from_id(id: PhaseId) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.phase_id() == id)
    }

    /// Wraps the kind in a shared descriptor handle.
    pub fn into_ref(self) -> PhaseRef {
        Arc::new(self)
    }

    fn policy(self) -> Policy {
        match self {
            BuiltinPhase::Complete => INERT,
            BuiltinPhase::Unwinding => Policy {
                entity_drops: true,
                ticks: true,
                requires_post: false,
                ..CAPTURING
            },
            BuiltinPhase::NeighborNotify => Policy { ticks: true, ..CAPTURING },
            BuiltinPhase::BlockTick => Policy { ticks: true, ..CAPTURING },
            BuiltinPhase::EntityTick => Policy {
                block_drops: false,
                entity_drops: true,
                ..CAPTURING
            },
            BuiltinPhase::Interaction => Policy {
                block_events: true,
                entity_drops: true,
                spawn_type: SpawnType::Placement,
                ..CAPTURING
            },
            BuiltinPhase::Explosion => Policy {
                spawn_type: SpawnType::Explosion,
                ..CAPTURING
            },
            BuiltinPhase::Restoration => Policy {
                spawns: false,
                ignores_notifications: true,
                ..INERT
            },
            BuiltinPhase::WorldGeneration => Policy {
                bulk_blocks: false,
                block_drops: false,
                ignores_notifications: true,
                ..CAPTURING
            },
            BuiltinPhase::Plugin => Policy {
                block_events: true,
                entity_drops: true,
                ticks: true,
                spawn_type: SpawnType::Plugin,
                ..CAPTURING
            },
            BuiltinPhase::DeferredReplay => Policy {
                block_events: true,
                entity_drops: true,
                spawn_type: SpawnType::Forced,
                ..CAPTURING
            },
        }
    }
}

impl PhaseState for BuiltinPhase {
    fn id(&self) -> PhaseId {
        self.phase_id()
    }

    fn does_bulk_block_capture(&self, ctx: &PhaseContext) -> bool {
        self.policy().bulk_blocks
            && ctx.allows_bulk_block_captures()
            && ctx.is_capturing(CaptureCategory::Blocks)
    }

    fn does_block_event_tracking(&self, ctx: &PhaseContext) -> bool {
        self.policy().block_events && ctx.allows_block_events()
    }

    fn does_bulk_entity_capture(&self, ctx: &PhaseContext) -> bool {
        self.policy().bulk_entities
            && ctx.allows_bulk_entity_captures()
            && ctx.is_capturing(CaptureCategory::Entities)
    }

    fn tracks_block_specific_drops(&self, ctx: &PhaseContext) -> bool {
        self.policy().block_drops && ctx.is_capturing(CaptureCategory::BlockDrops)
    }

    fn tracks_entity_drops(&self, ctx: &PhaseContext) -> bool {
        self.policy().entity_drops && ctx.is_capturing(CaptureCategory::EntityDrops)
    }

    fn does_capture_item_drops(&self, ctx: &PhaseContext) -> bool {
        self.policy().item_drops && ctx.is_capturing(CaptureCategory::ItemDrops)
    }

    fn does_capture_scheduled_ticks(&self, ctx: &PhaseContext) -> bool {
        self.policy().ticks && ctx.is_capturing(CaptureCategory::ScheduledTicks)
    }

    fn allows_entity_spawns(&self) -> bool {
        self.policy().spawns
    }

    fn ignores_notifications(&self) -> bool {
        self.policy().ignores_notifications
    }

    fn requires_post(&self) -> bool {
        self.policy().requires_post
    }

    fn can_switch_to(&self, next: &dyn PhaseState) -> bool {
        if *self != BuiltinPhase::Unwinding {
            return true;
        }
        // Plain scopes must not start while a commit is still running.
        !matches!(
            BuiltinPhase::from_id(next.id()),
            Some(
                BuiltinPhase::BlockTick
                    | BuiltinPhase::EntityTick
                    | BuiltinPhase::Interaction
                    | BuiltinPhase::Explosion
                    | BuiltinPhase::WorldGeneration
                    | BuiltinPhase::Plugin
            )
        )
    }

    fn spawn_type(&self) -> SpawnType {
        self.policy().spawn_type
    }

    fn unwind(&self, ctx: &mut PhaseContext, tracker: &mut PhaseTracker) -> Result<(), PhaseError> {
        if *self == BuiltinPhase::Complete {
            return Ok(());
        }
        processing::unwind_captures(ctx, tracker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let mut ids: Vec<PhaseId> = BuiltinPhase::ALL.iter().map(|p| p.phase_id()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), BuiltinPhase::ALL.len());
        assert_eq!(BuiltinPhase::from_id(PhaseId("plugin")), Some(BuiltinPhase::Plugin));
        assert_eq!(BuiltinPhase::from_id(PhaseId("nope")), None);
    }

    #[test]
    fn test_unwinding_denies_plain_scopes() {
        let unwinding = BuiltinPhase::Unwinding;
        assert!(!unwinding.can_switch_to(&BuiltinPhase::BlockTick));
        assert!(!unwinding.can_switch_to(&BuiltinPhase::Interaction));
        assert!(unwinding.can_switch_to(&BuiltinPhase::Unwinding));
        assert!(unwinding.can_switch_to(&BuiltinPhase::NeighborNotify));
        assert!(unwinding.can_switch_to(&BuiltinPhase::Restoration));
        assert!(BuiltinPhase::BlockTick.can_switch_to(&BuiltinPhase::Interaction));
    }

    #[test]
    fn test_predicates_follow_context_opt_in() {
        let state = BuiltinPhase::BlockTick.into_ref();
        let mut ctx = PhaseContext::new(state.clone());
        assert!(!state.does_bulk_block_capture(&ctx));

        ctx.add_block_captures().unwrap();
        assert!(state.does_bulk_block_capture(&ctx));
        assert!(state.tracks_block_specific_drops(&ctx));
        assert!(!state.does_bulk_entity_capture(&ctx));

        ctx.allow_bulk_block_captures(false).unwrap();
        assert!(!state.does_bulk_block_capture(&ctx));
    }

    #[test]
    fn test_restoration_policy() {
        let restoration = BuiltinPhase::Restoration;
        assert!(!restoration.allows_entity_spawns());
        assert!(restoration.ignores_notifications());
        assert!(!restoration.requires_post());
        assert_eq!(BuiltinPhase::DeferredReplay.spawn_type(), SpawnType::Forced);
    }
}
