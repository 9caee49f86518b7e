//! Simulation engine boundary.

use crate::types::{BlockPos, BlockState, EntitySpec, ItemDrop, Mutation, ScheduledTick};

/// The world the tracker mediates writes to.
///
/// The engine is a passive collaborator: it stores state and applies writes,
/// but never calls back into the tracker. Secondary effects (neighbour
/// reactions) are returned as [`Mutation`]s so the tracker can route them
/// through its own entry points and attribute them to a nested scope.
///
/// # Implementations
///
/// - **Simulation**: `phaser_sim::SimWorld` - in-memory world with reaction rules
/// - **Tests**: any recording engine
pub trait SimulationEngine: Send {
    /// Reads the current state at `pos`. Must be idempotent.
    fn block_state(&self, pos: BlockPos) -> BlockState;

    /// Writes `state` at `pos`.
    ///
    /// # Returns
    /// * `Some(previous)` - The write was applied
    /// * `None` - The position cannot be written (e.g. not loaded)
    fn set_block_state(&mut self, pos: BlockPos, state: BlockState) -> Option<BlockState>;

    /// Positions notified when the block at `pos` changes.
    fn neighbors(&self, pos: BlockPos) -> Vec<BlockPos> {
        pos.neighbors().to_vec()
    }

    /// Lets the block at `notified` react to a change at `source`.
    ///
    /// Returns the secondary effects the reaction wants to perform. The
    /// engine must not apply them itself.
    fn neighbor_changed(&mut self, notified: BlockPos, source: BlockPos) -> Vec<Mutation>;

    /// Adds an entity to the world. Returns false if rejected.
    fn add_entity(&mut self, entity: EntitySpec) -> bool;

    /// Emits an item stack into the world.
    fn drop_item(&mut self, drop: ItemDrop);

    /// Registers a scheduled block update.
    fn schedule_tick(&mut self, tick: ScheduledTick);

    /// Returns false for positions that are not currently writable.
    fn is_loaded(&self, _pos: BlockPos) -> bool {
        true
    }
}
