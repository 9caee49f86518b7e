//! SimWorld - in-memory engine with scripted neighbour reactions.

use phaser_env::{
    BlockPos, BlockState, ChangeFlags, EntityId, EntitySpec, ItemDrop, Mutation, ScheduledTick, SimulationEngine,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// What a notified block in a given state does.
#[derive(Debug, Clone, PartialEq)]
pub enum Reaction {
    /// Turns into another state
    Replace(BlockState),
    /// Breaks: becomes air and drops an item
    Drop(String),
    /// Spawns an entity of this kind on top of itself
    Spawn(String),
    /// Schedules an update for itself
    Schedule(u32),
}

/// Mutable world state behind the shared handle.
#[derive(Debug, Default)]
pub struct WorldState {
    pub blocks: HashMap<BlockPos, BlockState>,
    /// Every engine write in order
    pub writes: Vec<(BlockPos, BlockState)>,
    pub entities: Vec<EntitySpec>,
    pub drops: Vec<ItemDrop>,
    pub ticks: Vec<ScheduledTick>,
    pub reactions: HashMap<BlockState, Vec<Reaction>>,
    /// Positions that refuse writes
    pub unloaded: HashSet<BlockPos>,
    pub notifications: u64,
    spawned: u64,
}

/// The simulated world.
///
/// Clones share state, so a scenario keeps one handle for assertions after
/// moving another into the tracker.
#[derive(Debug, Default, Clone)]
pub struct SimWorld {
    inner: Arc<Mutex<WorldState>>,
}

impl SimWorld {
    /// Creates an empty world.
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the world state.
    pub fn state(&self) -> MutexGuard<'_, WorldState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Places a block without recording a write.
    pub fn with_block(self, pos: BlockPos, state: BlockState) -> Self {
        self.state().blocks.insert(pos, state);
        self
    }

    /// Adds a reaction for notified blocks in `state`.
    pub fn with_reaction(self, state: BlockState, reaction: Reaction) -> Self {
        self.state().reactions.entry(state).or_default().push(reaction);
        self
    }

    /// Marks a position as not writable.
    pub fn with_unloaded(self, pos: BlockPos) -> Self {
        self.state().unloaded.insert(pos);
        self
    }

    pub fn block(&self, pos: BlockPos) -> BlockState {
        self.state().blocks.get(&pos).copied().unwrap_or_default()
    }

    pub fn writes(&self) -> Vec<(BlockPos, BlockState)> {
        self.state().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.state().writes.len()
    }

    pub fn entity_count(&self) -> usize {
        self.state().entities.len()
    }

    pub fn drop_count(&self) -> usize {
        self.state().drops.len()
    }

    pub fn tick_count(&self) -> usize {
        self.state().ticks.len()
    }

    pub fn notifications(&self) -> u64 {
        self.state().notifications
    }
}

impl SimulationEngine for SimWorld {
    fn block_state(&self, pos: BlockPos) -> BlockState {
        self.block(pos)
    }

    fn set_block_state(&mut self, pos: BlockPos, state: BlockState) -> Option<BlockState> {
        let mut world = self.state();
        if world.unloaded.contains(&pos) {
            return None;
        }
        world.writes.push((pos, state));
        Some(world.blocks.insert(pos, state).unwrap_or_default())
    }

    fn neighbor_changed(&mut self, notified: BlockPos, _source: BlockPos) -> Vec<Mutation> {
        let mut world = self.state();
        world.notifications += 1;
        let current = world.blocks.get(&notified).copied().unwrap_or_default();
        let Some(reactions) = world.reactions.get(&current).cloned() else {
            return Vec::new();
        };

        let mut effects = Vec::with_capacity(reactions.len());
        for reaction in reactions {
            match reaction {
                Reaction::Replace(next) => effects.push(Mutation::SetBlock {
                    pos: notified,
                    state: next,
                    flags: ChangeFlags::ALL,
                }),
                Reaction::Drop(item) => {
                    effects.push(Mutation::SetBlock {
                        pos: notified,
                        state: BlockState::AIR,
                        flags: ChangeFlags::ALL,
                    });
                    effects.push(Mutation::DropItem(ItemDrop::new(&item, 1, notified)));
                }
                Reaction::Spawn(kind) => {
                    world.spawned += 1;
                    let id = EntityId::from_seed(world.spawned);
                    effects.push(Mutation::SpawnEntity(EntitySpec::new(id, &kind, notified.offset(0, 1, 0))));
                }
                Reaction::Schedule(delay) => effects.push(Mutation::ScheduleTick(ScheduledTick {
                    pos: notified,
                    delay,
                })),
            }
        }
        effects
    }

    fn add_entity(&mut self, entity: EntitySpec) -> bool {
        let mut world = self.state();
        if world.entities.iter().any(|e| e.id == entity.id) {
            return false;
        }
        world.entities.push(entity);
        true
    }

    fn drop_item(&mut self, drop: ItemDrop) {
        self.state().drops.push(drop);
    }

    fn schedule_tick(&mut self, tick: ScheduledTick) {
        self.state().ticks.push(tick);
    }

    fn is_loaded(&self, pos: BlockPos) -> bool {
        !self.state().unloaded.contains(&pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reactions_become_mutations() {
        let pos = BlockPos::new(0, 0, 0);
        let mut world = SimWorld::new()
            .with_block(pos, BlockState(3))
            .with_reaction(BlockState(3), Reaction::Drop("gravel".to_string()))
            .with_reaction(BlockState(3), Reaction::Schedule(2));

        let effects = world.neighbor_changed(pos, pos.offset(1, 0, 0));
        assert_eq!(effects.len(), 3);
        assert_eq!(effects[0].label(), "set_block");
        assert!(matches!(&effects[1], Mutation::DropItem(d) if d.item == "gravel"));
        assert!(matches!(effects[2], Mutation::ScheduleTick(ScheduledTick { delay: 2, .. })));
        // Reactions are only proposed, never applied.
        assert_eq!(world.block(pos), BlockState(3));
        assert_eq!(world.notifications(), 1);
    }

    #[test]
    fn test_unloaded_positions_refuse_writes() {
        let pos = BlockPos::new(5, 0, 0);
        let mut world = SimWorld::new().with_unloaded(pos);
        assert!(!world.is_loaded(pos));
        assert_eq!(world.set_block_state(pos, BlockState(1)), None);
        assert_eq!(world.write_count(), 0);
    }

    #[test]
    fn test_duplicate_entity_rejected() {
        let mut world = SimWorld::new();
        let entity = EntitySpec::new(EntityId::from_seed(1), "pig", BlockPos::new(0, 0, 0));
        assert!(world.add_entity(entity.clone()));
        assert!(!world.add_entity(entity));
        assert_eq!(world.entity_count(), 1);
    }
}
