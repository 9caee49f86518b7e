//! Shared-state engine and bus doubles for unit tests.
//!
//! Clones observe the same state, so a test keeps one handle after moving
//! the other into the tracker.

use phaser_env::{
    BlockPos, BlockState, ChangeFlags, EntitySpec, Event, EventBus, EventKind, ItemDrop, Mutation,
    ScheduledTick, SimulationEngine,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct WorldState {
    pub blocks: HashMap<BlockPos, BlockState>,
    pub writes: Vec<(BlockPos, BlockState)>,
    pub entities: Vec<EntitySpec>,
    pub drops: Vec<ItemDrop>,
    pub ticks: Vec<ScheduledTick>,
    /// A notified block in the key state is replaced by the value state
    pub reactions: HashMap<BlockState, BlockState>,
    pub notifications: usize,
}

#[derive(Debug, Default, Clone)]
pub struct TestWorld {
    inner: Arc<Mutex<WorldState>>,
}

impl TestWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, WorldState> {
        self.inner.lock().unwrap()
    }

    pub fn with_block(self, pos: BlockPos, state: BlockState) -> Self {
        self.state().blocks.insert(pos, state);
        self
    }

    pub fn with_reaction(self, from: BlockState, to: BlockState) -> Self {
        self.state().reactions.insert(from, to);
        self
    }

    pub fn block(&self, pos: BlockPos) -> BlockState {
        self.state().blocks.get(&pos).copied().unwrap_or_default()
    }

    pub fn writes(&self) -> Vec<(BlockPos, BlockState)> {
        self.state().writes.clone()
    }

    pub fn entity_count(&self) -> usize {
        self.state().entities.len()
    }
}

impl SimulationEngine for TestWorld {
    fn block_state(&self, pos: BlockPos) -> BlockState {
        self.block(pos)
    }

    fn set_block_state(&mut self, pos: BlockPos, state: BlockState) -> Option<BlockState> {
        let mut world = self.state();
        world.writes.push((pos, state));
        Some(world.blocks.insert(pos, state).unwrap_or_default())
    }

    fn neighbor_changed(&mut self, notified: BlockPos, _source: BlockPos) -> Vec<Mutation> {
        let mut world = self.state();
        world.notifications += 1;
        let current = world.blocks.get(&notified).copied().unwrap_or_default();
        match world.reactions.get(&current) {
            Some(next) => vec![Mutation::SetBlock {
                pos: notified,
                state: *next,
                flags: ChangeFlags::ALL,
            }],
            None => Vec::new(),
        }
    }

    fn add_entity(&mut self, entity: EntitySpec) -> bool {
        self.state().entities.push(entity);
        true
    }

    fn drop_item(&mut self, drop: ItemDrop) {
        self.state().drops.push(drop);
    }

    fn schedule_tick(&mut self, tick: ScheduledTick) {
        self.state().ticks.push(tick);
    }
}

#[derive(Debug, Default)]
pub struct BusState {
    pub posted: Vec<Event>,
    pub cancel: Vec<EventKind>,
    pub invalidate: Vec<BlockPos>,
}

#[derive(Debug, Default, Clone)]
pub struct TestBus {
    inner: Arc<Mutex<BusState>>,
}

impl TestBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, BusState> {
        self.inner.lock().unwrap()
    }

    /// Cancels every event of `kind`.
    pub fn cancelling(self, kind: EventKind) -> Self {
        self.state().cancel.push(kind);
        self
    }

    /// Invalidates block transactions at `pos` without cancelling the event.
    pub fn invalidating(self, pos: BlockPos) -> Self {
        self.state().invalidate.push(pos);
        self
    }

    pub fn posted(&self) -> Vec<Event> {
        self.state().posted.clone()
    }

    pub fn posted_of(&self, kind: EventKind) -> Vec<Event> {
        self.posted().into_iter().filter(|e| e.kind() == kind).collect()
    }
}

impl EventBus for TestBus {
    fn post(&mut self, event: &mut Event) -> bool {
        let mut bus = self.state();
        if bus.cancel.contains(&event.kind()) {
            event.set_cancelled(true);
        }
        if let Event::ChangeBlock(change) = event {
            for transaction in change.transactions.iter_mut() {
                if bus.invalidate.contains(&transaction.pos) {
                    transaction.valid = false;
                }
            }
        }
        bus.posted.push(event.clone());
        event.is_cancelled()
    }
}
