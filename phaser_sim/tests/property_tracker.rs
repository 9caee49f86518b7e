//! Property-based tests for scope discipline.
//!
//! # Stack balance
//! - Depth always equals the number of scopes the caller left open
//! - Closing every open scope returns the stack to the sentinel
//! - Completing the scope below the top repairs the stack instead of failing
//!
//! # Commit completeness
//! - Every accepted mutation reaches the world exactly once
//! - No scope leaves captured records behind
//!
//! # Deferred replay
//! - Every mutation submitted from a foreign thread is replayed once

use phaser_core::{BuiltinPhase, MemorySink, MutationOutcome, PhaseId, PhaseTracker, ReportKind, TrackerConfig};
use phaser_env::{BlockPos, BlockState, ChangeFlags, EntityId, EntitySpec, ItemDrop};
use phaser_sim::{RecordingBus, SimWorld};
use proptest::prelude::*;
use std::sync::Arc;

// ============================================================================
// Arbitrary Generators
// ============================================================================

const SCOPES: [BuiltinPhase; 6] = [
    BuiltinPhase::BlockTick,
    BuiltinPhase::EntityTick,
    BuiltinPhase::Interaction,
    BuiltinPhase::Explosion,
    BuiltinPhase::Plugin,
    BuiltinPhase::Restoration,
];

#[derive(Debug, Clone)]
enum Op {
    Enter { scope: usize, captures: bool },
    Exit,
    /// Completes the scope below the top, leaving the top stray
    ExitBelow,
    SetBlock { x: i32, z: i32, state: u32, notify: bool },
    Spawn,
    Drop { x: i32, z: i32 },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => ((0usize..SCOPES.len()), any::<bool>()).prop_map(|(scope, captures)| Op::Enter { scope, captures }),
        3 => Just(Op::Exit),
        4 => ((0i32..4), (0i32..4), (1u32..8), any::<bool>())
            .prop_map(|(x, z, state, notify)| Op::SetBlock { x, z, state, notify }),
        2 => Just(Op::Spawn),
        2 => ((0i32..4), (0i32..4)).prop_map(|(x, z)| Op::Drop { x, z }),
    ]
}

fn arb_op_with_repairs() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => arb_op(),
        1 => Just(Op::ExitBelow),
    ]
}

// ============================================================================
// Interpreter
// ============================================================================

struct Run {
    tracker: PhaseTracker,
    world: SimWorld,
    sink: MemorySink,
    open: Vec<PhaseId>,
    next_entity: u64,
    block_writes: usize,
    spawns: usize,
    drops: usize,
}

impl Run {
    fn new() -> Self {
        let world = SimWorld::new();
        let sink = MemorySink::new();
        let tracker = PhaseTracker::new(world.clone(), RecordingBus::new())
            .with_config(TrackerConfig::default())
            .with_sink(Arc::new(sink.clone()));
        Self {
            tracker,
            world,
            sink,
            open: Vec::new(),
            next_entity: 0,
            block_writes: 0,
            spawns: 0,
            drops: 0,
        }
    }

    fn accepted(outcome: MutationOutcome) -> bool {
        matches!(outcome, MutationOutcome::Applied | MutationOutcome::Captured)
    }

    fn apply(&mut self, op: &Op) {
        match *op {
            Op::Enter { scope, captures } => {
                let mut ctx = self.tracker.create_context(&SCOPES[scope].into_ref());
                if captures {
                    ctx.add_captures().unwrap();
                }
                let phase = ctx.phase();
                std::mem::forget(ctx.build_and_switch(&mut self.tracker).unwrap());
                self.open.push(phase);
            }
            Op::Exit => {
                if let Some(phase) = self.open.pop() {
                    self.tracker.complete_phase(phase);
                }
            }
            Op::ExitBelow => {
                if self.open.len() < 2 {
                    return;
                }
                let top = self.open.pop().unwrap();
                let below = *self.open.last().unwrap();
                self.tracker.complete_phase(below);
                // With equal ids the top scope is the one completed.
                if top != below {
                    self.open.pop();
                }
            }
            Op::SetBlock { x, z, state, notify } => {
                let flags = if notify { ChangeFlags::ALL } else { ChangeFlags::NONE };
                let outcome = self.tracker.set_block_state(BlockPos::new(x, 64, z), BlockState(state), flags);
                if Self::accepted(outcome) {
                    self.block_writes += 1;
                }
            }
            Op::Spawn => {
                self.next_entity += 1;
                let entity = EntitySpec::new(EntityId::from_seed(self.next_entity), "zombie", BlockPos::new(0, 65, 0));
                if Self::accepted(self.tracker.spawn_entity(entity)) {
                    self.spawns += 1;
                }
            }
            Op::Drop { x, z } => {
                if Self::accepted(self.tracker.drop_item(ItemDrop::new("bone", 1, BlockPos::new(x, 64, z)))) {
                    self.drops += 1;
                }
            }
        }
    }

    fn close_all(&mut self) {
        while let Some(phase) = self.open.pop() {
            self.tracker.complete_phase(phase);
        }
    }
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_depth_tracks_open_scopes(ops in prop::collection::vec(arb_op(), 0..60)) {
        let mut run = Run::new();
        for op in &ops {
            run.apply(op);
            prop_assert_eq!(run.tracker.depth(), run.open.len());
            prop_assert_eq!(run.tracker.process_depth(), 0);
        }
        run.close_all();
        prop_assert_eq!(run.tracker.depth(), 0);
        prop_assert_eq!(run.tracker.current_phase(), BuiltinPhase::Complete.phase_id());
        prop_assert_eq!(run.sink.count(ReportKind::IncorrectCompletion), 0);
        prop_assert_eq!(run.sink.count(ReportKind::EmptyStackCompletion), 0);
    }

    #[test]
    fn prop_accepted_mutations_commit_once(ops in prop::collection::vec(arb_op(), 0..60)) {
        let mut run = Run::new();
        for op in &ops {
            run.apply(op);
        }
        run.close_all();

        prop_assert_eq!(run.world.write_count(), run.block_writes);
        prop_assert_eq!(run.world.entity_count(), run.spawns);
        prop_assert_eq!(run.world.drop_count(), run.drops);
        prop_assert_eq!(run.sink.count(ReportKind::UnprocessedCaptures), 0);
        prop_assert_eq!(run.sink.count(ReportKind::CaptureFailure), 0);
        prop_assert_eq!(run.sink.count(ReportKind::UnwindFailure), 0);
        prop_assert!(!run.tracker.current_context().has_captures());
    }

    #[test]
    fn prop_mismatched_completion_repairs_stack(ops in prop::collection::vec(arb_op_with_repairs(), 0..60)) {
        let mut run = Run::new();
        for op in &ops {
            run.apply(op);
            prop_assert_eq!(run.tracker.depth(), run.open.len());
        }
        run.close_all();
        prop_assert_eq!(run.tracker.depth(), 0);
        prop_assert!(run.sink.count(ReportKind::IncorrectCompletion) <= ops.len());
    }

    #[test]
    fn prop_foreign_submissions_replay_once(spawns in 0usize..24, blocks in 0usize..24) {
        let mut run = Run::new();
        let handle = run.tracker.async_handle();
        std::thread::scope(|scope| {
            scope.spawn(|| {
                for i in 0..spawns {
                    let id = EntityId::from_seed(10_000 + i as u64);
                    assert_eq!(
                        handle.spawn_entity(EntitySpec::new(id, "arrow", BlockPos::new(0, 80, 0))),
                        MutationOutcome::Deferred
                    );
                }
                for i in 0..blocks {
                    handle.set_block_state(BlockPos::new(i as i32, 64, 9), BlockState(1), ChangeFlags::NONE);
                }
            });
        });

        prop_assert_eq!(handle.pending(), spawns + blocks);
        prop_assert_eq!(run.tracker.drain_deferred(), spawns + blocks);
        prop_assert_eq!(handle.pending(), 0);
        prop_assert_eq!(run.tracker.drain_deferred(), 0);
        prop_assert_eq!(run.world.entity_count(), spawns);
        prop_assert_eq!(run.world.write_count(), blocks);
        prop_assert_eq!(run.tracker.depth(), 0);
    }
}
