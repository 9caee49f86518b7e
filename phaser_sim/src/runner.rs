//! Scenario runner - drives the tracker through deterministic scenarios.

use crate::bus::{CancelPolicy, RecordingBus};
use crate::exporter::{EventRecord, SimExport, SimFrame, WriteRecord};
use crate::scenarios::ScenarioId;
use crate::world::{Reaction, SimWorld};

use phaser_core::{
    AsyncPolicy, BuiltinPhase, CaptureCategory, MemorySink, MutationOutcome, PhaseError, PhaseTracker, Report,
    ReportKind, TrackerConfig, TrackerStats,
};
use phaser_env::{
    BlockPos, BlockState, ChangeFlags, EntityId, EntitySpec, Event, EventKind, ItemDrop, ScheduledTick, Source, UserId,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total ticks executed
    pub total_ticks: u64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    /// Events posted to the bus
    pub events_posted: usize,

    /// Events that ended up cancelled
    pub events_cancelled: usize,

    /// Engine block writes
    pub writes: usize,

    pub entities: usize,
    pub drops: usize,
    pub scheduled_ticks: usize,

    /// Reports filed by the tracker
    pub reports: usize,

    /// Tracker counters at the end of the run
    pub stats: TrackerStats,
}

/// Tracker, collaborators and trace of one scenario run.
struct Harness {
    tracker: PhaseTracker,
    world: SimWorld,
    bus: RecordingBus,
    sink: MemorySink,
    events: Vec<Event>,
    reports: Vec<Report>,
    write_cursor: usize,
    export: SimExport,
}

impl Harness {
    fn new(scenario: ScenarioId, seed: u64, config: TrackerConfig, world: SimWorld, bus: RecordingBus) -> Self {
        let sink = MemorySink::new();
        let tracker = PhaseTracker::new(world.clone(), bus.clone())
            .with_config(config)
            .with_sink(Arc::new(sink.clone()));
        Self {
            tracker,
            world,
            bus,
            sink,
            events: Vec::new(),
            reports: Vec::new(),
            write_cursor: 0,
            export: SimExport::new(scenario.name(), seed),
        }
    }

    /// Records a frame and returns the events posted during the tick.
    fn end_tick(&mut self, tick: u64) -> Vec<Event> {
        let events = self.bus.take();
        let reports = self.sink.take();
        let writes: Vec<WriteRecord> = {
            let state = self.world.state();
            state.writes[self.write_cursor..]
                .iter()
                .map(|(pos, block)| WriteRecord::new(*pos, *block))
                .collect()
        };
        self.write_cursor += writes.len();

        self.export.add_frame(SimFrame {
            tick,
            depth: self.tracker.depth(),
            events: events.iter().map(EventRecord::from_event).collect(),
            writes,
            reports: reports.clone(),
        });
        self.events.extend(events.iter().cloned());
        self.reports.extend(reports);
        events
    }

    fn report_count(&self, kind: ReportKind) -> usize {
        self.reports.iter().filter(|r| r.kind == kind).count()
    }

    fn metrics(&self) -> ScenarioMetrics {
        let state = self.world.state();
        ScenarioMetrics {
            events_posted: self.events.len(),
            events_cancelled: self.events.iter().filter(|e| e.is_cancelled()).count(),
            writes: state.writes.len(),
            entities: state.entities.len(),
            drops: state.drops.len(),
            scheduled_ticks: state.ticks.len(),
            reports: self.reports.len(),
            stats: self.tracker.stats(),
        }
    }

    /// Fails unless every scope of the tick was completed and unwound.
    fn check_balanced(&self, tick: u64) -> Result<(), String> {
        ensure(self.tracker.depth() == 0, || {
            format!("tick {}: stack depth {} after the tick", tick, self.tracker.depth())
        })?;
        ensure(self.tracker.process_depth() == 0, || {
            format!("tick {}: processing depth {} after the tick", tick, self.tracker.process_depth())
        })
    }
}

fn ensure<F>(condition: bool, reason: F) -> Result<(), String>
where
    F: FnOnce() -> String,
{
    if condition {
        Ok(())
    } else {
        Err(reason())
    }
}

fn phase_err(err: PhaseError) -> String {
    format!("phase error: {}", err)
}

fn of_kind(events: &[Event], kind: EventKind) -> Vec<&Event> {
    events.iter().filter(|e| e.kind() == kind).collect()
}

/// Scopes random mutations are issued from.
const RANDOM_PHASES: [BuiltinPhase; 5] = [
    BuiltinPhase::BlockTick,
    BuiltinPhase::EntityTick,
    BuiltinPhase::Interaction,
    BuiltinPhase::Explosion,
    BuiltinPhase::Plugin,
];

/// Report kinds that mean a mutation was lost or misattributed.
const LOSSY_REPORTS: [ReportKind; 5] = [
    ReportKind::IncorrectCompletion,
    ReportKind::UnprocessedCaptures,
    ReportKind::CaptureFailure,
    ReportKind::UnwindFailure,
    ReportKind::BodyPanic,
];

/// Runs tracker scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Ticks per scenario
    ticks: u64,

    /// Tracker configuration shared by every scenario
    config: TrackerConfig,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            ticks: 20,
            config: TrackerConfig::default(),
        }
    }

    /// Sets the number of ticks per scenario.
    pub fn with_ticks(mut self, ticks: u64) -> Self {
        self.ticks = ticks.max(1);
        self
    }

    /// Sets the tracker configuration.
    pub fn with_config(mut self, config: TrackerConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.run_with_export(scenario).0
    }

    /// Runs a scenario and returns the result with its frame trace.
    pub fn run_with_export(&self, scenario: ScenarioId) -> (ScenarioResult, SimExport) {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        if scenario.expects_reports() && !self.config.verbose {
            warn!("Diagnostics are disabled, report assertions are skipped");
        }

        let mut harness = self.setup(scenario);
        let outcome = match scenario {
            ScenarioId::BulkCapture => self.run_bulk_capture(&mut harness),
            ScenarioId::CancelledCapture => self.run_cancelled_capture(&mut harness),
            ScenarioId::DeniedSpawn => self.run_denied_spawn(&mut harness),
            ScenarioId::MismatchedCompletion => self.run_mismatched_completion(&mut harness),
            ScenarioId::EffectChain => self.run_effect_chain(&mut harness),
            ScenarioId::RunawayChain => self.run_runaway_chain(&mut harness),
            ScenarioId::PerEventRevert => self.run_per_event_revert(&mut harness),
            ScenarioId::AsyncSpawns => self.run_async_spawns(&mut harness),
            ScenarioId::RandomMutations => self.run_random_mutations(&mut harness),
        };

        let metrics = harness.metrics();
        let (passed, failure_reason) = match outcome {
            Ok(()) => (true, None),
            Err(reason) => (false, Some(reason)),
        };
        debug!(
            "  {} | events={} | writes={} | reports={}",
            scenario.name(),
            metrics.events_posted,
            metrics.writes,
            metrics.reports
        );

        let mut export = harness.export;
        export.finalize(passed, failure_reason.clone(), metrics.stats);
        let result = ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            total_ticks: self.ticks,
            failure_reason,
            metrics,
        };
        (result, export)
    }

    /// True when each problem is reported exactly once.
    fn reports_once(&self) -> bool {
        self.config.verbose && !self.config.verbose_errors
    }

    /// Builds the world, bus and configuration a scenario runs against.
    fn setup(&self, scenario: ScenarioId) -> Harness {
        let mut config = self.config.clone();
        let mut world = SimWorld::new();
        let bus = RecordingBus::new();

        match scenario {
            ScenarioId::CancelledCapture | ScenarioId::PerEventRevert => {
                bus.set_policy(CancelPolicy::Kind(EventKind::ChangeBlock));
            }
            ScenarioId::EffectChain => {
                world = world
                    .with_reaction(BlockState(2), Reaction::Replace(BlockState(3)))
                    .with_reaction(BlockState(5), Reaction::Drop("dust".to_string()));
            }
            ScenarioId::RunawayChain => {
                config.max_block_processing_depth = config.max_block_processing_depth.min(24);
                world = world
                    .with_reaction(BlockState(1), Reaction::Replace(BlockState(2)))
                    .with_reaction(BlockState(2), Reaction::Replace(BlockState(1)));
            }
            ScenarioId::AsyncSpawns => {
                config.async_policy = AsyncPolicy::Queue;
            }
            ScenarioId::RandomMutations => {
                config.max_block_processing_depth = config.max_block_processing_depth.min(32);
                let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_mul(0x9e3779b97f4a7c15));
                for state in 1..6 {
                    if rng.gen_bool(0.3) {
                        world = world.with_reaction(BlockState(state), Reaction::Replace(BlockState(rng.gen_range(1..6))));
                    }
                }
                world = world
                    .with_reaction(BlockState(5), Reaction::Schedule(2))
                    .with_unloaded(BlockPos::new(7, 64, 7));
                if rng.gen_bool(0.5) {
                    bus.set_policy(CancelPolicy::Position(BlockPos::new(rng.gen_range(0..8), 64, rng.gen_range(0..8))));
                }
            }
            _ => {}
        }

        Harness::new(scenario, self.seed, config, world, bus)
    }

    /// PST-001: BulkCapture - captured changes commit as one event, in order.
    fn run_bulk_capture(&self, h: &mut Harness) -> Result<(), String> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let phase = BuiltinPhase::BlockTick.into_ref();

        for tick in 0..self.ticks {
            let z = tick as i32;
            let placed: Vec<(BlockPos, BlockState)> = (0..3)
                .map(|x| (BlockPos::new(x, 64, z), BlockState(rng.gen_range(1..16))))
                .collect();
            let before = h.world.write_count();
            let world = h.world.clone();

            let mut ctx = h.tracker.create_context(&phase);
            ctx.add_captures().map_err(phase_err)?;
            let (outcomes, hidden) = h
                .tracker
                .scoped(ctx, |t| {
                    let outcomes: Vec<MutationOutcome> = placed
                        .iter()
                        .map(|(pos, state)| t.set_block_state(*pos, *state, ChangeFlags::NONE))
                        .collect();
                    (outcomes, world.write_count() == before)
                })
                .map_err(phase_err)?;
            h.tracker.tick();
            let events = h.end_tick(tick);

            ensure(outcomes.iter().all(|o| *o == MutationOutcome::Captured), || {
                format!("tick {}: expected captured outcomes, got {:?}", tick, outcomes)
            })?;
            ensure(hidden, || format!("tick {}: captured change visible before completion", tick))?;

            let changes = of_kind(&events, EventKind::ChangeBlock);
            ensure(changes.len() == 1 && changes[0].len() == 3, || {
                format!("tick {}: expected 1 change event with 3 records, got {:?}", tick, changes)
            })?;
            let writes = h.world.writes();
            ensure(writes[before..] == placed[..], || {
                format!("tick {}: writes {:?} differ from {:?}", tick, &writes[before..], placed)
            })?;
            h.check_balanced(tick)?;
        }
        Ok(())
    }

    /// PST-002: CancelledCapture - nothing of a cancelled capture reaches the world.
    fn run_cancelled_capture(&self, h: &mut Harness) -> Result<(), String> {
        let phase = BuiltinPhase::BlockTick.into_ref();

        for tick in 0..self.ticks {
            let pos = BlockPos::new(0, 64, tick as i32);
            let mut ctx = h.tracker.create_context(&phase);
            ctx.add_captures().map_err(phase_err)?;
            let id = EntityId::from_seed(self.seed.wrapping_add(tick));
            h.tracker
                .scoped(ctx, |t| {
                    t.set_capture_position(Some(pos));
                    t.set_block_state(pos, BlockState(7), ChangeFlags::ALL);
                    t.drop_item(ItemDrop::new("cobblestone", 1, pos));
                    t.spawn_entity(EntitySpec::new(id, "silverfish", pos));
                })
                .map_err(phase_err)?;
            h.tracker.tick();
            let events = h.end_tick(tick);

            ensure(h.world.write_count() == 0, || format!("tick {}: cancelled change was written", tick))?;
            ensure(h.world.drop_count() == 0 && h.world.entity_count() == 0, || {
                format!("tick {}: drops or spawns of a cancelled change leaked", tick)
            })?;
            ensure(events.len() == 1 && events[0].is_cancelled(), || {
                format!("tick {}: expected one cancelled event, got {}", tick, events.len())
            })?;
            h.check_balanced(tick)?;
        }
        Ok(())
    }

    /// PST-003: DeniedSpawn - restoration scopes refuse spawns but not forced ones.
    fn run_denied_spawn(&self, h: &mut Harness) -> Result<(), String> {
        let phase = BuiltinPhase::Restoration.into_ref();

        for tick in 0..self.ticks {
            let pos = BlockPos::new(0, 64, tick as i32);
            let ctx = h.tracker.create_context(&phase);
            let mob = EntitySpec::new(EntityId::from_seed(tick * 2), "zombie", pos);
            let player = EntitySpec::new(EntityId::from_seed(tick * 2 + 1), "player", pos).forced();
            let (denied, forced) = h
                .tracker
                .scoped(ctx, |t| (t.spawn_entity(mob), t.spawn_entity(player)))
                .map_err(phase_err)?;
            h.tracker.tick();
            let events = h.end_tick(tick);

            ensure(denied == MutationOutcome::Denied, || format!("tick {}: spawn was {:?}", tick, denied))?;
            ensure(forced == MutationOutcome::Applied, || {
                format!("tick {}: forced spawn was {:?}", tick, forced)
            })?;
            ensure(h.world.entity_count() == tick as usize + 1, || {
                format!("tick {}: {} entities in world", tick, h.world.entity_count())
            })?;
            ensure(events.is_empty() && h.world.write_count() == 0, || {
                format!("tick {}: denied spawn produced side effects", tick)
            })?;
            h.check_balanced(tick)?;
        }
        Ok(())
    }

    /// PST-004: MismatchedCompletion - a forgotten inner scope is recovered.
    fn run_mismatched_completion(&self, h: &mut Harness) -> Result<(), String> {
        let outer = BuiltinPhase::BlockTick.into_ref();
        let inner = BuiltinPhase::Plugin.into_ref();

        for tick in 0..self.ticks {
            let ctx = h.tracker.create_context(&outer);
            h.tracker
                .scoped(ctx, |t| {
                    let ctx = t.create_context(&inner);
                    ctx.build_and_switch(t).map(std::mem::forget)
                })
                .map_err(phase_err)?
                .map_err(phase_err)?;
            h.tracker.tick();
            h.end_tick(tick);
            h.check_balanced(tick)?;
        }

        if self.reports_once() {
            let reported = h.report_count(ReportKind::IncorrectCompletion);
            ensure(reported == 1, || format!("expected 1 incorrect completion report, got {}", reported))?;
        }
        Ok(())
    }

    /// PST-005: EffectChain - reactions run in nested scopes under the same notifier.
    fn run_effect_chain(&self, h: &mut Harness) -> Result<(), String> {
        let phase = BuiltinPhase::Interaction.into_ref();
        let owner = UserId::from_seed(self.seed);

        for tick in 0..self.ticks {
            let z = tick as i32 * 4;
            let (origin, relay, fragile) = (BlockPos::new(0, 64, z), BlockPos::new(1, 64, z), BlockPos::new(2, 64, z));
            {
                let mut state = h.world.state();
                state.blocks.insert(relay, BlockState(2));
                state.blocks.insert(fragile, BlockState(5));
            }

            let mut ctx = h.tracker.create_context(&phase);
            ctx.set_source(Source::User(owner))
                .and_then(|ctx| ctx.set_owner(owner))
                .and_then(|ctx| ctx.add_captures())
                .map_err(phase_err)?;
            h.tracker
                .scoped(ctx, |t| t.set_block_state(origin, BlockState(1), ChangeFlags::ALL))
                .map_err(phase_err)?;
            h.tracker.tick();
            let events = h.end_tick(tick);

            ensure(h.world.block(relay) == BlockState(3), || format!("tick {}: relay did not react", tick))?;
            ensure(h.world.block(fragile).is_air(), || format!("tick {}: fragile block did not break", tick))?;
            ensure(h.world.drop_count() == tick as usize + 1, || {
                format!("tick {}: {} drops in world", tick, h.world.drop_count())
            })?;

            let changes = of_kind(&events, EventKind::ChangeBlock);
            ensure(changes.first().map(|e| e.cause().phase) == Some("interaction"), || {
                format!("tick {}: first change not attributed to the interaction", tick)
            })?;
            let nested: Vec<&&Event> = changes.iter().filter(|e| e.cause().phase == "neighbor_notify").collect();
            ensure(nested.len() == 2, || format!("tick {}: {} nested change events", tick, nested.len()))?;
            ensure(nested.iter().all(|e| e.cause().notifier == Some(owner)), || {
                format!("tick {}: nested change lost its notifier", tick)
            })?;
            let drops = of_kind(&events, EventKind::DropItems);
            ensure(
                drops.len() == 1 && drops[0].cause().phase == "neighbor_notify",
                || format!("tick {}: drop not attributed to the notification", tick),
            )?;
            h.check_balanced(tick)?;
        }
        Ok(())
    }

    /// PST-006: RunawayChain - endless reactions are cut at the processing depth.
    fn run_runaway_chain(&self, h: &mut Harness) -> Result<(), String> {
        let phase = BuiltinPhase::BlockTick.into_ref();

        for tick in 0..self.ticks {
            let z = tick as i32 * 4;
            h.world.state().blocks.insert(BlockPos::new(1, 64, z), BlockState(2));

            let mut ctx = h.tracker.create_context(&phase);
            ctx.add_captures().map_err(phase_err)?;
            h.tracker
                .scoped(ctx, |t| t.set_block_state(BlockPos::new(0, 64, z), BlockState(1), ChangeFlags::ALL))
                .map_err(phase_err)?;
            h.tracker.tick();
            h.end_tick(tick);
            h.check_balanced(tick)?;
        }

        if self.config.verbose {
            ensure(h.report_count(ReportKind::MaxProcessingDepth) >= 1, || {
                "runaway chain was never cut".to_string()
            })?;
        }
        Ok(())
    }

    /// PST-007: PerEventRevert - a cancelled speculative change is undone silently.
    fn run_per_event_revert(&self, h: &mut Harness) -> Result<(), String> {
        let phase = BuiltinPhase::Interaction.into_ref();

        for tick in 0..self.ticks {
            let pos = BlockPos::new(0, 64, tick as i32 * 4);
            h.world.state().blocks.insert(pos, BlockState(4));
            let notified = h.world.notifications();

            let ctx = h.tracker.create_context(&phase);
            let outcome = h
                .tracker
                .scoped(ctx, |t| t.set_block_state(pos, BlockState(5), ChangeFlags::ALL))
                .map_err(phase_err)?;
            h.tracker.tick();
            h.end_tick(tick);

            ensure(outcome == MutationOutcome::Cancelled, || format!("tick {}: change was {:?}", tick, outcome))?;
            ensure(h.world.block(pos) == BlockState(4), || format!("tick {}: original state not restored", tick))?;
            ensure(h.world.notifications() == notified, || {
                format!("tick {}: restoration notified neighbours", tick)
            })?;
            h.check_balanced(tick)?;
        }
        Ok(())
    }

    /// PST-008: AsyncSpawns - spawns from tokio workers replay on the owning thread.
    fn run_async_spawns(&self, h: &mut Harness) -> Result<(), String> {
        const WORKERS: u64 = 4;
        const PER_WORKER: u64 = 2;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(|e| format!("runtime: {}", e))?;

        for tick in 0..self.ticks {
            let handle = h.tracker.async_handle();
            let base = self.seed.wrapping_mul(1000).wrapping_add(tick * WORKERS * PER_WORKER);
            let submitted = runtime.block_on(async move {
                let mut tasks = Vec::new();
                for worker in 0..WORKERS {
                    let handle = handle.clone();
                    tasks.push(tokio::spawn(async move {
                        (0..PER_WORKER)
                            .map(|i| {
                                let id = EntityId::from_seed(base + worker * PER_WORKER + i);
                                handle.spawn_entity(EntitySpec::new(id, "arrow", BlockPos::new(worker as i32, 80, 0)))
                            })
                            .filter(|o| *o == MutationOutcome::Deferred)
                            .count()
                    }));
                }
                let mut submitted = 0;
                for task in tasks {
                    submitted += task.await.unwrap_or(0);
                }
                submitted
            });

            let before = h.world.entity_count();
            let replayed = h.tracker.drain_deferred();
            let events = h.end_tick(tick);

            let expected = (WORKERS * PER_WORKER) as usize;
            ensure(submitted == expected && replayed == expected, || {
                format!("tick {}: submitted {} replayed {} of {}", tick, submitted, replayed, expected)
            })?;
            ensure(h.world.entity_count() == before + expected, || {
                format!("tick {}: replay added {} entities", tick, h.world.entity_count() - before)
            })?;
            ensure(
                of_kind(&events, EventKind::SpawnEntity)
                    .iter()
                    .all(|e| e.cause().source == Some(Source::Deferred)),
                || format!("tick {}: replayed spawn not attributed to deferred replay", tick),
            )?;
            h.check_balanced(tick)?;
        }

        if self.reports_once() {
            let reported = h.report_count(ReportKind::AsyncAccess);
            ensure(reported == 1, || format!("expected 1 async access report, got {}", reported))?;
        }
        Ok(())
    }

    /// PST-009: RandomMutations - seeded nesting keeps every invariant.
    fn run_random_mutations(&self, h: &mut Harness) -> Result<(), String> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut next_entity = self.seed.wrapping_mul(0x517cc1b727220a95);

        for tick in 0..self.ticks {
            random_scope(&mut h.tracker, &mut rng, &mut next_entity, 0)?;
            h.tracker.tick();
            h.end_tick(tick);
            h.check_balanced(tick)?;

            for kind in LOSSY_REPORTS {
                ensure(h.report_count(kind) == 0, || format!("tick {}: tracker reported {}", tick, kind))?;
            }
            let leaked = h.tracker.current_context().has_captures();
            ensure(!leaked, || format!("tick {}: sentinel holds captures", tick))?;
        }
        Ok(())
    }
}

/// Opens a random scope, issues random mutations and maybe nests another scope.
fn random_scope(
    tracker: &mut PhaseTracker,
    rng: &mut ChaCha8Rng,
    next_entity: &mut u64,
    depth: usize,
) -> Result<(), String> {
    let phase = RANDOM_PHASES[rng.gen_range(0..RANDOM_PHASES.len())].into_ref();
    let mut ctx = tracker.create_context(&phase);
    if rng.gen_bool(0.7) {
        ctx.add_captures().map_err(phase_err)?;
    }
    if rng.gen_bool(0.5) {
        ctx.enable_capture(CaptureCategory::ScheduledTicks).map_err(phase_err)?;
    }
    if rng.gen_bool(0.3) {
        ctx.set_owner(UserId::from_seed(rng.gen_range(1..4))).map_err(phase_err)?;
    }

    let mutations = rng.gen_range(1..6);
    let nested = depth < 3 && rng.gen_bool(0.4);
    tracker
        .scoped(ctx, |t| {
            for _ in 0..mutations {
                random_mutation(t, rng, next_entity);
            }
            if nested {
                random_scope(t, rng, next_entity, depth + 1)
            } else {
                Ok(())
            }
        })
        .map_err(phase_err)?
}

fn random_mutation(tracker: &mut PhaseTracker, rng: &mut ChaCha8Rng, next_entity: &mut u64) -> MutationOutcome {
    let pos = BlockPos::new(rng.gen_range(0..8), 64, rng.gen_range(0..8));
    match rng.gen_range(0..6) {
        0 | 1 => {
            let flags = if rng.gen_bool(0.5) { ChangeFlags::ALL } else { ChangeFlags::NONE };
            tracker.set_block_state(pos, BlockState(rng.gen_range(0..6)), flags)
        }
        2 => {
            *next_entity = next_entity.wrapping_add(1);
            tracker.spawn_entity(EntitySpec::new(EntityId::from_seed(*next_entity), "zombie", pos))
        }
        3 => {
            if rng.gen_bool(0.5) {
                tracker.set_capture_position(Some(pos));
            }
            tracker.drop_item(ItemDrop::new("bone", rng.gen_range(1..4), pos))
        }
        4 => {
            let entity = EntityId::from_seed(rng.gen_range(1..4));
            tracker.drop_entity_item(entity, ItemDrop::new("rotten_flesh", 1, pos))
        }
        _ => tracker.schedule_tick(ScheduledTick {
            pos,
            delay: rng.gen_range(1..10),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_scenarios_pass() {
        let runner = ScenarioRunner::new(42).with_ticks(5);
        for scenario in ScenarioId::all() {
            let result = runner.run(scenario);
            assert!(
                result.passed,
                "{} failed: {}",
                scenario,
                result.failure_reason.unwrap_or_default()
            );
        }
    }

    #[test]
    fn test_random_mutations_are_deterministic() {
        let a = ScenarioRunner::new(7).with_ticks(10).run_with_export(ScenarioId::RandomMutations);
        let b = ScenarioRunner::new(7).with_ticks(10).run_with_export(ScenarioId::RandomMutations);
        assert_eq!(a.0.metrics.writes, b.0.metrics.writes);
        assert_eq!(a.0.metrics.events_posted, b.0.metrics.events_posted);
        assert_eq!(a.1.frames.len(), 10);
        assert_eq!(
            serde_json::to_string(&a.1).unwrap(),
            serde_json::to_string(&b.1).unwrap()
        );
    }

    #[test]
    fn test_quiet_config_skips_report_checks() {
        let runner = ScenarioRunner::new(3).with_ticks(3).with_config(TrackerConfig::quiet());
        let result = runner.run(ScenarioId::MismatchedCompletion);
        assert!(result.passed);
        assert_eq!(result.metrics.reports, 0);
    }

    #[test]
    fn test_bulk_capture_metrics() {
        let result = ScenarioRunner::new(1).with_ticks(4).run(ScenarioId::BulkCapture);
        assert!(result.passed);
        assert_eq!(result.metrics.writes, 12);
        assert_eq!(result.metrics.events_posted, 4);
        assert_eq!(result.metrics.stats.captured, 12);
    }
}
