//! The orchestrator.
//!
//! [`PhaseTracker`] is the single entry point simulation code calls to mutate
//! the world. For every mutation it peeks the scope stack and either applies
//! the change immediately, buffers it in the current scope, or applies it
//! speculatively behind a single-record event. Completing a scope pops it and
//! runs its descriptor's unwind hook.
//!
//! # Scope lifecycle
//!
//! ```text
//! create_context ─► build_and_switch ─► body (entry points) ─► PhaseGuard drop
//!                        │                                        │
//!                   switch_to_phase                          complete_phase
//!                   (thread, transition,                     (pop, Unwinding scope,
//!                    runaway checks)                          unwind, drain check, pool)
//! ```

use crate::capture::{
    BlockDrop, BlockDrops, BlockEntitySpawns, BlockSpawn, Blocks, CaptureCategory, CaptureKind, Entities,
    EntityDrop, EntityDrops, ItemDrops, ScheduledTicks,
};
use crate::config::TrackerConfig;
use crate::context::PhaseContext;
use crate::deferred::AsyncMutations;
use crate::diagnostics::{DedupKey, DiagnosticSink, Diagnostics, ReportBuilder, ReportKind, TracingSink};
use crate::error::PhaseError;
use crate::phases::BuiltinPhase;
use crate::pool::ContextPool;
use crate::stack::{PhaseData, PhaseStack};
use crate::state::{PhaseId, PhaseRef};
use phaser_env::{
    BlockPos, BlockState, BlockTransaction, Cause, ChangeFlags, EntityId, EntitySpec, Event, EventBus, ItemDrop,
    Mutation, ScheduledTick, SimulationEngine, Source,
};
use serde::Serialize;
use std::any::Any;
use std::ops::{Deref, DerefMut};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Result of a mutation entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MutationOutcome {
    /// Written to the engine and visible now
    Applied,
    /// Buffered in the current scope; not visible until it completes
    Captured,
    /// The target already had that state
    Unchanged,
    /// The current scope does not permit the mutation
    Denied,
    /// Applied speculatively, then reverted by a listener
    Cancelled,
    /// Queued for replay on the owning thread
    Deferred,
    /// Submitted from a foreign thread and dropped
    Rejected,
    /// The engine or the scope could not take the mutation
    Failed,
}

impl MutationOutcome {
    /// True if the mutation is applied or will be once its scope completes.
    pub fn is_success(self) -> bool {
        matches!(
            self,
            MutationOutcome::Applied | MutationOutcome::Captured | MutationOutcome::Unchanged | MutationOutcome::Deferred
        )
    }
}

/// Running counters, exported by the simulation harness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrackerStats {
    pub scopes_entered: u64,
    pub scopes_completed: u64,
    pub events_posted: u64,
    pub applied: u64,
    pub captured: u64,
    pub cancelled: u64,
    pub denied: u64,
    pub deferred_replayed: u64,
}

/// Descriptors the tracker enters on its own.
#[derive(Debug)]
struct Builtins {
    unwinding: PhaseRef,
    neighbor_notify: PhaseRef,
    restoration: PhaseRef,
    deferred_replay: PhaseRef,
}

impl Builtins {
    fn new() -> Self {
        Self {
            unwinding: BuiltinPhase::Unwinding.into_ref(),
            neighbor_notify: BuiltinPhase::NeighborNotify.into_ref(),
            restoration: BuiltinPhase::Restoration.into_ref(),
            deferred_replay: BuiltinPhase::DeferredReplay.into_ref(),
        }
    }
}

/// Execution-scope stack with causal attribution and transactional mutation
/// buffering.
///
/// The tracker is an explicitly constructed service bound to the thread that
/// created it. It is `Send`, so it can be moved to a dedicated simulation
/// thread and rebound with [`PhaseTracker::bind_to_current_thread`].
pub struct PhaseTracker {
    stack: PhaseStack,
    engine: Box<dyn SimulationEngine>,
    bus: Box<dyn EventBus>,
    config: TrackerConfig,
    diagnostics: Diagnostics,
    pool: ContextPool,
    deferred: AsyncMutations,
    builtins: Builtins,
    main_thread: ThreadId,
    process_depth: usize,
    /// Nested reactions applied directly by a scope that ignores notifications.
    notify_depth: usize,
    ticks: u64,
    stats: TrackerStats,
}

impl PhaseTracker {
    /// Creates a tracker with the default configuration, reporting through `tracing`.
    pub fn new<E, B>(engine: E, bus: B) -> Self
    where
        E: SimulationEngine + 'static,
        B: EventBus + 'static,
    {
        let config = TrackerConfig::default();
        let diagnostics = Diagnostics::new(&config, Arc::new(TracingSink));
        let deferred = AsyncMutations::new(config.async_policy, diagnostics.async_reporter());
        Self {
            stack: PhaseStack::new(BuiltinPhase::Complete.into_ref()),
            engine: Box::new(engine),
            bus: Box::new(bus),
            pool: ContextPool::new(config.context_cache_size),
            config,
            diagnostics,
            deferred,
            builtins: Builtins::new(),
            main_thread: thread::current().id(),
            process_depth: 0,
            notify_depth: 0,
            ticks: 0,
            stats: TrackerStats::default(),
        }
    }

    /// Replaces the configuration.
    ///
    /// Call before handing out [`AsyncMutations`] handles; existing handles
    /// keep feeding the previous queue.
    pub fn with_config(self, config: TrackerConfig) -> Self {
        let sink = self.diagnostics.sink();
        self.rebuild(config, sink)
    }

    /// Replaces the diagnostic sink.
    pub fn with_sink(self, sink: Arc<dyn DiagnosticSink>) -> Self {
        let config = self.config.clone();
        self.rebuild(config, sink)
    }

    fn rebuild(mut self, config: TrackerConfig, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = Diagnostics::new(&config, sink);
        self.deferred = AsyncMutations::new(config.async_policy, self.diagnostics.async_reporter());
        self.pool = ContextPool::new(config.context_cache_size);
        self.config = config;
        self
    }

    /// Makes the calling thread the owner of the scope stack.
    pub fn bind_to_current_thread(&mut self) {
        self.main_thread = thread::current().id();
    }

    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.main_thread
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn stats(&self) -> TrackerStats {
        self.stats
    }

    pub fn engine(&self) -> &dyn SimulationEngine {
        self.engine.as_ref()
    }

    pub fn depth(&self) -> usize {
        self.stack.depth()
    }

    pub fn stack(&self) -> &PhaseStack {
        &self.stack
    }

    pub fn current_phase(&self) -> PhaseId {
        self.stack.peek().phase()
    }

    pub fn current_context(&self) -> &PhaseContext {
        &self.stack.peek().context
    }

    /// Nesting depth of unwinds currently running.
    pub fn process_depth(&self) -> usize {
        self.process_depth
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn pool(&self) -> &ContextPool {
        &self.pool
    }

    /// A handle foreign threads use to submit mutations.
    pub fn async_handle(&self) -> AsyncMutations {
        self.deferred.clone()
    }

    /// Renders the current stack, top first.
    pub fn dump_stack(&self) -> Vec<String> {
        self.stack.dump()
    }

    // =========================================================================
    // SCOPE LIFECYCLE
    // =========================================================================

    /// A pristine context for `state`, recycled from the pool when possible.
    pub fn create_context(&mut self, state: &PhaseRef) -> PhaseContext {
        self.pool.acquire(state)
    }

    /// Enters `context`, runs `body` inside it and completes it.
    pub fn scoped<R, F>(&mut self, context: PhaseContext, body: F) -> Result<R, PhaseError>
    where
        F: FnOnce(&mut PhaseTracker) -> R,
    {
        let mut guard = context.build_and_switch(self)?;
        let out = body(&mut *guard);
        guard.close();
        Ok(out)
    }

    /// Pushes a switched context.
    ///
    /// Incompatible transitions and runaway depth are reported but never
    /// block the switch.
    pub fn switch_to_phase(&mut self, context: PhaseContext) -> Result<(), PhaseError> {
        if !self.is_owner_thread() {
            self.report_async_access("switch_to_phase");
            return Err(PhaseError::WrongThread);
        }
        if !context.is_switched() {
            return Err(PhaseError::NotSwitched);
        }
        self.push_frame(context)
    }

    fn push_frame(&mut self, mut context: PhaseContext) -> Result<(), PhaseError> {
        let state = context.state().clone();
        let current = self.stack.peek().state.clone();

        if !current.can_switch_to(state.as_ref()) {
            let (from, to) = (current.id(), state.id());
            let stack = &self.stack;
            self.diagnostics.report_once(DedupKey::Transition { from, to }, || {
                let mut report = ReportBuilder::new(ReportKind::IncompatibleTransition, "Switching to an incompatible phase");
                report
                    .add_kv("Current phase", from)
                    .add_kv("Entering phase", to)
                    .wrapped("The switch proceeds anyway. Effects recorded by the new phase may be attributed to the wrong cause.")
                    .hr()
                    .add("Phases:")
                    .extend(stack.dump());
                report.build()
            });
        }

        if self.stack.check_for_runaways(self.config.runaway_depth) {
            let depth = self.stack.depth();
            let stack = &self.stack;
            self.diagnostics.report_runaway(|| {
                let mut report = ReportBuilder::new(ReportKind::Runaway, "Switching phase while too many phases are active");
                report
                    .add_kv("Entering phase", state.id())
                    .add_kv("Stack depth", depth)
                    .wrapped("Phases are being entered without completing. Check that every scope is closed.")
                    .hr()
                    .add("Phases:")
                    .extend(stack.dump());
                report.build()
            });
        }

        if self.config.capture_entry_traces {
            context.set_entry_trace(std::backtrace::Backtrace::force_capture().to_string());
        }

        self.stack.push(state, context)?;
        self.stats.scopes_entered += 1;
        Ok(())
    }

    /// Completes the scope on top of the stack.
    ///
    /// Never fails: an empty stack or a mismatched top is reported and the
    /// stack is restored to a consistent state.
    pub fn complete_phase(&mut self, expected: PhaseId) {
        if self.stack.is_empty() {
            self.diagnostics.report_once(DedupKey::EmptyStack, || {
                let mut report = ReportBuilder::new(ReportKind::EmptyStackCompletion, "Completing a phase on an empty stack");
                report
                    .add_kv("Completing", expected)
                    .wrapped("No phase is active. The completion is ignored.");
                report.build()
            });
            return;
        }

        let actual = self.stack.peek().phase();
        if actual != expected {
            let stack = &self.stack;
            self.diagnostics.report_once(DedupKey::Completion { expected, actual }, || {
                let mut report = ReportBuilder::new(ReportKind::IncorrectCompletion, "Completing incorrect phase");
                report
                    .add_kv("Completing", expected)
                    .add_kv("Top of stack", actual)
                    .wrapped("The phase on top of the stack is force-completed to keep the stack balanced.")
                    .hr()
                    .add("Phases:")
                    .extend(stack.dump());
                report.build()
            });
            if let Some(stray) = self.stack.pop() {
                self.unwind_frame(stray);
            }
            if !self.stack.is_empty() && self.stack.peek().phase() == expected {
                if let Some(frame) = self.stack.pop() {
                    self.unwind_frame(frame);
                }
            }
            return;
        }

        if self.stack.depth() > self.config.runaway_depth {
            let depth = self.stack.depth();
            let stack = &self.stack;
            self.diagnostics.report_once(DedupKey::RunawayCompletion(expected), || {
                let mut report = ReportBuilder::new(ReportKind::RunawayCompletion, "Completing phase with runaway stack");
                report
                    .add_kv("Completing", expected)
                    .add_kv("Stack depth", depth)
                    .hr()
                    .add("Phases:")
                    .extend(stack.dump());
                report.build()
            });
        }

        if let Some(frame) = self.stack.pop() {
            self.unwind_frame(frame);
        }
    }

    /// Runs the unwind hook of a popped frame and recycles its context.
    fn unwind_frame(&mut self, frame: PhaseData) {
        let PhaseData { state, mut context } = frame;
        let phase = state.id();
        self.stats.scopes_completed += 1;

        if self.process_depth >= self.config.max_block_processing_depth {
            let depth = self.process_depth;
            let pending = context.captures().sizes();
            self.diagnostics.report_once(DedupKey::Depth(phase), || {
                let mut report = ReportBuilder::new(ReportKind::MaxProcessingDepth, "Maximum processing depth reached");
                report
                    .add_kv("Phase", phase)
                    .add_kv("Processing depth", depth)
                    .wrapped("Captures of this phase are discarded to stop a runaway chain of effects.");
                for (category, len) in pending.iter().filter(|(_, len)| *len > 0) {
                    report.add(format!("  {}: {}", category, len));
                }
                report.build()
            });
            tracing::debug!(phase = %phase, depth, "Discarding captures past the processing depth limit");
            context.discard_captures();
            self.pool.release(context);
            return;
        }

        self.process_depth += 1;
        let posted = state.requires_post()
            && context.has_captures()
            && self
                .unwinding_context(phase, &context)
                .and_then(|unwinding| self.push_frame(unwinding))
                .is_ok();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| state.unwind(&mut context, self)));

        if posted {
            self.complete_phase(BuiltinPhase::Unwinding.phase_id());
        }
        self.process_depth -= 1;

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(payload) => Some(format!("panicked: {}", panic_message(payload.as_ref()))),
        };
        if let Some(reason) = failure {
            self.diagnostics.report_once(DedupKey::UnwindFailure(phase), || {
                let mut report = ReportBuilder::new(ReportKind::UnwindFailure, "Exception while unwinding phase");
                report.add_kv("Phase", phase).add_kv("Reason", &reason);
                report.build()
            });
        }

        if context.not_all_captures_processed() {
            self.diagnostics.report_once(DedupKey::Unprocessed(phase), || {
                let mut report = ReportBuilder::new(ReportKind::UnprocessedCaptures, "Failing to process all captured records");
                report
                    .add_kv("Phase", phase)
                    .wrapped("The unwind hook left records behind. They are discarded.")
                    .hr();
                context.print_custom(&mut report, 2);
                report.build()
            });
            context.discard_captures();
        }

        self.pool.release(context);
    }

    /// The scope effects of a commit are attributed to.
    fn unwinding_context(&mut self, phase: PhaseId, unwound: &PhaseContext) -> Result<PhaseContext, PhaseError> {
        let mut ctx = self.pool.acquire(&self.builtins.unwinding);
        ctx.set_source(Source::Phase(phase.name()))?
            .owner_from(|| unwound.owner())?
            .notifier_from(|| unwound.notifier())?
            .add_captures()?
            .enable_capture(CaptureCategory::ScheduledTicks)?;
        ctx.mark_switched();
        Ok(ctx)
    }

    // =========================================================================
    // MUTATION ENTRY POINTS
    // =========================================================================

    /// Changes the block at `pos`.
    pub fn set_block_state(&mut self, pos: BlockPos, state: BlockState, flags: ChangeFlags) -> MutationOutcome {
        if !self.is_owner_thread() {
            return self.deferred.set_block_state(pos, state, flags);
        }
        if !self.engine.is_loaded(pos) {
            return MutationOutcome::Failed;
        }
        let current = self.engine.block_state(pos);
        if current == state {
            return MutationOutcome::Unchanged;
        }
        if self.stack.is_empty() && self.config.report_untracked_changes {
            self.report_untracked_change(pos, current, state);
        }

        let (bulk, per_event) = {
            let top = self.stack.peek();
            (
                top.state.does_bulk_block_capture(&top.context),
                top.state.does_block_event_tracking(&top.context),
            )
        };

        if bulk {
            return self.capture::<Blocks>(BlockTransaction::new(pos, current, state, flags));
        }
        if per_event {
            return self.apply_block_event(pos, state, flags);
        }
        match self.engine.set_block_state(pos, state) {
            Some(_) => {
                self.stats.applied += 1;
                if flags.update_neighbors {
                    self.notify_neighbors(pos);
                }
                MutationOutcome::Applied
            }
            None => MutationOutcome::Failed,
        }
    }

    /// Applies a change speculatively behind a one-transaction event.
    fn apply_block_event(&mut self, pos: BlockPos, state: BlockState, flags: ChangeFlags) -> MutationOutcome {
        let Some(original) = self.engine.set_block_state(pos, state) else {
            return MutationOutcome::Failed;
        };
        let cause = self.current_cause();
        let mut event = Event::change_block(cause, vec![BlockTransaction::new(pos, original, state, flags)]);
        let cancelled = self.post_event(&mut event);
        let valid = match &event {
            Event::ChangeBlock(change) => change.transactions.iter().all(|t| t.valid),
            _ => false,
        };

        if cancelled || !valid {
            self.restore_block(pos, original);
            self.stats.cancelled += 1;
            return MutationOutcome::Cancelled;
        }

        self.stats.applied += 1;
        if flags.update_neighbors {
            self.notify_neighbors(pos);
        }
        MutationOutcome::Applied
    }

    /// Puts `original` back silently and forgets drops produced at `pos`.
    fn restore_block(&mut self, pos: BlockPos, original: BlockState) {
        if let Some(top) = self.stack.peek_mut() {
            if let Ok(drops) = top.context.buffer_mut::<BlockDrops>() {
                drops.drain_where(|d| d.block == pos);
            }
        }

        let state = self.builtins.restoration.clone();
        let mut ctx = self.pool.acquire(&state);
        let tagged = ctx.set_source(Source::Block(pos)).is_ok();
        let restored = tagged
            && self
                .scoped(ctx, |tracker| tracker.engine.set_block_state(pos, original))
                .is_ok();
        if !restored {
            self.engine.set_block_state(pos, original);
        }
        tracing::debug!(pos = %pos, state = original.0, "Restored block after cancelled change");
    }

    /// Spawns an entity, subject to the current scope's policy.
    pub fn spawn_entity(&mut self, entity: EntitySpec) -> MutationOutcome {
        if !self.is_owner_thread() {
            return self.deferred.spawn_entity(entity);
        }
        if entity.forced {
            return self.add_entity_now(entity);
        }

        let (allows, block_spawn, bulk, per_event) = {
            let top = self.stack.peek();
            let ctx = &top.context;
            (
                top.state.allows_entity_spawns(),
                ctx.capture_position()
                    .filter(|_| ctx.is_capturing(CaptureCategory::BlockEntitySpawns)),
                top.state.does_bulk_entity_capture(ctx),
                !ctx.is_empty() && ctx.allows_entity_events(),
            )
        };

        if !allows {
            self.stats.denied += 1;
            tracing::debug!(phase = %self.current_phase(), kind = %entity.kind, "Entity spawn denied");
            return MutationOutcome::Denied;
        }
        if let Some(block) = block_spawn {
            return self.capture::<BlockEntitySpawns>(BlockSpawn { block, entity });
        }
        if bulk {
            return self.capture::<Entities>(entity);
        }
        if per_event {
            let cause = self.current_cause();
            return self.spawn_with_event(entity, cause);
        }
        self.add_entity_now(entity)
    }

    /// Spawns an entity under an explicit cause, bypassing the scope stack.
    pub fn spawn_entity_with_cause(&mut self, entity: EntitySpec, cause: Cause) -> MutationOutcome {
        if !self.is_owner_thread() {
            return self.deferred.spawn_entity(entity);
        }
        self.spawn_with_event(entity, cause)
    }

    fn spawn_with_event(&mut self, entity: EntitySpec, cause: Cause) -> MutationOutcome {
        let mut event = Event::spawn_entity(cause, vec![entity]);
        if self.post_event(&mut event) {
            self.stats.cancelled += 1;
            return MutationOutcome::Cancelled;
        }
        let entities = match event {
            Event::SpawnEntity(spawn) => spawn.entities,
            _ => Vec::new(),
        };
        if entities.is_empty() {
            self.stats.cancelled += 1;
            return MutationOutcome::Cancelled;
        }
        let mut outcome = MutationOutcome::Applied;
        for entity in entities {
            if self.add_entity_now(entity) == MutationOutcome::Failed {
                outcome = MutationOutcome::Failed;
            }
        }
        outcome
    }

    fn add_entity_now(&mut self, entity: EntitySpec) -> MutationOutcome {
        if self.engine.add_entity(entity) {
            self.stats.applied += 1;
            MutationOutcome::Applied
        } else {
            MutationOutcome::Failed
        }
    }

    /// Emits an item stack, attributed to the block being processed if any.
    pub fn drop_item(&mut self, drop: ItemDrop) -> MutationOutcome {
        if !self.is_owner_thread() {
            return self.deferred.drop_item(drop);
        }
        let (block_drop, items) = {
            let top = self.stack.peek();
            (
                top.context
                    .capture_position()
                    .filter(|_| top.state.tracks_block_specific_drops(&top.context)),
                top.state.does_capture_item_drops(&top.context),
            )
        };
        if let Some(block) = block_drop {
            return self.capture::<BlockDrops>(BlockDrop { block, drop });
        }
        if items {
            return self.capture::<ItemDrops>(drop);
        }
        self.engine.drop_item(drop);
        self.stats.applied += 1;
        MutationOutcome::Applied
    }

    /// Emits an item stack on behalf of an entity.
    pub fn drop_entity_item(&mut self, entity: EntityId, drop: ItemDrop) -> MutationOutcome {
        if !self.is_owner_thread() {
            return self.deferred.drop_entity_item(entity, drop);
        }
        let (per_entity, items) = {
            let top = self.stack.peek();
            (
                top.state.tracks_entity_drops(&top.context),
                top.state.does_capture_item_drops(&top.context),
            )
        };
        if per_entity {
            return self.capture::<EntityDrops>(EntityDrop { entity, drop });
        }
        if items {
            return self.capture::<ItemDrops>(drop);
        }
        self.engine.drop_item(drop);
        self.stats.applied += 1;
        MutationOutcome::Applied
    }

    /// Registers a scheduled block update.
    pub fn schedule_tick(&mut self, tick: ScheduledTick) -> MutationOutcome {
        if !self.is_owner_thread() {
            return self.deferred.schedule_tick(tick);
        }
        let capture = {
            let top = self.stack.peek();
            top.state.does_capture_scheduled_ticks(&top.context)
        };
        if capture {
            return self.capture::<ScheduledTicks>(tick);
        }
        self.engine.schedule_tick(tick);
        self.stats.applied += 1;
        MutationOutcome::Applied
    }

    /// Routes a replayable mutation through the matching entry point.
    pub fn apply_mutation(&mut self, mutation: Mutation) -> MutationOutcome {
        match mutation {
            Mutation::SetBlock { pos, state, flags } => self.set_block_state(pos, state, flags),
            Mutation::SpawnEntity(entity) => self.spawn_entity(entity),
            Mutation::DropItem(drop) => self.drop_item(drop),
            Mutation::DropEntityItem { entity, drop } => self.drop_entity_item(entity, drop),
            Mutation::ScheduleTick(tick) => self.schedule_tick(tick),
        }
    }

    /// Sets the block drops and spawns are attributed to in the current scope.
    ///
    /// Returns the previous position. Ignored while no scope is active.
    pub fn set_capture_position(&mut self, pos: Option<BlockPos>) -> Option<BlockPos> {
        self.stack
            .peek_mut()
            .and_then(|top| top.context.set_capture_position(pos))
    }

    fn capture<K: CaptureKind>(&mut self, record: K::Record) -> MutationOutcome {
        let result = match self.stack.peek_mut() {
            Some(top) => top.context.buffer_mut::<K>().map(move |buffer| buffer.push(record)),
            None => Err(PhaseError::CaptureNotEnabled(K::CATEGORY)),
        };
        match result {
            Ok(()) => {
                self.stats.captured += 1;
                MutationOutcome::Captured
            }
            Err(err) => {
                let phase = self.current_phase();
                let stack = &self.stack;
                self.diagnostics.report_once(DedupKey::CaptureFailure(phase), || {
                    let mut report = ReportBuilder::new(ReportKind::CaptureFailure, "Failed to capture a mutation");
                    report
                        .add_kv("Phase", phase)
                        .add_kv("Category", K::CATEGORY)
                        .add_kv("Error", &err)
                        .hr()
                        .add("Phases:")
                        .extend(stack.dump());
                    report.build()
                });
                MutationOutcome::Failed
            }
        }
    }

    // =========================================================================
    // NEIGHBOUR NOTIFICATION
    // =========================================================================

    /// Notifies every neighbour of `pos` that it changed.
    pub fn notify_neighbors(&mut self, pos: BlockPos) {
        for neighbor in self.engine.neighbors(pos) {
            self.notify_neighbor(neighbor, pos);
        }
    }

    /// Lets `notified` react to a change at `source` inside a nested scope.
    ///
    /// The reaction inherits the notifier of the current scope and captures
    /// only if the current scope captures.
    pub fn notify_neighbor(&mut self, notified: BlockPos, source: BlockPos) {
        if !self.engine.is_loaded(notified) {
            return;
        }
        let (ignores, captures, notifier) = {
            let top = self.stack.peek();
            (
                top.state.ignores_notifications(),
                top.state.does_bulk_block_capture(&top.context),
                top.context.notifier().or(top.context.owner()),
            )
        };

        if ignores {
            if self.notify_depth >= self.config.max_block_processing_depth {
                let phase = self.current_phase();
                let depth = self.notify_depth;
                self.diagnostics.report_once(DedupKey::Depth(phase), || {
                    let mut report =
                        ReportBuilder::new(ReportKind::MaxProcessingDepth, "Maximum processing depth reached");
                    report
                        .add_kv("Phase", phase)
                        .add_kv("Notification depth", depth)
                        .add_kv("Notified", notified)
                        .wrapped("The neighbour reaction is skipped to stop a runaway chain of effects.");
                    report.build()
                });
                return;
            }
            self.notify_depth += 1;
            for mutation in self.engine.neighbor_changed(notified, source) {
                self.apply_mutation(mutation);
            }
            self.notify_depth -= 1;
            return;
        }

        if self.stack.depth() >= self.config.max_block_processing_depth {
            let phase = self.builtins.neighbor_notify.id();
            let depth = self.stack.depth();
            self.diagnostics.report_once(DedupKey::Depth(phase), || {
                let mut report = ReportBuilder::new(ReportKind::MaxProcessingDepth, "Maximum processing depth reached");
                report
                    .add_kv("Phase", phase)
                    .add_kv("Stack depth", depth)
                    .add_kv("Notified", notified)
                    .wrapped("The neighbour notification is skipped to stop a runaway chain of effects.");
                report.build()
            });
            return;
        }

        if let Err(err) = self.notify_in_scope(notified, source, captures, notifier) {
            tracing::warn!(%err, notified = %notified, "Neighbor notification failed");
        }
    }

    fn notify_in_scope(
        &mut self,
        notified: BlockPos,
        source: BlockPos,
        captures: bool,
        notifier: Option<phaser_env::UserId>,
    ) -> Result<(), PhaseError> {
        let mut ctx = self.pool.acquire(&self.builtins.neighbor_notify);
        ctx.set_source(Source::Block(source))?.notifier_from(|| notifier)?;
        if captures {
            ctx.add_block_captures()?
                .add_entity_captures()?
                .enable_capture(CaptureCategory::ScheduledTicks)?;
        }
        self.scoped(ctx, |tracker| {
            for mutation in tracker.engine.neighbor_changed(notified, source) {
                tracker.apply_mutation(mutation);
            }
        })
    }

    // =========================================================================
    // COMMIT PRIMITIVES (used by unwind hooks)
    // =========================================================================

    /// Posts an event to the bus. Returns true if it ended up cancelled.
    pub fn post_event(&mut self, event: &mut Event) -> bool {
        self.stats.events_posted += 1;
        let cancelled = self.bus.post(event);
        tracing::trace!(kind = %event.kind(), records = event.len(), cancelled, "Posted event");
        cancelled
    }

    /// Writes a captured transaction and notifies neighbours if its flags ask for it.
    pub fn commit_block(&mut self, transaction: &BlockTransaction) -> bool {
        match self.engine.set_block_state(transaction.pos, transaction.replacement) {
            Some(_) => {
                self.stats.applied += 1;
                if transaction.flags.update_neighbors {
                    self.notify_neighbors(transaction.pos);
                }
                true
            }
            None => false,
        }
    }

    pub fn commit_entity(&mut self, entity: EntitySpec) -> bool {
        self.add_entity_now(entity) == MutationOutcome::Applied
    }

    pub fn commit_drop(&mut self, drop: ItemDrop) {
        self.stats.applied += 1;
        self.engine.drop_item(drop);
    }

    pub fn commit_tick(&mut self, tick: ScheduledTick) {
        self.stats.applied += 1;
        self.engine.schedule_tick(tick);
    }

    /// The cause of the scope on top of the stack.
    pub fn current_cause(&self) -> Cause {
        self.stack.peek().context.cause()
    }

    // =========================================================================
    // DEFERRED REPLAY
    // =========================================================================

    /// Advances the tick counter and replays deferred mutations on cadence.
    ///
    /// Returns the number of mutations replayed.
    pub fn tick(&mut self) -> usize {
        self.ticks += 1;
        if !self.is_owner_thread() {
            self.report_async_access("tick");
            return 0;
        }
        let interval = self.config.deferred_drain_interval.max(1);
        if self.ticks % interval != 0 || self.deferred.pending() == 0 {
            return 0;
        }
        self.drain_deferred()
    }

    /// Replays every mutation queued so far inside a deferred-replay scope.
    pub fn drain_deferred(&mut self) -> usize {
        let pending = self.deferred.pending();
        if pending == 0 {
            return 0;
        }
        let mut ctx = self.pool.acquire(&self.builtins.deferred_replay);
        let setup = ctx
            .set_source(Source::Deferred)
            .and_then(|ctx| ctx.add_captures())
            .and_then(|ctx| ctx.enable_capture(CaptureCategory::ScheduledTicks))
            .map(|_| ());
        let replayed = setup.and_then(|()| {
            self.scoped(ctx, |tracker| {
                let mut replayed = 0;
                for _ in 0..pending {
                    let Some(mutation) = tracker.deferred.pop() else {
                        break;
                    };
                    tracker.apply_mutation(mutation);
                    replayed += 1;
                }
                replayed
            })
        });
        match replayed {
            Ok(count) => {
                self.stats.deferred_replayed += count as u64;
                tracing::debug!(count, tick = self.ticks, "Replayed deferred mutations");
                count
            }
            Err(err) => {
                tracing::warn!(%err, "Deferred replay could not start");
                0
            }
        }
    }

    // =========================================================================
    // REPORTS
    // =========================================================================

    fn report_async_access(&self, operation: &str) {
        self.deferred.reporter().report(|| {
            let mut report = ReportBuilder::new(ReportKind::AsyncAccess, "Asynchronous access to the phase tracker");
            report
                .add_kv("Operation", operation)
                .add_kv("Thread", thread::current().name().unwrap_or("<unnamed>"))
                .wrapped("The scope stack is owned by a single thread.");
            report.build()
        });
    }

    fn report_untracked_change(&mut self, pos: BlockPos, from: BlockState, to: BlockState) {
        self.diagnostics.report_once(DedupKey::Untracked, || {
            let mut report = ReportBuilder::new(ReportKind::UntrackedChange, "Block changed while no phase is active");
            report
                .add_kv("Position", pos)
                .add_kv("From", from.0)
                .add_kv("To", to.0)
                .wrapped("The change is applied without a cause.");
            report.build()
        });
    }

    pub(crate) fn report_body_panic(&mut self, phase: PhaseId) {
        let stack = &self.stack;
        self.diagnostics.report_once(DedupKey::BodyPanic(phase), || {
            let mut report = ReportBuilder::new(ReportKind::BodyPanic, "Phase body panicked");
            report
                .add_kv("Phase", phase)
                .wrapped("The phase is completed while unwinding the panic.")
                .hr()
                .add("Phases:")
                .extend(stack.dump());
            report.build()
        });
    }
}

impl std::fmt::Debug for PhaseTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseTracker")
            .field("depth", &self.stack.depth())
            .field("current", &self.current_phase())
            .field("process_depth", &self.process_depth)
            .field("ticks", &self.ticks)
            .field("stats", &self.stats)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

/// RAII handle for an active scope.
///
/// Dropping the guard completes the scope, also while a panic unwinds
/// through the body. Nested scopes are entered through the guard, so the
/// borrow checker keeps them strictly LIFO.
///
/// ```ignore
/// let mut ctx = tracker.create_context(&tick);
/// ctx.add_block_captures()?;
/// let mut guard = ctx.build_and_switch(&mut tracker)?;
/// guard.set_block_state(pos, state, ChangeFlags::ALL);
/// // dropped here: captures are unwound
/// ```
pub struct PhaseGuard<'a> {
    tracker: &'a mut PhaseTracker,
    phase: PhaseId,
    closed: bool,
}

impl<'a> PhaseGuard<'a> {
    pub(crate) fn new(tracker: &'a mut PhaseTracker, phase: PhaseId) -> Self {
        Self {
            tracker,
            phase,
            closed: false,
        }
    }

    pub fn phase(&self) -> PhaseId {
        self.phase
    }

    /// Completes the scope now.
    pub fn close(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if !self.closed {
            self.closed = true;
            self.tracker.complete_phase(self.phase);
        }
    }
}

impl Deref for PhaseGuard<'_> {
    type Target = PhaseTracker;

    fn deref(&self) -> &PhaseTracker {
        &*self.tracker
    }
}

impl DerefMut for PhaseGuard<'_> {
    fn deref_mut(&mut self) -> &mut PhaseTracker {
        &mut *self.tracker
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if thread::panicking() {
            self.tracker.report_body_panic(self.phase);
        }
        self.finish();
    }
}
