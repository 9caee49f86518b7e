//! Cross-thread mutation submission.
//!
//! The scope stack belongs to one thread. Other threads hand mutations to an
//! [`AsyncMutations`] handle, which either queues them for replay on the
//! owning thread or rejects them, depending on [`AsyncPolicy`].

use crate::config::AsyncPolicy;
use crate::diagnostics::{AsyncReporter, ReportBuilder, ReportKind};
use crate::tracker::MutationOutcome;
use crossbeam::queue::SegQueue;
use phaser_env::{BlockPos, BlockState, ChangeFlags, EntityId, EntitySpec, ItemDrop, Mutation, ScheduledTick};
use std::sync::Arc;

/// Cloneable, thread-safe submission handle.
///
/// ```ignore
/// let handle = tracker.async_handle();
/// std::thread::spawn(move || {
///     handle.spawn_entity(EntitySpec::new(EntityId::new(), "arrow", pos));
/// });
/// tracker.tick(); // replays on the owning thread
/// ```
#[derive(Clone)]
pub struct AsyncMutations {
    queue: Arc<SegQueue<Mutation>>,
    policy: AsyncPolicy,
    reporter: AsyncReporter,
}

impl AsyncMutations {
    pub(crate) fn new(policy: AsyncPolicy, reporter: AsyncReporter) -> Self {
        Self {
            queue: Arc::new(SegQueue::new()),
            policy,
            reporter,
        }
    }

    pub fn policy(&self) -> AsyncPolicy {
        self.policy
    }

    /// Queues or rejects `mutation` according to the policy.
    pub fn submit(&self, mutation: Mutation) -> MutationOutcome {
        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("<unnamed>").to_string();
        let policy = self.policy;
        self.reporter.report(|| {
            let mut report = ReportBuilder::new(ReportKind::AsyncAccess, "Asynchronous access to the phase tracker");
            report
                .add_kv("Mutation", mutation.label())
                .add_kv("Thread", &thread_name)
                .add_kv("Policy", format!("{:?}", policy))
                .hr()
                .wrapped(
                    "The scope stack is owned by a single thread. Mutations from other threads \
                     are replayed on the owning thread or dropped, and lose their original scope.",
                );
            report.build()
        });

        match self.policy {
            AsyncPolicy::Queue => {
                tracing::debug!(mutation = mutation.label(), thread = %thread_name, "Deferred cross-thread mutation");
                self.queue.push(mutation);
                MutationOutcome::Deferred
            }
            AsyncPolicy::Drop => {
                tracing::debug!(mutation = mutation.label(), thread = %thread_name, "Rejected cross-thread mutation");
                MutationOutcome::Rejected
            }
        }
    }

    pub fn set_block_state(&self, pos: BlockPos, state: BlockState, flags: ChangeFlags) -> MutationOutcome {
        self.submit(Mutation::SetBlock { pos, state, flags })
    }

    pub fn spawn_entity(&self, entity: EntitySpec) -> MutationOutcome {
        self.submit(Mutation::SpawnEntity(entity))
    }

    pub fn drop_item(&self, drop: ItemDrop) -> MutationOutcome {
        self.submit(Mutation::DropItem(drop))
    }

    pub fn drop_entity_item(&self, entity: EntityId, drop: ItemDrop) -> MutationOutcome {
        self.submit(Mutation::DropEntityItem { entity, drop })
    }

    pub fn schedule_tick(&self, tick: ScheduledTick) -> MutationOutcome {
        self.submit(Mutation::ScheduleTick(tick))
    }

    /// Mutations waiting for replay.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn pop(&self) -> Option<Mutation> {
        self.queue.pop()
    }

    pub(crate) fn reporter(&self) -> &AsyncReporter {
        &self.reporter
    }
}

impl std::fmt::Debug for AsyncMutations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncMutations")
            .field("policy", &self.policy)
            .field("pending", &self.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::diagnostics::{Diagnostics, MemorySink};

    fn handle(policy: AsyncPolicy) -> (AsyncMutations, MemorySink) {
        let sink = MemorySink::new();
        let diagnostics = Diagnostics::new(&TrackerConfig::default(), Arc::new(sink.clone()));
        (AsyncMutations::new(policy, diagnostics.async_reporter()), sink)
    }

    #[test]
    fn test_queue_policy_defers_in_order() {
        let (handle, sink) = handle(AsyncPolicy::Queue);
        let a = ScheduledTick { pos: BlockPos::new(0, 0, 0), delay: 1 };
        let b = ScheduledTick { pos: BlockPos::new(1, 0, 0), delay: 2 };
        assert_eq!(handle.schedule_tick(a), MutationOutcome::Deferred);
        assert_eq!(handle.schedule_tick(b), MutationOutcome::Deferred);
        assert_eq!(handle.pending(), 2);
        assert_eq!(handle.pop(), Some(Mutation::ScheduleTick(a)));
        assert_eq!(handle.pop(), Some(Mutation::ScheduleTick(b)));
        assert_eq!(sink.count(ReportKind::AsyncAccess), 1);
    }

    #[test]
    fn test_drop_policy_rejects() {
        let (handle, sink) = handle(AsyncPolicy::Drop);
        let drop = ItemDrop::new("stone", 1, BlockPos::new(0, 0, 0));
        assert_eq!(handle.drop_item(drop), MutationOutcome::Rejected);
        assert_eq!(handle.pending(), 0);
        assert_eq!(sink.count(ReportKind::AsyncAccess), 1);
    }

    #[test]
    fn test_handle_is_shared_across_threads() {
        let (handle, sink) = handle(AsyncPolicy::Queue);
        let workers: Vec<_> = (0..4)
            .map(|i| {
                let handle = handle.clone();
                std::thread::spawn(move || {
                    for j in 0..10 {
                        handle.set_block_state(BlockPos::new(i, j, 0), BlockState(1), ChangeFlags::ALL);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(handle.pending(), 40);
        assert_eq!(sink.count(ReportKind::AsyncAccess), 1);
    }
}
