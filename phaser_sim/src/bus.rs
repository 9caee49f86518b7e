//! Recording event bus with scripted cancellation.

use phaser_env::{BlockPos, Event, EventBus, EventKind};
use std::sync::{Arc, Mutex, MutexGuard};

/// Which events the bus cancels.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum CancelPolicy {
    #[default]
    None,
    All,
    /// Cancel every event of this kind
    Kind(EventKind),
    /// Invalidate block transactions at this position, leave the event itself alone
    Position(BlockPos),
}

#[derive(Debug, Default)]
struct BusState {
    policy: CancelPolicy,
    posted: Vec<Event>,
    cancelled: u64,
}

/// Records every posted event. Clones share the log.
#[derive(Debug, Default, Clone)]
pub struct RecordingBus {
    inner: Arc<Mutex<BusState>>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: CancelPolicy) -> Self {
        let bus = Self::default();
        bus.set_policy(policy);
        bus
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Changes the policy for subsequent posts.
    pub fn set_policy(&self, policy: CancelPolicy) {
        self.lock().policy = policy;
    }

    /// Every event posted so far, as listeners left them.
    pub fn posted(&self) -> Vec<Event> {
        self.lock().posted.clone()
    }

    pub fn posted_of(&self, kind: EventKind) -> Vec<Event> {
        self.lock().posted.iter().filter(|e| e.kind() == kind).cloned().collect()
    }

    pub fn event_count(&self) -> usize {
        self.lock().posted.len()
    }

    pub fn cancelled_count(&self) -> u64 {
        self.lock().cancelled
    }

    /// Removes and returns the log.
    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut self.lock().posted)
    }
}

impl EventBus for RecordingBus {
    fn post(&mut self, event: &mut Event) -> bool {
        let mut bus = self.lock();
        match &bus.policy {
            CancelPolicy::None => {}
            CancelPolicy::All => event.set_cancelled(true),
            CancelPolicy::Kind(kind) => {
                if event.kind() == *kind {
                    event.set_cancelled(true);
                }
            }
            CancelPolicy::Position(pos) => {
                if let Event::ChangeBlock(change) = event {
                    for transaction in change.transactions.iter_mut().filter(|t| t.pos == *pos) {
                        transaction.valid = false;
                    }
                }
            }
        }
        let cancelled = event.is_cancelled();
        if cancelled {
            bus.cancelled += 1;
        }
        bus.posted.push(event.clone());
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phaser_env::{BlockState, BlockTransaction, Cause, ChangeFlags};

    fn change(pos: BlockPos) -> Event {
        Event::change_block(
            Cause::of_phase("test"),
            vec![BlockTransaction::new(pos, BlockState::AIR, BlockState(1), ChangeFlags::ALL)],
        )
    }

    #[test]
    fn test_kind_policy_cancels_matching_events() {
        let mut bus = RecordingBus::with_policy(CancelPolicy::Kind(EventKind::ChangeBlock));
        let mut event = change(BlockPos::new(0, 0, 0));
        assert!(bus.post(&mut event));
        let mut spawn = Event::spawn_entity(Cause::of_phase("test"), vec![]);
        assert!(!bus.post(&mut spawn));
        assert_eq!(bus.event_count(), 2);
        assert_eq!(bus.cancelled_count(), 1);
    }

    #[test]
    fn test_position_policy_invalidates_without_cancelling() {
        let pos = BlockPos::new(1, 2, 3);
        let mut bus = RecordingBus::with_policy(CancelPolicy::Position(pos));
        let mut event = change(pos);
        assert!(!bus.post(&mut event));
        match &bus.posted()[0] {
            Event::ChangeBlock(change) => assert!(!change.transactions[0].valid),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
