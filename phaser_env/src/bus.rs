//! Event bus boundary and the listener-list implementation.

use crate::event::Event;

/// Dispatches synthesized events to listeners.
///
/// # Packet Flow
///
/// ```text
/// Scope unwind              EventBus                 Listeners
///   |                           |                          |
///   |-- post(&mut event) ------>|                          |
///   |                           |-- each listener -------->|  (may cancel,
///   |                           |<-------------------------|   filter, invalidate)
///   |<-- cancelled: bool -------|                          |
/// ```
pub trait EventBus: Send {
    /// Posts an event to every listener.
    ///
    /// Listeners may mutate the event (cancel it, filter spawned entities,
    /// invalidate block transactions). Returns true if the event ended up
    /// cancelled.
    fn post(&mut self, event: &mut Event) -> bool;
}

/// A listener callback registered on a [`ListenerBus`].
pub type Listener = Box<dyn FnMut(&mut Event) + Send>;

/// Production bus: an ordered list of listeners.
///
/// Listeners run in registration order; a cancelled event is still shown to
/// later listeners so they can un-cancel it.
#[derive(Default)]
pub struct ListenerBus {
    listeners: Vec<Listener>,
    posted: u64,
}

impl ListenerBus {
    /// Creates a bus with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener.
    pub fn register<F>(&mut self, listener: F)
    where
        F: FnMut(&mut Event) + Send + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Builder-style registration.
    pub fn with_listener<F>(mut self, listener: F) -> Self
    where
        F: FnMut(&mut Event) + Send + 'static,
    {
        self.register(listener);
        self
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Number of events posted so far.
    pub fn posted(&self) -> u64 {
        self.posted
    }
}

impl EventBus for ListenerBus {
    fn post(&mut self, event: &mut Event) -> bool {
        self.posted += 1;
        for listener in self.listeners.iter_mut() {
            listener(event);
        }
        event.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Cause, Event, EventKind};
    use crate::types::{BlockPos, EntityId, EntitySpec};

    #[test]
    fn test_listener_bus_reports_cancellation() {
        let mut bus = ListenerBus::new().with_listener(|event| {
            if event.kind() == EventKind::SpawnEntity {
                event.set_cancelled(true);
            }
        });

        let mut spawn = Event::spawn_entity(Cause::of_phase("test"), vec![]);
        assert!(bus.post(&mut spawn));

        let mut change = Event::change_block(Cause::of_phase("test"), vec![]);
        assert!(!bus.post(&mut change));
        assert_eq!(bus.posted(), 2);
    }

    #[test]
    fn test_listener_bus_runs_listeners_in_order() {
        let mut bus = ListenerBus::new()
            .with_listener(|event| event.set_cancelled(true))
            .with_listener(|event| event.set_cancelled(false));
        assert_eq!(bus.listener_count(), 2);

        let entity = EntitySpec::new(EntityId::from_seed(1), "zombie", BlockPos::new(0, 0, 0));
        let mut event = Event::spawn_entity(Cause::of_phase("test"), vec![entity]);
        assert!(!bus.post(&mut event));
    }
}
