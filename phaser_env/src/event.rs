//! Synthesized events and their causal attribution.
//!
//! Events are opaque value objects from the tracker's point of view: a scope
//! builds one from its drained capture buffers, posts it, and then inspects
//! the cancelled flag (and per-record validity) to decide what to commit.

use crate::types::{BlockPos, BlockState, ChangeFlags, EntityId, EntitySpec, ItemDrop, UserId};
use serde::Serialize;

/// The object a scope was opened for.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Source {
    Block(BlockPos),
    Entity(EntityId),
    User(UserId),
    Plugin(String),
    /// The scope currently being unwound
    Phase(&'static str),
    /// Replay of a mutation submitted from a foreign thread
    Deferred,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Block(pos) => write!(f, "block {}", pos),
            Source::Entity(id) => write!(f, "{}", id),
            Source::User(id) => write!(f, "{}", id),
            Source::Plugin(name) => write!(f, "plugin {}", name),
            Source::Phase(name) => write!(f, "phase {}", name),
            Source::Deferred => write!(f, "deferred"),
        }
    }
}

/// How an entity came to be spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SpawnType {
    Passive,
    Placement,
    Dropped,
    Explosion,
    Plugin,
    /// Spawns that could not be attributed at the proper time
    Forced,
}

/// Why a mutation happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cause {
    /// Name of the scope that produced the event
    pub phase: &'static str,

    /// Originating object of the scope
    pub source: Option<Source>,

    /// User responsible for the change
    pub owner: Option<UserId>,

    /// User that triggered the notification chain
    pub notifier: Option<UserId>,

    /// Spawn classification for spawn events
    pub spawn_type: SpawnType,
}

impl Cause {
    /// A cause with no attribution beyond the phase name.
    pub fn of_phase(phase: &'static str) -> Self {
        Self {
            phase,
            source: None,
            owner: None,
            notifier: None,
            spawn_type: SpawnType::Passive,
        }
    }

    /// Returns the owner, falling back to the source when it is a user.
    pub fn effective_owner(&self) -> Option<UserId> {
        self.owner.or(match &self.source {
            Some(Source::User(user)) => Some(*user),
            _ => None,
        })
    }
}

/// A single block change, as buffered and as presented to listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockTransaction {
    pub pos: BlockPos,

    /// Snapshot of the state before the change
    pub original: BlockState,

    /// Proposed new state
    pub replacement: BlockState,

    pub flags: ChangeFlags,

    /// Listeners may invalidate individual transactions without cancelling the event
    pub valid: bool,
}

impl BlockTransaction {
    pub fn new(pos: BlockPos, original: BlockState, replacement: BlockState, flags: ChangeFlags) -> Self {
        Self {
            pos,
            original,
            replacement,
            flags,
            valid: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChangeBlockEvent {
    pub cause: Cause,
    pub transactions: Vec<BlockTransaction>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpawnEntityEvent {
    pub cause: Cause,
    /// Listeners may filter this list; only the remaining entities are spawned
    pub entities: Vec<EntitySpec>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DropItemEvent {
    pub cause: Cause,
    /// Entity the drops belong to, for per-entity drop events
    pub entity: Option<EntityId>,
    pub drops: Vec<ItemDrop>,
    pub cancelled: bool,
}

/// An event synthesized by a scope from its drained buffers.
#[derive(Debug, Clone, Serialize)]
pub enum Event {
    ChangeBlock(ChangeBlockEvent),
    SpawnEntity(SpawnEntityEvent),
    DropItems(DropItemEvent),
}

impl Event {
    pub fn change_block(cause: Cause, transactions: Vec<BlockTransaction>) -> Self {
        Event::ChangeBlock(ChangeBlockEvent {
            cause,
            transactions,
            cancelled: false,
        })
    }

    pub fn spawn_entity(cause: Cause, entities: Vec<EntitySpec>) -> Self {
        Event::SpawnEntity(SpawnEntityEvent {
            cause,
            entities,
            cancelled: false,
        })
    }

    pub fn drop_items(cause: Cause, entity: Option<EntityId>, drops: Vec<ItemDrop>) -> Self {
        Event::DropItems(DropItemEvent {
            cause,
            entity,
            drops,
            cancelled: false,
        })
    }

    pub fn cause(&self) -> &Cause {
        match self {
            Event::ChangeBlock(e) => &e.cause,
            Event::SpawnEntity(e) => &e.cause,
            Event::DropItems(e) => &e.cause,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            Event::ChangeBlock(e) => e.cancelled,
            Event::SpawnEntity(e) => e.cancelled,
            Event::DropItems(e) => e.cancelled,
        }
    }

    pub fn set_cancelled(&mut self, cancelled: bool) {
        match self {
            Event::ChangeBlock(e) => e.cancelled = cancelled,
            Event::SpawnEntity(e) => e.cancelled = cancelled,
            Event::DropItems(e) => e.cancelled = cancelled,
        }
    }

    /// Short label for logging and filtering.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ChangeBlock(_) => EventKind::ChangeBlock,
            Event::SpawnEntity(_) => EventKind::SpawnEntity,
            Event::DropItems(_) => EventKind::DropItems,
        }
    }

    /// Number of records carried by the event.
    pub fn len(&self) -> usize {
        match self {
            Event::ChangeBlock(e) => e.transactions.len(),
            Event::SpawnEntity(e) => e.entities.len(),
            Event::DropItems(e) => e.drops.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Discriminant of [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    ChangeBlock,
    SpawnEntity,
    DropItems,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventKind::ChangeBlock => "change_block",
            EventKind::SpawnEntity => "spawn_entity",
            EventKind::DropItems => "drop_items",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_owner_falls_back_to_user_source() {
        let user = UserId::from_seed(3);
        let mut cause = Cause::of_phase("interaction");
        assert_eq!(cause.effective_owner(), None);

        cause.source = Some(Source::User(user));
        assert_eq!(cause.effective_owner(), Some(user));

        let owner = UserId::from_seed(4);
        cause.owner = Some(owner);
        assert_eq!(cause.effective_owner(), Some(owner));
    }

    #[test]
    fn test_event_cancellation_flag() {
        let mut event = Event::spawn_entity(Cause::of_phase("plugin"), vec![]);
        assert!(!event.is_cancelled());
        assert!(event.is_empty());
        event.set_cancelled(true);
        assert!(event.is_cancelled());
        assert_eq!(event.kind(), EventKind::SpawnEntity);
    }
}
