//! Phaser Environment Boundary
//!
//! This crate defines everything the phase tracker talks to but does not own:
//! the **simulation engine** that stores world state, the **event bus** that
//! dispatches synthesized events to listeners, and the value types and
//! causes exchanged between them.
//!
//! # Core Concept: Explicit Interception
//!
//! Simulation code never mutates the world directly. Every write, spawn and
//! drop is an explicit call into the tracker, which decides whether to apply
//! it now or buffer it for the current scope:
//!
//! ```text
//!  simulation code ──► PhaseTracker ──► SimulationEngine  (apply)
//!                           │
//!                           └──► EventBus  (post synthesized events)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use phaser_env::{ListenerBus, Event, EventKind};
//!
//! let bus = ListenerBus::new().with_listener(|event: &mut Event| {
//!     if event.kind() == EventKind::SpawnEntity {
//!         event.set_cancelled(true);
//!     }
//! });
//! ```

mod bus;
mod engine;
mod event;
mod types;

pub use bus::{EventBus, Listener, ListenerBus};
pub use engine::SimulationEngine;
pub use event::{
    BlockTransaction, Cause, ChangeBlockEvent, DropItemEvent, Event, EventKind, Source,
    SpawnEntityEvent, SpawnType,
};
pub use types::{
    BlockPos, BlockState, ChangeFlags, EntityId, EntitySpec, ItemDrop, Mutation, ScheduledTick,
    UserId,
};
