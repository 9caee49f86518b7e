//! Phaser Deterministic Scenario Harness
//!
//! Drives a [`phaser_core::PhaseTracker`] against an in-memory world and a
//! recording event bus, so scope discipline can be checked from a seed.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                   ScenarioRunner                      │
//! │   seed ──► ChaCha8Rng ──► scopes + mutations          │
//! │                    │                                  │
//! │              ┌─────▼──────┐                           │
//! │              │PhaseTracker│◄──── tokio workers        │
//! │              └──┬──────┬──┘      (AsyncMutations)     │
//! │                 │      │                              │
//! │          ┌──────▼─┐  ┌─▼───────────┐                  │
//! │          │SimWorld│  │RecordingBus │                  │
//! │          └────────┘  └─────────────┘                  │
//! │                 │      │                              │
//! │              ┌──▼──────▼──┐                           │
//! │              │ SimExport  │  frames per tick (JSON)   │
//! │              └────────────┘                           │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use phaser_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let runner = ScenarioRunner::new(42).with_ticks(50);
//! let result = runner.run(ScenarioId::EffectChain);
//! assert!(result.passed);
//! ```

mod bus;
mod exporter;
mod runner;
pub mod scenarios;
mod world;

pub use bus::{CancelPolicy, RecordingBus};
pub use exporter::{EventRecord, SimExport, SimFrame, WriteRecord};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use world::{Reaction, SimWorld, WorldState};

use thiserror::Error;

/// Errors surfaced by the simulator CLI.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),

    #[error("--export only supports a single scenario")]
    ExportNeedsOneScenario,

    #[error("Config error: {0}")]
    Config(#[from] phaser_core::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
