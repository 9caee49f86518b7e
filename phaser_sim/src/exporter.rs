//! JSON exporter for scenario traces.
//!
//! Exports per-tick frames (posted events, engine writes, reports) so a run
//! can be inspected or diffed against another seed.

use phaser_core::{Report, TrackerStats};
use phaser_env::{BlockPos, BlockState, Event};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use uuid::Uuid;

/// Summary of one posted event.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub kind: String,
    pub phase: String,
    pub records: usize,
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notifier: Option<String>,
}

impl EventRecord {
    pub fn from_event(event: &Event) -> Self {
        let cause = event.cause();
        Self {
            kind: event.kind().to_string(),
            phase: cause.phase.to_string(),
            records: event.len(),
            cancelled: event.is_cancelled(),
            source: cause.source.as_ref().map(ToString::to_string),
            notifier: cause.notifier.map(|n| n.to_string()),
        }
    }
}

/// One engine write.
#[derive(Debug, Clone, Serialize)]
pub struct WriteRecord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub state: u32,
}

impl WriteRecord {
    pub fn new(pos: BlockPos, state: BlockState) -> Self {
        Self {
            x: pos.x,
            y: pos.y,
            z: pos.z,
            state: state.0,
        }
    }
}

/// A single tick of scenario data.
#[derive(Debug, Clone, Serialize)]
pub struct SimFrame {
    pub tick: u64,

    /// Stack depth at the end of the tick
    pub depth: usize,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<EventRecord>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub writes: Vec<WriteRecord>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reports: Vec<Report>,
}

/// Complete scenario export.
#[derive(Debug, Clone, Serialize)]
pub struct SimExport {
    /// Run identifier, derived from the seed
    pub run_id: Uuid,

    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<TrackerStats>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            run_id: Uuid::from_u64_pair(seed, scenario.len() as u64),
            scenario: scenario.to_string(),
            seed,
            frames: Vec::new(),
            passed: false,
            failure_reason: None,
            stats: None,
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>, stats: TrackerStats) {
        self.passed = passed;
        self.failure_reason = failure_reason;
        self.stats = Some(stats);
    }

    /// Total events across all frames.
    pub fn event_count(&self) -> usize {
        self.frames.iter().map(|f| f.events.len()).sum()
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phaser_env::Cause;

    #[test]
    fn test_export_serializes_frames() {
        let mut export = SimExport::new("bulk_capture", 42);
        let event = Event::spawn_entity(Cause::of_phase("entity_tick"), vec![]);
        export.add_frame(SimFrame {
            tick: 0,
            depth: 0,
            events: vec![EventRecord::from_event(&event)],
            writes: vec![WriteRecord::new(BlockPos::new(1, 2, 3), BlockState(4))],
            reports: vec![],
        });
        export.finalize(true, None, TrackerStats::default());

        let json = serde_json::to_value(&export).unwrap();
        assert_eq!(json["seed"], 42);
        assert_eq!(json["frames"][0]["events"][0]["phase"], "entity_tick");
        assert_eq!(json["frames"][0]["writes"][0]["state"], 4);
        assert!(json["frames"][0].get("reports").is_none());
        assert_eq!(export.event_count(), 1);
    }
}
