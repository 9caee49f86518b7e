//! Tracker scenarios for deterministic simulation testing.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioId {
    /// PST-001: Three captured changes commit as one event, in order
    BulkCapture,

    /// PST-002: A cancelled capture leaves the world untouched
    CancelledCapture,

    /// PST-003: Spawns inside a restoration scope are denied
    DeniedSpawn,

    /// PST-004: A forgotten scope is force-completed and reported once
    MismatchedCompletion,

    /// PST-005: Effects of effects are attributed to nested scopes
    EffectChain,

    /// PST-006: A self-sustaining reaction loop is cut at the depth limit
    RunawayChain,

    /// PST-007: Per-event tracking reverts a cancelled change silently
    PerEventRevert,

    /// PST-008: Spawns submitted by async workers replay on the owning thread
    AsyncSpawns,

    /// PST-009: Seeded random mutations keep the stack balanced and buffers drained
    RandomMutations,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::BulkCapture,
            ScenarioId::CancelledCapture,
            ScenarioId::DeniedSpawn,
            ScenarioId::MismatchedCompletion,
            ScenarioId::EffectChain,
            ScenarioId::RunawayChain,
            ScenarioId::PerEventRevert,
            ScenarioId::AsyncSpawns,
            ScenarioId::RandomMutations,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::BulkCapture => "bulk_capture",
            ScenarioId::CancelledCapture => "cancelled_capture",
            ScenarioId::DeniedSpawn => "denied_spawn",
            ScenarioId::MismatchedCompletion => "mismatched_completion",
            ScenarioId::EffectChain => "effect_chain",
            ScenarioId::RunawayChain => "runaway_chain",
            ScenarioId::PerEventRevert => "per_event_revert",
            ScenarioId::AsyncSpawns => "async_spawns",
            ScenarioId::RandomMutations => "random_mutations",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::BulkCapture => "Capture 3 block changes, expect 1 event and 3 ordered writes",
            ScenarioId::CancelledCapture => "Cancel the change event, expect no writes and no drops",
            ScenarioId::DeniedSpawn => "Spawn during restoration, expect denial and an untouched world",
            ScenarioId::MismatchedCompletion => "Leave an inner scope open, expect 1 report and a balanced stack",
            ScenarioId::EffectChain => "Neighbour reactions nest scopes and inherit the notifier",
            ScenarioId::RunawayChain => "Two states flip each other forever, expect the depth limit to cut it",
            ScenarioId::PerEventRevert => "Cancel a speculative change, expect the original state restored",
            ScenarioId::AsyncSpawns => "Tokio workers submit spawns, expect replay on tick",
            ScenarioId::RandomMutations => "Random nested scopes and mutations from the seed",
        }
    }

    /// Returns true if the scenario is expected to file reports.
    pub fn expects_reports(&self) -> bool {
        matches!(
            self,
            ScenarioId::MismatchedCompletion | ScenarioId::RunawayChain | ScenarioId::AsyncSpawns
        )
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bulk_capture" | "bulkcapture" | "pst-001" => Ok(ScenarioId::BulkCapture),
            "cancelled_capture" | "cancelledcapture" | "pst-002" => Ok(ScenarioId::CancelledCapture),
            "denied_spawn" | "deniedspawn" | "pst-003" => Ok(ScenarioId::DeniedSpawn),
            "mismatched_completion" | "mismatchedcompletion" | "pst-004" => Ok(ScenarioId::MismatchedCompletion),
            "effect_chain" | "effectchain" | "pst-005" => Ok(ScenarioId::EffectChain),
            "runaway_chain" | "runawaychain" | "pst-006" => Ok(ScenarioId::RunawayChain),
            "per_event_revert" | "pereventrevert" | "pst-007" => Ok(ScenarioId::PerEventRevert),
            "async_spawns" | "asyncspawns" | "pst-008" => Ok(ScenarioId::AsyncSpawns),
            "random_mutations" | "randommutations" | "pst-009" => Ok(ScenarioId::RandomMutations),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
        }
        assert_eq!("PST-006".parse::<ScenarioId>(), Ok(ScenarioId::RunawayChain));
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }
}
