//! Value types exchanged between the tracker and its collaborators.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Derives deterministic UUID bytes from a seed (for simulation).
fn seeded_uuid(seed: u64, salt: u64) -> Uuid {
    let mut bytes = [0u8; 16];
    bytes[0..8].copy_from_slice(&seed.to_le_bytes());
    bytes[8..16].copy_from_slice(&seed.wrapping_mul(salt).to_le_bytes());
    Uuid::from_bytes(bytes)
}

/// Identifier of a user that can own or notify a scope.
///
/// Uses UUID v4 for global uniqueness without coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

impl UserId {
    /// Creates a new random UserId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a deterministic UserId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        Self(seeded_uuid(seed, 0x517cc1b727220a95))
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 8 chars for readability
        write!(f, "user:{}", &self.0.to_string()[..8])
    }
}

/// Identifier of a simulated entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    /// Creates a new random EntityId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a deterministic EntityId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        Self(seeded_uuid(seed, 0x9e3779b97f4a7c15))
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "entity:{}", &self.0.to_string()[..8])
    }
}

/// Integer block coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    /// Construct a position from components.
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Returns this position shifted by the given deltas.
    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    /// The six axis-aligned neighbours, in a fixed order (W, E, down, up, N, S).
    pub fn neighbors(self) -> [BlockPos; 6] {
        [
            self.offset(-1, 0, 0),
            self.offset(1, 0, 0),
            self.offset(0, -1, 0),
            self.offset(0, 1, 0),
            self.offset(0, 0, -1),
            self.offset(0, 0, 1),
        ]
    }
}

impl std::fmt::Display for BlockPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Opaque block state identifier. The meaning of each value belongs to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BlockState(pub u32);

impl BlockState {
    /// The empty state.
    pub const AIR: BlockState = BlockState(0);

    /// Returns true for the empty state.
    pub fn is_air(self) -> bool {
        self == Self::AIR
    }
}

/// Flags controlling the side effects of a block change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeFlags {
    /// Notify neighbouring blocks once the change is applied
    pub update_neighbors: bool,
}

impl ChangeFlags {
    /// Apply with every side effect.
    pub const ALL: ChangeFlags = ChangeFlags { update_neighbors: true };

    /// Apply silently (used for restoration).
    pub const NONE: ChangeFlags = ChangeFlags { update_neighbors: false };
}

impl Default for ChangeFlags {
    fn default() -> Self {
        Self::ALL
    }
}

/// An entity about to enter the world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySpec {
    /// Unique entity ID
    pub id: EntityId,

    /// Entity kind (e.g., "item", "zombie", "arrow")
    pub kind: String,

    /// Spawn position
    pub pos: BlockPos,

    /// Forced spawns (players, explicitly forced entities) bypass scope policy
    pub forced: bool,
}

impl EntitySpec {
    /// Creates a new, non-forced entity.
    pub fn new(id: EntityId, kind: &str, pos: BlockPos) -> Self {
        Self {
            id,
            kind: kind.to_string(),
            pos,
            forced: false,
        }
    }

    /// Marks the spawn as forced.
    pub fn forced(mut self) -> Self {
        self.forced = true;
        self
    }
}

/// An item stack emitted into the world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDrop {
    pub item: String,
    pub count: u32,
    pub pos: BlockPos,
}

impl ItemDrop {
    pub fn new(item: &str, count: u32, pos: BlockPos) -> Self {
        Self {
            item: item.to_string(),
            count,
            pos,
        }
    }
}

/// A scheduled block update registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTick {
    pub pos: BlockPos,
    /// Delay in ticks
    pub delay: u32,
}

/// A single replayable world mutation.
///
/// Used for engine reactions (secondary effects) and for mutations
/// deferred from foreign threads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    SetBlock {
        pos: BlockPos,
        state: BlockState,
        flags: ChangeFlags,
    },
    SpawnEntity(EntitySpec),
    DropItem(ItemDrop),
    DropEntityItem { entity: EntityId, drop: ItemDrop },
    ScheduleTick(ScheduledTick),
}

impl Mutation {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Mutation::SetBlock { .. } => "set_block",
            Mutation::SpawnEntity(_) => "spawn_entity",
            Mutation::DropItem(_) => "drop_item",
            Mutation::DropEntityItem { .. } => "drop_entity_item",
            Mutation::ScheduleTick(_) => "schedule_tick",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_ids_are_deterministic() {
        assert_eq!(UserId::from_seed(7), UserId::from_seed(7));
        assert_ne!(UserId::from_seed(7), UserId::from_seed(8));
        assert_ne!(EntityId::from_seed(7).0, UserId::from_seed(7).0);
    }

    #[test]
    fn test_block_pos_neighbors() {
        let pos = BlockPos::new(0, 64, 0);
        let neighbors = pos.neighbors();
        assert_eq!(neighbors.len(), 6);
        assert!(neighbors.contains(&BlockPos::new(0, 65, 0)));
        assert!(!neighbors.contains(&pos));
    }
}
