//! Typed mutation buffers owned by a [`crate::PhaseContext`].
//!
//! Each capture category has exactly one buffer type. Buffers are enabled
//! when a context opts into the category and keep records in insertion
//! order, which is also the order they are committed in.

use phaser_env::{BlockPos, BlockTransaction, EntityId, EntitySpec, ItemDrop, ScheduledTick};
use serde::Serialize;
use std::fmt;

/// Mutation categories a scope can buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum CaptureCategory {
    Blocks,
    BlockDrops,
    BlockEntitySpawns,
    Entities,
    ItemDrops,
    EntityDrops,
    ScheduledTicks,
}

impl CaptureCategory {
    /// Every category, in unwind order.
    pub const ALL: [CaptureCategory; 7] = [
        CaptureCategory::Blocks,
        CaptureCategory::BlockDrops,
        CaptureCategory::BlockEntitySpawns,
        CaptureCategory::Entities,
        CaptureCategory::ItemDrops,
        CaptureCategory::EntityDrops,
        CaptureCategory::ScheduledTicks,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CaptureCategory::Blocks => "block changes",
            CaptureCategory::BlockDrops => "block drops",
            CaptureCategory::BlockEntitySpawns => "block entity spawns",
            CaptureCategory::Entities => "entity spawns",
            CaptureCategory::ItemDrops => "item drops",
            CaptureCategory::EntityDrops => "entity drops",
            CaptureCategory::ScheduledTicks => "scheduled ticks",
        }
    }
}

impl fmt::Display for CaptureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// An item drop attributed to the block being processed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockDrop {
    pub block: BlockPos,
    pub drop: ItemDrop,
}

/// An entity spawn attributed to the block being processed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockSpawn {
    pub block: BlockPos,
    pub entity: EntitySpec,
}

/// An item drop attributed to an entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityDrop {
    pub entity: EntityId,
    pub drop: ItemDrop,
}

/// Insertion-ordered buffer of captured records.
///
/// A disabled buffer keeps its allocation so a pooled context can reuse it.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureBuffer<T> {
    records: Vec<T>,
    enabled: bool,
}

impl<T> Default for CaptureBuffer<T> {
    fn default() -> Self {
        Self { records: Vec::new(), enabled: false }
    }
}

impl<T> CaptureBuffer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record.
    pub fn push(&mut self, record: T) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Allocated record slots, including ones left over from a previous scope.
    pub fn capacity(&self) -> usize {
        self.records.capacity()
    }

    /// Read-only view in insertion order.
    pub fn records(&self) -> &[T] {
        &self.records
    }

    /// Removes and returns every record in insertion order.
    pub fn drain(&mut self) -> Vec<T> {
        self.records.drain(..).collect()
    }

    /// Removes and returns the records matching `pred`, keeping order.
    pub fn drain_where<F>(&mut self, mut pred: F) -> Vec<T>
    where
        F: FnMut(&T) -> bool,
    {
        let (taken, kept): (Vec<T>, Vec<T>) = self.records.drain(..).partition(|r| pred(r));
        self.records.extend(kept);
        taken
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    fn enabled(&self) -> Option<&Self> {
        self.enabled.then_some(self)
    }

    fn enabled_mut(&mut self) -> Option<&mut Self> {
        if self.enabled {
            Some(self)
        } else {
            None
        }
    }

    fn enable(&mut self) -> bool {
        !std::mem::replace(&mut self.enabled, true)
    }

    fn disable(&mut self) {
        self.records.clear();
        self.enabled = false;
    }
}

/// The fixed set of buffers a context can own.
#[derive(Debug, Default)]
pub struct Captures {
    pub(crate) blocks: CaptureBuffer<BlockTransaction>,
    pub(crate) block_drops: CaptureBuffer<BlockDrop>,
    pub(crate) block_spawns: CaptureBuffer<BlockSpawn>,
    pub(crate) entities: CaptureBuffer<EntitySpec>,
    pub(crate) items: CaptureBuffer<ItemDrop>,
    pub(crate) entity_drops: CaptureBuffer<EntityDrop>,
    pub(crate) ticks: CaptureBuffer<ScheduledTick>,
}

macro_rules! for_each_buffer {
    ($self:ident, $buf:ident => $body:expr) => {{
        [
            $self.blocks.enabled().map(|$buf| ($crate::capture::CaptureCategory::Blocks, $body)),
            $self.block_drops.enabled().map(|$buf| ($crate::capture::CaptureCategory::BlockDrops, $body)),
            $self.block_spawns.enabled().map(|$buf| ($crate::capture::CaptureCategory::BlockEntitySpawns, $body)),
            $self.entities.enabled().map(|$buf| ($crate::capture::CaptureCategory::Entities, $body)),
            $self.items.enabled().map(|$buf| ($crate::capture::CaptureCategory::ItemDrops, $body)),
            $self.entity_drops.enabled().map(|$buf| ($crate::capture::CaptureCategory::EntityDrops, $body)),
            $self.ticks.enabled().map(|$buf| ($crate::capture::CaptureCategory::ScheduledTicks, $body)),
        ]
    }};
}

impl Captures {
    /// Returns true if the category is being captured.
    pub fn is_enabled(&self, category: CaptureCategory) -> bool {
        match category {
            CaptureCategory::Blocks => self.blocks.enabled,
            CaptureCategory::BlockDrops => self.block_drops.enabled,
            CaptureCategory::BlockEntitySpawns => self.block_spawns.enabled,
            CaptureCategory::Entities => self.entities.enabled,
            CaptureCategory::ItemDrops => self.items.enabled,
            CaptureCategory::EntityDrops => self.entity_drops.enabled,
            CaptureCategory::ScheduledTicks => self.ticks.enabled,
        }
    }

    /// Turns on one category. Returns false if it was already on.
    pub(crate) fn enable(&mut self, category: CaptureCategory) -> bool {
        match category {
            CaptureCategory::Blocks => self.blocks.enable(),
            CaptureCategory::BlockDrops => self.block_drops.enable(),
            CaptureCategory::BlockEntitySpawns => self.block_spawns.enable(),
            CaptureCategory::Entities => self.entities.enable(),
            CaptureCategory::ItemDrops => self.items.enable(),
            CaptureCategory::EntityDrops => self.entity_drops.enable(),
            CaptureCategory::ScheduledTicks => self.ticks.enable(),
        }
    }

    /// Empties and turns off every buffer, keeping their allocations.
    pub(crate) fn disable_all(&mut self) {
        self.blocks.disable();
        self.block_drops.disable();
        self.block_spawns.disable();
        self.entities.disable();
        self.items.disable();
        self.entity_drops.disable();
        self.ticks.disable();
    }

    /// Record counts for every enabled buffer, in category order.
    pub fn sizes(&self) -> Vec<(CaptureCategory, usize)> {
        for_each_buffer!(self, buf => buf.len())
            .into_iter()
            .flatten()
            .collect()
    }

    /// Enabled categories, in category order.
    pub fn enabled(&self) -> Vec<CaptureCategory> {
        self.sizes().into_iter().map(|(category, _)| category).collect()
    }

    /// True if any enabled buffer holds a record.
    pub fn has_captures(&self) -> bool {
        self.sizes().iter().any(|(_, len)| *len > 0)
    }

    /// Categories whose buffer is not empty.
    pub fn non_empty(&self) -> Vec<CaptureCategory> {
        self.sizes()
            .into_iter()
            .filter(|(_, len)| *len > 0)
            .map(|(category, _)| category)
            .collect()
    }

    /// Empties every buffer, keeping them enabled.
    pub(crate) fn clear_all(&mut self) {
        self.blocks.clear();
        self.block_drops.clear();
        self.block_spawns.clear();
        self.entities.clear();
        self.items.clear();
        self.entity_drops.clear();
        self.ticks.clear();
    }

    /// One line per non-empty buffer, for reports.
    pub(crate) fn describe(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(b) = self.blocks.enabled().filter(|b| !b.is_empty()) {
            let changes: Vec<String> = b
                .records()
                .iter()
                .map(|t| format!("{} {}->{}", t.pos, t.original.0, t.replacement.0))
                .collect();
            lines.push(format!("CapturedBlocks: [{}]", changes.join(", ")));
        }
        if let Some(b) = self.block_drops.enabled().filter(|b| !b.is_empty()) {
            lines.push(format!("BlockDrops: {} record(s)", b.len()));
        }
        if let Some(b) = self.block_spawns.enabled().filter(|b| !b.is_empty()) {
            lines.push(format!("BlockEntitySpawns: {} record(s)", b.len()));
        }
        if let Some(b) = self.entities.enabled().filter(|b| !b.is_empty()) {
            let kinds: Vec<&str> = b.records().iter().map(|e| e.kind.as_str()).collect();
            lines.push(format!("CapturedEntities: [{}]", kinds.join(", ")));
        }
        if let Some(b) = self.items.enabled().filter(|b| !b.is_empty()) {
            lines.push(format!("CapturedItems: {} record(s)", b.len()));
        }
        if let Some(b) = self.entity_drops.enabled().filter(|b| !b.is_empty()) {
            lines.push(format!("EntityItemDrops: {} record(s)", b.len()));
        }
        if let Some(b) = self.ticks.enabled().filter(|b| !b.is_empty()) {
            lines.push(format!("ScheduledTicks: {} record(s)", b.len()));
        }
        lines
    }
}

/// Maps a marker type to its category and record type.
///
/// ```ignore
/// let blocks = ctx.buffer_mut::<Blocks>()?;
/// blocks.push(transaction);
/// ```
pub trait CaptureKind {
    type Record;
    const CATEGORY: CaptureCategory;

    fn slot(captures: &Captures) -> Option<&CaptureBuffer<Self::Record>>;
    fn slot_mut(captures: &mut Captures) -> Option<&mut CaptureBuffer<Self::Record>>;
}

macro_rules! capture_kind {
    ($(#[$doc:meta])* $marker:ident, $record:ty, $category:ident, $field:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy)]
        pub struct $marker;

        impl CaptureKind for $marker {
            type Record = $record;
            const CATEGORY: CaptureCategory = CaptureCategory::$category;

            fn slot(captures: &Captures) -> Option<&CaptureBuffer<$record>> {
                captures.$field.enabled()
            }

            fn slot_mut(captures: &mut Captures) -> Option<&mut CaptureBuffer<$record>> {
                captures.$field.enabled_mut()
            }
        }
    };
}

capture_kind!(
    /// Structural block changes.
    Blocks, BlockTransaction, Blocks, blocks
);
capture_kind!(
    /// Item drops keyed by the block that produced them.
    BlockDrops, BlockDrop, BlockDrops, block_drops
);
capture_kind!(
    /// Entity spawns keyed by the block that produced them.
    BlockEntitySpawns, BlockSpawn, BlockEntitySpawns, block_spawns
);
capture_kind!(Entities, EntitySpec, Entities, entities);
capture_kind!(ItemDrops, ItemDrop, ItemDrops, items);
capture_kind!(EntityDrops, EntityDrop, EntityDrops, entity_drops);
capture_kind!(ScheduledTicks, ScheduledTick, ScheduledTicks, ticks);

#[cfg(test)]
mod tests {
    use super::*;
    use phaser_env::{BlockState, ChangeFlags};

    #[test]
    fn test_enable_is_single_allocation() {
        let mut captures = Captures::default();
        assert!(captures.enable(CaptureCategory::Blocks));
        assert!(!captures.enable(CaptureCategory::Blocks));
        assert_eq!(captures.enabled(), vec![CaptureCategory::Blocks]);
    }

    #[test]
    fn test_drain_where_keeps_order() {
        let mut buffer = CaptureBuffer::new();
        for i in 0..6 {
            buffer.push(i);
        }
        let even = buffer.drain_where(|i| i % 2 == 0);
        assert_eq!(even, vec![0, 2, 4]);
        assert_eq!(buffer.records(), &[1, 3, 5]);
    }

    #[test]
    fn test_has_captures_tracks_non_empty_buffers() {
        let mut captures = Captures::default();
        captures.enable(CaptureCategory::Blocks);
        captures.enable(CaptureCategory::ScheduledTicks);
        assert!(!captures.has_captures());

        let pos = BlockPos::new(1, 2, 3);
        Blocks::slot_mut(&mut captures).unwrap().push(BlockTransaction::new(
            pos,
            BlockState::AIR,
            BlockState(1),
            ChangeFlags::ALL,
        ));
        assert!(captures.has_captures());
        assert_eq!(captures.non_empty(), vec![CaptureCategory::Blocks]);
        assert_eq!(captures.describe().len(), 1);

        captures.clear_all();
        assert!(!captures.has_captures());
        assert!(captures.is_enabled(CaptureCategory::Blocks));
    }

    #[test]
    fn test_disable_all_keeps_allocation() {
        let mut captures = Captures::default();
        captures.enable(CaptureCategory::Blocks);
        let blocks = Blocks::slot_mut(&mut captures).unwrap();
        for x in 0..8 {
            blocks.push(BlockTransaction::new(
                BlockPos::new(x, 64, 0),
                BlockState::AIR,
                BlockState(1),
                ChangeFlags::ALL,
            ));
        }
        assert_eq!(blocks.drain().len(), 8);
        let capacity = blocks.capacity();
        assert!(capacity >= 8);

        captures.disable_all();
        assert!(!captures.is_enabled(CaptureCategory::Blocks));
        assert!(Blocks::slot_mut(&mut captures).is_none());
        assert!(captures.enabled().is_empty());

        assert!(captures.enable(CaptureCategory::Blocks));
        assert_eq!(captures.blocks.capacity(), capacity);
    }
}
