//! The shared commit routine used by the built-in scopes.
//!
//! Buffers are drained in a fixed category order, each category becomes one
//! synthesized event, and records are committed in insertion order only if
//! listeners did not cancel them.
//!
//! ```text
//! Blocks ──► ChangeBlock event ──► commit valid transactions
//!              │                     └─► drops / spawns keyed to each committed position
//!              └─► drops / spawns at cancelled positions are discarded
//! remaining BlockDrops / BlockEntitySpawns
//! Entities ──► SpawnEntity event (listeners may filter)
//! ItemDrops ──► DropItems event
//! EntityDrops ──► one DropItems event per entity
//! ScheduledTicks ──► registered directly
//! ```

use crate::capture::{
    BlockDrops, BlockEntitySpawns, Blocks, CaptureKind, Entities, EntityDrops, ItemDrops, ScheduledTicks,
};
use crate::context::PhaseContext;
use crate::error::PhaseError;
use crate::tracker::PhaseTracker;
use phaser_env::{BlockTransaction, Cause, EntityId, EntitySpec, Event, ItemDrop};

/// Drains and commits every buffer of `ctx`.
///
/// Returns an error if a listener replaced an event with one of a different
/// kind; the affected records are discarded and the remaining categories are
/// still processed, so the context always ends up drained.
pub fn unwind_captures(ctx: &mut PhaseContext, tracker: &mut PhaseTracker) -> Result<(), PhaseError> {
    let cause = ctx.cause();
    let mut failure = None;

    let mut block_drops = take::<BlockDrops>(ctx);
    let mut block_spawns = take::<BlockEntitySpawns>(ctx);

    let transactions = take::<Blocks>(ctx);
    if !transactions.is_empty() {
        let mut event = Event::change_block(cause.clone(), transactions);
        let cancelled = tracker.post_event(&mut event);
        let transactions = match event {
            Event::ChangeBlock(event) => event.transactions,
            other => {
                failure = Some(kind_changed("change_block", &other));
                Vec::new()
            }
        };
        for transaction in transactions {
            let drops = extract(&mut block_drops, |d| d.block == transaction.pos);
            let spawns = extract(&mut block_spawns, |s| s.block == transaction.pos);
            if cancelled || !transaction.valid {
                continue;
            }
            if commit_transaction(tracker, &transaction) {
                let drops = drops.into_iter().map(|d| d.drop).collect();
                let spawns = spawns.into_iter().map(|s| s.entity).collect();
                record(&mut failure, commit_drops(tracker, &cause, None, drops));
                record(&mut failure, commit_spawns(tracker, &cause, spawns));
            }
        }
    }

    // Drops and spawns whose block never changed.
    let drops = block_drops.into_iter().map(|d| d.drop).collect();
    record(&mut failure, commit_drops(tracker, &cause, None, drops));
    let spawns = block_spawns.into_iter().map(|s| s.entity).collect();
    record(&mut failure, commit_spawns(tracker, &cause, spawns));

    record(&mut failure, commit_spawns(tracker, &cause, take::<Entities>(ctx)));
    record(&mut failure, commit_drops(tracker, &cause, None, take::<ItemDrops>(ctx)));

    for (entity, drops) in group_by_entity(take::<EntityDrops>(ctx)) {
        record(&mut failure, commit_drops(tracker, &cause, Some(entity), drops));
    }

    for tick in take::<ScheduledTicks>(ctx) {
        tracker.commit_tick(tick);
    }

    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn take<K: CaptureKind>(ctx: &mut PhaseContext) -> Vec<K::Record> {
    ctx.buffer_mut::<K>().map(|buffer| buffer.drain()).unwrap_or_default()
}

fn extract<T, F>(records: &mut Vec<T>, pred: F) -> Vec<T>
where
    F: Fn(&T) -> bool,
{
    let (taken, kept): (Vec<T>, Vec<T>) = std::mem::take(records).into_iter().partition(|r| pred(r));
    *records = kept;
    taken
}

fn record(failure: &mut Option<PhaseError>, result: Result<(), PhaseError>) {
    if let Err(err) = result {
        failure.get_or_insert(err);
    }
}

fn kind_changed(expected: &str, event: &Event) -> PhaseError {
    PhaseError::unwind(format!("listener replaced a {} event with {}", expected, event.kind()))
}

fn commit_transaction(tracker: &mut PhaseTracker, transaction: &BlockTransaction) -> bool {
    let committed = tracker.commit_block(transaction);
    if !committed {
        tracing::debug!(pos = %transaction.pos, "Engine refused captured block change");
    }
    committed
}

/// Posts one drop event and emits the drops that survive it.
fn commit_drops(
    tracker: &mut PhaseTracker,
    cause: &Cause,
    entity: Option<EntityId>,
    drops: Vec<ItemDrop>,
) -> Result<(), PhaseError> {
    if drops.is_empty() {
        return Ok(());
    }
    let mut event = Event::drop_items(cause.clone(), entity, drops);
    if tracker.post_event(&mut event) {
        return Ok(());
    }
    match event {
        Event::DropItems(event) => {
            for drop in event.drops {
                tracker.commit_drop(drop);
            }
            Ok(())
        }
        other => Err(kind_changed("drop_items", &other)),
    }
}

/// Posts one spawn event and adds the entities listeners kept.
fn commit_spawns(tracker: &mut PhaseTracker, cause: &Cause, entities: Vec<EntitySpec>) -> Result<(), PhaseError> {
    if entities.is_empty() {
        return Ok(());
    }
    let mut event = Event::spawn_entity(cause.clone(), entities);
    if tracker.post_event(&mut event) {
        return Ok(());
    }
    match event {
        Event::SpawnEntity(event) => {
            for entity in event.entities {
                tracker.commit_entity(entity);
            }
            Ok(())
        }
        other => Err(kind_changed("spawn_entity", &other)),
    }
}

/// Groups per-entity drops, keeping first-appearance order.
fn group_by_entity(drops: Vec<crate::capture::EntityDrop>) -> Vec<(EntityId, Vec<ItemDrop>)> {
    let mut groups: Vec<(EntityId, Vec<ItemDrop>)> = Vec::new();
    for entry in drops {
        match groups.iter_mut().find(|(id, _)| *id == entry.entity) {
            Some((_, items)) => items.push(entry.drop),
            None => groups.push((entry.entity, vec![entry.drop])),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::EntityDrop;
    use phaser_env::BlockPos;

    #[test]
    fn test_group_by_entity_keeps_order() {
        let a = EntityId::from_seed(1);
        let b = EntityId::from_seed(2);
        let pos = BlockPos::new(0, 0, 0);
        let drops = vec![
            EntityDrop { entity: b, drop: ItemDrop::new("bone", 1, pos) },
            EntityDrop { entity: a, drop: ItemDrop::new("string", 2, pos) },
            EntityDrop { entity: b, drop: ItemDrop::new("arrow", 3, pos) },
        ];
        let groups = group_by_entity(drops);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, b);
        assert_eq!(groups[0].1.iter().map(|d| d.item.as_str()).collect::<Vec<_>>(), vec!["bone", "arrow"]);
        assert_eq!(groups[1].0, a);
    }

    #[test]
    fn test_extract_partitions_in_place() {
        let mut records = vec![1, 2, 3, 4, 5];
        let taken = extract(&mut records, |r| *r > 3);
        assert_eq!(taken, vec![4, 5]);
        assert_eq!(records, vec![1, 2, 3]);
    }
}
