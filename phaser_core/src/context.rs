//! Per-activation scope state.

use crate::capture::{CaptureBuffer, CaptureCategory, CaptureKind, Captures};
use crate::diagnostics::ReportBuilder;
use crate::error::PhaseError;
use crate::state::{PhaseId, PhaseRef};
use crate::tracker::{PhaseGuard, PhaseTracker};
use phaser_env::{BlockPos, Cause, Source, UserId};

/// Mutable state of one scope activation: causal attribution, typed capture
/// buffers and completion bookkeeping.
///
/// # Lifecycle
///
/// ```text
/// create (fresh or pooled) -> populate -> build_and_switch -> body -> close -> unwind -> release
/// ```
///
/// Attribution and capture setup are only possible before the switch. Once
/// switched, the context is owned by the stack and only its buffers change.
#[derive(Debug)]
pub struct PhaseContext {
    state: PhaseRef,
    source: Option<Source>,
    owner: Option<UserId>,
    notifier: Option<UserId>,
    captures: Captures,
    capture_pos: Option<BlockPos>,
    switched: bool,
    is_empty: bool,
    allows_bulk_block_captures: bool,
    allows_block_events: bool,
    allows_bulk_entity_captures: bool,
    allows_entity_events: bool,
    entry_trace: Option<String>,
}

impl PhaseContext {
    /// Creates a fresh context for `state`.
    pub fn new(state: PhaseRef) -> Self {
        Self {
            state,
            source: None,
            owner: None,
            notifier: None,
            captures: Captures::default(),
            capture_pos: None,
            switched: false,
            is_empty: false,
            allows_bulk_block_captures: true,
            allows_block_events: true,
            allows_bulk_entity_captures: true,
            allows_entity_events: true,
            entry_trace: None,
        }
    }

    /// The sentinel context: already switched, captures nothing.
    pub(crate) fn empty(state: PhaseRef) -> Self {
        Self {
            switched: true,
            is_empty: true,
            ..Self::new(state)
        }
    }

    pub fn state(&self) -> &PhaseRef {
        &self.state
    }

    pub fn phase(&self) -> PhaseId {
        self.state.id()
    }

    /// True for the stack sentinel.
    pub fn is_empty(&self) -> bool {
        self.is_empty
    }

    pub fn is_switched(&self) -> bool {
        self.switched
    }

    fn ensure_not_switched(&self) -> Result<(), PhaseError> {
        if self.switched {
            return Err(PhaseError::AlreadySwitched);
        }
        Ok(())
    }

    // =========================================================================
    // ATTRIBUTION
    // =========================================================================

    pub fn source(&self) -> Option<&Source> {
        self.source.as_ref()
    }

    pub fn owner(&self) -> Option<UserId> {
        self.owner
    }

    pub fn notifier(&self) -> Option<UserId> {
        self.notifier
    }

    pub fn set_source(&mut self, source: Source) -> Result<&mut Self, PhaseError> {
        self.ensure_not_switched()?;
        self.source = Some(source);
        Ok(self)
    }

    /// Assigns the owner. A second assignment must carry the same user.
    pub fn set_owner(&mut self, user: UserId) -> Result<&mut Self, PhaseError> {
        self.ensure_not_switched()?;
        assign_once(&mut self.owner, user, "owner")?;
        Ok(self)
    }

    /// Assigns the notifier. A second assignment must carry the same user.
    pub fn set_notifier(&mut self, user: UserId) -> Result<&mut Self, PhaseError> {
        self.ensure_not_switched()?;
        assign_once(&mut self.notifier, user, "notifier")?;
        Ok(self)
    }

    /// Assigns the owner only if `supplier` yields one.
    pub fn owner_from<F>(&mut self, supplier: F) -> Result<&mut Self, PhaseError>
    where
        F: FnOnce() -> Option<UserId>,
    {
        match supplier() {
            Some(user) => self.set_owner(user),
            None => Ok(self),
        }
    }

    /// Assigns the notifier only if `supplier` yields one.
    pub fn notifier_from<F>(&mut self, supplier: F) -> Result<&mut Self, PhaseError>
    where
        F: FnOnce() -> Option<UserId>,
    {
        match supplier() {
            Some(user) => self.set_notifier(user),
            None => Ok(self),
        }
    }

    /// The cause attached to events this scope synthesizes.
    pub fn cause(&self) -> Cause {
        Cause {
            phase: self.state.id().name(),
            source: self.source.clone(),
            owner: self.owner,
            notifier: self.notifier,
            spawn_type: self.state.spawn_type(),
        }
    }

    // =========================================================================
    // CAPTURE SETUP
    // =========================================================================

    /// Turns on the buffer for one category.
    pub fn enable_capture(&mut self, category: CaptureCategory) -> Result<&mut Self, PhaseError> {
        self.ensure_not_switched()?;
        if !self.captures.enable(category) {
            return Err(PhaseError::CaptureAlreadyEnabled(category));
        }
        Ok(self)
    }

    fn enable_all(&mut self, categories: &[CaptureCategory]) -> Result<&mut Self, PhaseError> {
        for category in categories {
            self.enable_capture(*category)?;
        }
        Ok(self)
    }

    /// Block changes, block drops and block-entity spawns.
    pub fn add_block_captures(&mut self) -> Result<&mut Self, PhaseError> {
        self.enable_all(&[
            CaptureCategory::Blocks,
            CaptureCategory::BlockDrops,
            CaptureCategory::BlockEntitySpawns,
        ])
    }

    /// Entity spawns and item drops.
    pub fn add_entity_captures(&mut self) -> Result<&mut Self, PhaseError> {
        self.enable_all(&[CaptureCategory::Entities, CaptureCategory::ItemDrops])
    }

    pub fn add_entity_drop_captures(&mut self) -> Result<&mut Self, PhaseError> {
        self.enable_capture(CaptureCategory::EntityDrops)
    }

    /// Every block and entity category.
    pub fn add_captures(&mut self) -> Result<&mut Self, PhaseError> {
        self.add_block_captures()?;
        self.add_entity_captures()?;
        self.add_entity_drop_captures()
    }

    pub fn allow_bulk_block_captures(&mut self, allow: bool) -> Result<&mut Self, PhaseError> {
        self.ensure_not_switched()?;
        self.allows_bulk_block_captures = allow;
        Ok(self)
    }

    pub fn allow_block_events(&mut self, allow: bool) -> Result<&mut Self, PhaseError> {
        self.ensure_not_switched()?;
        self.allows_block_events = allow;
        Ok(self)
    }

    pub fn allow_bulk_entity_captures(&mut self, allow: bool) -> Result<&mut Self, PhaseError> {
        self.ensure_not_switched()?;
        self.allows_bulk_entity_captures = allow;
        Ok(self)
    }

    pub fn allow_entity_events(&mut self, allow: bool) -> Result<&mut Self, PhaseError> {
        self.ensure_not_switched()?;
        self.allows_entity_events = allow;
        Ok(self)
    }

    pub fn allows_bulk_block_captures(&self) -> bool {
        self.allows_bulk_block_captures
    }

    pub fn allows_block_events(&self) -> bool {
        self.allows_block_events
    }

    pub fn allows_bulk_entity_captures(&self) -> bool {
        self.allows_bulk_entity_captures
    }

    pub fn allows_entity_events(&self) -> bool {
        self.allows_entity_events
    }

    // =========================================================================
    // BUFFERS
    // =========================================================================

    pub fn is_capturing(&self, category: CaptureCategory) -> bool {
        self.captures.is_enabled(category)
    }

    pub fn captures(&self) -> &Captures {
        &self.captures
    }

    /// Typed read access to one buffer.
    ///
    /// Fails with [`PhaseError::CaptureNotEnabled`] if the category was never
    /// enabled, which is distinct from an enabled but empty buffer.
    pub fn buffer<K: CaptureKind>(&self) -> Result<&CaptureBuffer<K::Record>, PhaseError> {
        K::slot(&self.captures).ok_or(PhaseError::CaptureNotEnabled(K::CATEGORY))
    }

    pub fn buffer_mut<K: CaptureKind>(&mut self) -> Result<&mut CaptureBuffer<K::Record>, PhaseError> {
        K::slot_mut(&mut self.captures).ok_or(PhaseError::CaptureNotEnabled(K::CATEGORY))
    }

    /// True if any enabled buffer holds a record.
    pub fn has_captures(&self) -> bool {
        self.captures.has_captures()
    }

    /// Checked after unwind: anything left over is a bug in the unwind hook.
    pub fn not_all_captures_processed(&self) -> bool {
        self.captures.has_captures()
    }

    /// Block currently being processed, used to key drops and spawns.
    pub fn capture_position(&self) -> Option<BlockPos> {
        self.capture_pos
    }

    pub(crate) fn set_capture_position(&mut self, pos: Option<BlockPos>) -> Option<BlockPos> {
        std::mem::replace(&mut self.capture_pos, pos)
    }

    pub fn entry_trace(&self) -> Option<&str> {
        self.entry_trace.as_deref()
    }

    pub(crate) fn set_entry_trace(&mut self, trace: String) {
        self.entry_trace = Some(trace);
    }

    pub(crate) fn mark_switched(&mut self) {
        self.switched = true;
    }

    pub(crate) fn discard_captures(&mut self) {
        self.captures.clear_all();
    }

    /// Returns a recycled context to a pristine state for `state`.
    ///
    /// Capture buffers are turned off but keep their allocations.
    pub(crate) fn reset(&mut self, state: PhaseRef) {
        self.state = state;
        self.source = None;
        self.owner = None;
        self.notifier = None;
        self.captures.disable_all();
        self.capture_pos = None;
        self.switched = false;
        self.is_empty = false;
        self.allows_bulk_block_captures = true;
        self.allows_block_events = true;
        self.allows_bulk_entity_captures = true;
        self.allows_entity_events = true;
        self.entry_trace = None;
    }

    /// Marks the context as switched and pushes it onto `tracker`'s stack.
    ///
    /// The returned guard completes the scope when dropped.
    pub fn build_and_switch(mut self, tracker: &mut PhaseTracker) -> Result<PhaseGuard<'_>, PhaseError> {
        self.ensure_not_switched()?;
        self.switched = true;
        let phase = self.phase();
        tracker.switch_to_phase(self)?;
        Ok(PhaseGuard::new(tracker, phase))
    }

    /// Renders attribution and buffered records for a report.
    pub fn print_custom(&self, report: &mut ReportBuilder, indent: usize) {
        let pad = " ".repeat(indent);
        if self.is_empty {
            report.add(format!("{}(empty context)", pad));
            return;
        }
        if let Some(source) = &self.source {
            report.add(format!("{}Source: {}", pad, source));
        }
        if let Some(owner) = self.owner {
            report.add(format!("{}Owner: {}", pad, owner));
        }
        if let Some(notifier) = self.notifier {
            report.add(format!("{}Notifier: {}", pad, notifier));
        }
        if let Some(pos) = self.capture_pos {
            report.add(format!("{}CapturePosition: {}", pad, pos));
        }
        for line in self.captures.describe() {
            report.add(format!("{}{}", pad, line));
        }
        if let Some(trace) = &self.entry_trace {
            report.add(format!("{}Entered at:", pad));
            for line in trace.lines().take(12) {
                report.add(format!("{}  {}", pad, line.trim()));
            }
        }
    }
}

fn assign_once(slot: &mut Option<UserId>, user: UserId, field: &'static str) -> Result<(), PhaseError> {
    match slot {
        Some(existing) if *existing != user => Err(PhaseError::AttributionAlreadySet { field }),
        _ => {
            *slot = Some(user);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Blocks, Entities};
    use crate::diagnostics::ReportKind;
    use crate::BuiltinPhase;
    use phaser_env::{BlockState, BlockTransaction, ChangeFlags};

    fn ctx() -> PhaseContext {
        PhaseContext::new(BuiltinPhase::BlockTick.into_ref())
    }

    #[test]
    fn test_enable_capture_twice_fails() {
        let mut ctx = ctx();
        ctx.enable_capture(CaptureCategory::Blocks).unwrap();
        let err = ctx.enable_capture(CaptureCategory::Blocks).unwrap_err();
        assert_eq!(err, PhaseError::CaptureAlreadyEnabled(CaptureCategory::Blocks));
    }

    #[test]
    fn test_batch_enablers_overlap_fails() {
        let mut ctx = ctx();
        ctx.add_block_captures().unwrap();
        assert!(ctx.is_capturing(CaptureCategory::BlockDrops));
        assert!(ctx.is_capturing(CaptureCategory::BlockEntitySpawns));
        assert!(ctx.add_captures().is_err());
    }

    #[test]
    fn test_owner_single_assignment() {
        let mut ctx = ctx();
        let a = UserId::from_seed(1);
        let b = UserId::from_seed(2);
        ctx.set_owner(a).unwrap();
        // Same value again is the idempotent convenience form.
        ctx.set_owner(a).unwrap();
        assert_eq!(
            ctx.set_owner(b).unwrap_err(),
            PhaseError::AttributionAlreadySet { field: "owner" }
        );
        assert_eq!(ctx.owner(), Some(a));
    }

    #[test]
    fn test_lazy_attribution_only_assigns_present_values() {
        let mut ctx = ctx();
        ctx.notifier_from(|| None).unwrap();
        assert_eq!(ctx.notifier(), None);

        let user = UserId::from_seed(9);
        ctx.notifier_from(|| Some(user)).unwrap();
        ctx.owner_from(|| None).unwrap();
        assert_eq!(ctx.notifier(), Some(user));
        assert_eq!(ctx.owner(), None);
    }

    #[test]
    fn test_buffer_without_enable_fails() {
        let mut ctx = ctx();
        assert_eq!(
            ctx.buffer::<Entities>().unwrap_err(),
            PhaseError::CaptureNotEnabled(CaptureCategory::Entities)
        );
        ctx.add_block_captures().unwrap();
        let pos = BlockPos::new(0, 0, 0);
        ctx.buffer_mut::<Blocks>()
            .unwrap()
            .push(BlockTransaction::new(pos, BlockState::AIR, BlockState(1), ChangeFlags::ALL));
        assert!(ctx.has_captures());
        assert_eq!(ctx.buffer::<Blocks>().unwrap().len(), 1);
    }

    #[test]
    fn test_switched_context_rejects_setup() {
        let mut ctx = ctx();
        ctx.mark_switched();
        assert_eq!(ctx.set_owner(UserId::from_seed(1)).unwrap_err(), PhaseError::AlreadySwitched);
        assert_eq!(
            ctx.enable_capture(CaptureCategory::Blocks).unwrap_err(),
            PhaseError::AlreadySwitched
        );
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut ctx = ctx();
        ctx.set_owner(UserId::from_seed(1)).unwrap().add_captures().unwrap();
        ctx.set_capture_position(Some(BlockPos::new(1, 1, 1)));
        ctx.mark_switched();

        ctx.reset(BuiltinPhase::EntityTick.into_ref());
        assert!(!ctx.is_switched());
        assert_eq!(ctx.owner(), None);
        assert_eq!(ctx.capture_position(), None);
        assert!(!ctx.is_capturing(CaptureCategory::Blocks));
        assert_eq!(ctx.phase(), BuiltinPhase::EntityTick.phase_id());
    }

    #[test]
    fn test_print_custom_lists_attribution() {
        let mut ctx = ctx();
        ctx.set_source(Source::Block(BlockPos::new(4, 5, 6)))
            .unwrap()
            .set_owner(UserId::from_seed(3))
            .unwrap();
        let mut report = ReportBuilder::new(ReportKind::UnprocessedCaptures, "test");
        ctx.print_custom(&mut report, 2);
        let report = report.build();
        assert!(report.lines.iter().any(|l| l.starts_with("  Source: block (4, 5, 6)")));
        assert!(report.lines.iter().any(|l| l.contains("Owner")));
    }
}
