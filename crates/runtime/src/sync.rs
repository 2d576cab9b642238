//! Sync engine: coordinated drops and discontinuities.
//!
//! When an edge must shed a contiguous range, the sync policy decides what
//! downstream hears: a lone `drop_notice` (`atomic_drop`) or a
//! `drop_notice` + `discontinuity` pair (`drop_with_discontinuity`) so
//! sync-domain peers can re-anchor.  Pairs are emitted in that order and
//! carry identical scope.

use std::sync::Arc;

use vox_abi::{SignalDraft, SignalEmitter};
use vox_domain::envelope::Lane;
use vox_domain::signal::{emitter, ControlSignalKind};
use vox_domain::{Event, Result};

use crate::identity::SessionIdentity;

/// Per-session sync engine (emitters `RK-12` / `RK-15`).
pub struct SyncEngine {
    emitter: Arc<SignalEmitter>,
    ids: Arc<SessionIdentity>,
}

impl SyncEngine {
    pub fn new(emitter: Arc<SignalEmitter>, ids: Arc<SessionIdentity>) -> Self {
        SyncEngine { emitter, ids }
    }

    /// Drop `[range_start, range_end]` atomically: a single notice, no
    /// discontinuity.
    pub fn atomic_drop(
        &self,
        edge_id: &str,
        target_lane: Lane,
        range: (u64, u64),
        turn: Option<(&str, u64)>,
    ) -> Result<Vec<Event>> {
        let notice = self.drop_notice(edge_id, target_lane, range, turn)?;
        Ok(vec![notice])
    }

    /// Drop a range and mark the resulting discontinuity so the sync
    /// domain's remaining streams can re-anchor.
    pub fn drop_with_discontinuity(
        &self,
        edge_id: &str,
        target_lane: Lane,
        range: (u64, u64),
        sync_domain: &str,
        discontinuity_id: &str,
        turn: Option<(&str, u64)>,
    ) -> Result<Vec<Event>> {
        let notice = self.drop_notice(edge_id, target_lane, range, turn)?;

        let mut draft = SignalDraft::new(ControlSignalKind::Discontinuity, emitter::SYNC_DISCONTINUITY)
            .sync(sync_domain, discontinuity_id);
        if let Some((turn_id, epoch)) = turn {
            draft = draft.turn(turn_id, epoch);
        }
        let discontinuity = self.emitter.emit(draft, self.ids.as_ref())?;

        Ok(vec![notice, discontinuity])
    }

    fn drop_notice(
        &self,
        edge_id: &str,
        target_lane: Lane,
        range: (u64, u64),
        turn: Option<(&str, u64)>,
    ) -> Result<Event> {
        let mut draft = SignalDraft::new(ControlSignalKind::DropNotice, emitter::SYNC_DROP)
            .edge(edge_id)
            .target_lane(target_lane)
            .seq_range(range.0, range.1);
        if let Some((turn_id, epoch)) = turn {
            draft = draft.turn(turn_id, epoch);
        }
        self.emitter.emit(draft, self.ids.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vox_abi::ValidationPolicy;
    use vox_domain::signal::SignalScope;

    fn engine() -> SyncEngine {
        let emitter = Arc::new(SignalEmitter::new(
            "s1",
            "p1",
            ValidationPolicy::default(),
        ));
        let ids = Arc::new(SessionIdentity::new("s1"));
        SyncEngine::new(emitter, ids)
    }

    #[test]
    fn atomic_drop_emits_a_single_notice() {
        let events = engine()
            .atomic_drop("edge-1", Lane::Data, (10, 20), None)
            .unwrap();
        assert_eq!(events.len(), 1);
        let signal = events[0].control_signal().unwrap();
        assert_eq!(signal.kind, ControlSignalKind::DropNotice);
        assert_eq!(signal.seq_range, Some((10, 20)));
        assert_eq!(signal.target_lane, Some(Lane::Data));
    }

    #[test]
    fn discontinuity_pair_is_ordered_and_scope_identical() {
        let events = engine()
            .drop_with_discontinuity(
                "edge-1",
                Lane::Data,
                (10, 20),
                "av-sync",
                "disc-1",
                Some(("t1", 2)),
            )
            .unwrap();
        assert_eq!(events.len(), 2);

        let notice = events[0].control_signal().unwrap();
        let disc = events[1].control_signal().unwrap();
        assert_eq!(notice.kind, ControlSignalKind::DropNotice);
        assert_eq!(disc.kind, ControlSignalKind::Discontinuity);

        // Identical scope on both halves of the pair.
        assert_eq!(notice.scope, Some(SignalScope::Turn));
        assert_eq!(disc.scope, Some(SignalScope::Turn));
        assert_eq!(events[0].envelope.turn_id, events[1].envelope.turn_id);

        assert_eq!(events[1].envelope.sync_domain.as_deref(), Some("av-sync"));
        assert_eq!(
            events[1].envelope.discontinuity_id.as_deref(),
            Some("disc-1")
        );

        // Deterministic order: the notice precedes the discontinuity.
        assert!(events[0].envelope.runtime_sequence < events[1].envelope.runtime_sequence);
    }

    #[test]
    fn session_scoped_pair_without_turn() {
        let events = engine()
            .drop_with_discontinuity("edge-1", Lane::Data, (1, 2), "av-sync", "disc-2", None)
            .unwrap();
        for event in &events {
            assert_eq!(
                event.control_signal().unwrap().scope,
                Some(SignalScope::Session)
            );
        }
    }
}
