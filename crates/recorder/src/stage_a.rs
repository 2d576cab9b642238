//! Stage-A: the in-memory, non-blocking append path.
//!
//! Append is O(1) behind a short critical section and never blocks control
//! or data flow.  Baseline capacity is reserved: detail sheds first, the
//! recording level only ever downgrades automatically, and a downgrade
//! signal always precedes any possibility of baseline loss.  When baseline
//! evidence still cannot be preserved the append fails and the arbiter
//! terminates the turn with `recording_evidence_unavailable`.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use vox_domain::outcome::TerminalOutcome;
use vox_domain::trace::TraceEvent;
use vox_domain::{Error, Event, PayloadClass, Result};

use crate::evidence::{BaselineEvidence, DetailRecord};
use crate::ring::{RecordRing, RecordingLevel};

/// Stage-A sizing and initial level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Reserved baseline slots — one per in-flight accepted turn.
    pub baseline_capacity: usize,
    pub detail_capacity: usize,
    pub initial_level: RecordingLevel,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        RecorderConfig {
            baseline_capacity: 256,
            detail_capacity: 2048,
            initial_level: RecordingLevel::L2,
        }
    }
}

/// What an append did, beyond recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Recorded,
    /// The append triggered an automated level downgrade; the caller must
    /// emit `recording_level_downgraded`.
    Downgraded(RecordingLevel),
}

struct StageAState {
    level: RecordingLevel,
    baseline: RecordRing<BaselineEvidence>,
    detail: RecordRing<DetailRecord>,
}

/// The Stage-A recorder.
pub struct StageA {
    state: Mutex<StageAState>,
}

impl StageA {
    pub fn new(config: RecorderConfig) -> Self {
        StageA {
            state: Mutex::new(StageAState {
                level: config.initial_level,
                baseline: RecordRing::new(config.baseline_capacity),
                detail: RecordRing::new(config.detail_capacity),
            }),
        }
    }

    pub fn level(&self) -> RecordingLevel {
        self.state.lock().level
    }

    /// Operator-initiated level change.  This is the only way the level
    /// goes back up.
    pub fn operator_set_level(&self, level: RecordingLevel) {
        self.state.lock().level = level;
    }

    /// Record baseline evidence for a newly accepted turn.
    ///
    /// Errors with `RecordingOverflow` only after a final downgrade attempt;
    /// the caller then applies the deterministic terminal policy.
    pub fn open_turn(&self, evidence: BaselineEvidence) -> Result<AppendOutcome> {
        let mut state = self.state.lock();
        match state.baseline.push_or_reject(evidence) {
            Ok(()) => Ok(AppendOutcome::Recorded),
            Err(evidence) => {
                // Last-ditch shed: drop to L0 and clear detail before
                // declaring evidence unpreservable.
                if state.level > RecordingLevel::L0 {
                    let from = state.level;
                    state.level = RecordingLevel::L0;
                    state.detail.clear();
                    TraceEvent::RecordingDowngraded {
                        from_level: from.to_string(),
                        to_level: RecordingLevel::L0.to_string(),
                    }
                    .emit();
                    if state.baseline.push_or_reject(evidence).is_ok() {
                        return Ok(AppendOutcome::Downgraded(RecordingLevel::L0));
                    }
                }
                Err(Error::RecordingOverflow(format!(
                    "baseline ring full ({} turns in flight)",
                    state.baseline.len()
                )))
            }
        }
    }

    /// Record a detail view of an event, honoring the current level.
    pub fn record_event(&self, event: &Event) -> AppendOutcome {
        let mut state = self.state.lock();
        if state.level == RecordingLevel::L0 {
            return AppendOutcome::Recorded;
        }

        let summary = summarize(event);
        let full = if state.level == RecordingLevel::L2 {
            serde_json::to_value(event).ok()
        } else {
            None
        };
        let record = DetailRecord {
            session_id: event.envelope.session_id.clone(),
            turn_id: event.envelope.turn_id.clone(),
            runtime_sequence: event.envelope.runtime_sequence,
            summary,
            full,
        };

        let shed = state.detail.push_drop_oldest(record);
        if shed {
            // Sustained detail pressure: step the level down once per shed
            // episode so producers lighten before baseline is ever at risk.
            if let Some(next) = state.level.downgraded() {
                let from = state.level;
                state.level = next;
                if next == RecordingLevel::L0 {
                    state.detail.clear();
                }
                TraceEvent::RecordingDowngraded {
                    from_level: from.to_string(),
                    to_level: next.to_string(),
                }
                .emit();
                return AppendOutcome::Downgraded(next);
            }
        }
        AppendOutcome::Recorded
    }

    /// Append an audit record (unknown-event decisions, schema rejects) to
    /// the timeline.  Audit rides the detail ring but is kept even at
    /// summary level; only L0 drops it.
    pub fn record_audit(
        &self,
        session_id: &str,
        turn_id: Option<&str>,
        summary: String,
        body: serde_json::Value,
    ) {
        let mut state = self.state.lock();
        if state.level == RecordingLevel::L0 {
            return;
        }
        let record = DetailRecord {
            session_id: session_id.to_owned(),
            turn_id: turn_id.map(str::to_owned),
            runtime_sequence: 0,
            summary,
            full: Some(body),
        };
        state.detail.push_drop_oldest(record);
    }

    /// Note a payload class observed on the turn's data path.
    pub fn tag_payload(&self, session_id: &str, turn_id: &str, class: PayloadClass) {
        let mut state = self.state.lock();
        if let Some(ev) = find_turn(&mut state.baseline, session_id, turn_id) {
            if !ev.payload_tags.contains(&class) {
                ev.payload_tags.push(class);
            }
        }
    }

    /// Record the turn's first output timestamp (idempotent).
    pub fn note_first_output(&self, session_id: &str, turn_id: &str, wall_ms: i64) {
        let mut state = self.state.lock();
        if let Some(ev) = find_turn(&mut state.baseline, session_id, turn_id) {
            if ev.timestamps.first_output_ms.is_none() {
                ev.timestamps.first_output_ms = Some(wall_ms);
            }
        }
    }

    /// Seal a turn's baseline record with its terminal outcome.  Returns
    /// false when no baseline record exists for the turn.
    pub fn finalize_turn(
        &self,
        session_id: &str,
        turn_id: &str,
        terminal: TerminalOutcome,
        close_emitted: bool,
    ) -> bool {
        let mut state = self.state.lock();
        match find_turn(&mut state.baseline, session_id, turn_id) {
            Some(ev) => {
                if ev.terminal.is_none() {
                    ev.terminal = Some(terminal);
                }
                ev.close_emitted = close_emitted;
                true
            }
            None => false,
        }
    }

    /// Hand finalized baseline records to Stage-B, freeing their reserved
    /// slots.  Unfinalized turns stay put.
    pub fn drain_finalized(&self) -> Vec<BaselineEvidence> {
        self.state
            .lock()
            .baseline
            .drain_where(BaselineEvidence::is_finalized)
    }

    /// Hand all detail records to Stage-B.
    pub fn drain_detail(&self) -> Vec<DetailRecord> {
        self.state.lock().detail.drain_all()
    }

    /// (baseline, detail) occupancy, for tests and metrics.
    pub fn occupancy(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.baseline.len(), state.detail.len())
    }

    pub fn detail_dropped(&self) -> u64 {
        self.state.lock().detail.dropped()
    }
}

fn find_turn<'a>(
    ring: &'a mut RecordRing<BaselineEvidence>,
    session_id: &str,
    turn_id: &str,
) -> Option<&'a mut BaselineEvidence> {
    ring.iter_mut()
        .find(|ev| ev.session_id == session_id && ev.turn_id == turn_id)
}

fn summarize(event: &Event) -> String {
    match event.control_signal() {
        Some(signal) => format!(
            "{} {} seq={}",
            event.envelope.lane, signal.kind, event.envelope.runtime_sequence
        ),
        None => format!(
            "{} payload seq={}",
            event.envelope.lane, event.envelope.runtime_sequence
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use vox_domain::outcome::AbortReason;
    use vox_domain::payload::TextKind;
    use vox_domain::{Envelope, Payload};

    fn evidence(turn: &str) -> BaselineEvidence {
        BaselineEvidence {
            session_id: "s1".into(),
            turn_id: turn.into(),
            envelope: Envelope::session_scoped("s1"),
            payload_tags: Vec::new(),
            redactions: BTreeMap::new(),
            plan_hash: "abc".into(),
            snapshot_provenance: BTreeMap::new(),
            determinism_seed: 1,
            ordering_markers: vec!["runtime_sequence".into(), "event_id".into()],
            merge_rule_id: "merge/ordered-by-runtime-sequence".into(),
            merge_rule_version: 1,
            authority_epoch: 1,
            terminal: None,
            close_emitted: false,
            timestamps: Default::default(),
        }
    }

    fn text_event(seq: u64) -> Event {
        let mut env = Envelope::session_scoped("s1");
        env.runtime_sequence = seq;
        Event::new(
            env,
            Payload::Text {
                text: "x".into(),
                text_kind: TextKind::Delta,
            },
        )
    }

    fn config(baseline: usize, detail: usize) -> RecorderConfig {
        RecorderConfig {
            baseline_capacity: baseline,
            detail_capacity: detail,
            initial_level: RecordingLevel::L2,
        }
    }

    #[test]
    fn baseline_survives_detail_overflow() {
        let stage = StageA::new(config(4, 2));
        stage.open_turn(evidence("t1")).unwrap();

        for seq in 0..16 {
            stage.record_event(&text_event(seq));
        }
        let (baseline, _) = stage.occupancy();
        assert_eq!(baseline, 1);
        assert!(stage.detail_dropped() > 0);
    }

    #[test]
    fn detail_overflow_downgrades_step_by_step() {
        let stage = StageA::new(config(4, 1));
        assert_eq!(stage.level(), RecordingLevel::L2);

        // First shed: L2 -> L1.
        stage.record_event(&text_event(0));
        let outcome = stage.record_event(&text_event(1));
        assert_eq!(outcome, AppendOutcome::Downgraded(RecordingLevel::L1));

        // Next shed: L1 -> L0, after which detail is ignored.
        let outcome = stage.record_event(&text_event(2));
        assert_eq!(outcome, AppendOutcome::Downgraded(RecordingLevel::L0));
        assert_eq!(stage.record_event(&text_event(3)), AppendOutcome::Recorded);
        assert_eq!(stage.level(), RecordingLevel::L0);
        assert_eq!(stage.occupancy().1, 0);
    }

    #[test]
    fn level_never_upgrades_automatically() {
        let stage = StageA::new(config(4, 1));
        stage.record_event(&text_event(0));
        stage.record_event(&text_event(1));
        stage.record_event(&text_event(2));
        assert_eq!(stage.level(), RecordingLevel::L0);

        // Still L0 regardless of how quiet it gets.
        for seq in 3..10 {
            stage.record_event(&text_event(seq));
        }
        assert_eq!(stage.level(), RecordingLevel::L0);

        // Operator action brings it back.
        stage.operator_set_level(RecordingLevel::L2);
        assert_eq!(stage.level(), RecordingLevel::L2);
    }

    #[test]
    fn baseline_exhaustion_downgrades_then_errors() {
        let stage = StageA::new(config(1, 8));
        stage.open_turn(evidence("t1")).unwrap();

        // Ring is full of unfinalized turns: one last downgrade, then error.
        let err = stage.open_turn(evidence("t2")).unwrap_err();
        assert!(matches!(err, Error::RecordingOverflow(_)));
        assert_eq!(stage.level(), RecordingLevel::L0);
    }

    #[test]
    fn finalized_turns_free_reserved_slots() {
        let stage = StageA::new(config(1, 8));
        stage.open_turn(evidence("t1")).unwrap();
        assert!(stage.finalize_turn(
            "s1",
            "t1",
            TerminalOutcome::Abort {
                reason: AbortReason::Cancelled
            },
            true,
        ));

        let drained = stage.drain_finalized();
        assert_eq!(drained.len(), 1);
        assert_eq!(
            drained[0].terminal,
            Some(TerminalOutcome::Abort {
                reason: AbortReason::Cancelled
            })
        );

        // Slot is free again.
        stage.open_turn(evidence("t2")).unwrap();
    }

    #[test]
    fn unfinalized_turns_are_never_drained() {
        let stage = StageA::new(config(4, 8));
        stage.open_turn(evidence("t1")).unwrap();
        assert!(stage.drain_finalized().is_empty());
        assert_eq!(stage.occupancy().0, 1);
    }

    #[test]
    fn first_output_timestamp_is_idempotent() {
        let stage = StageA::new(config(4, 8));
        stage.open_turn(evidence("t1")).unwrap();
        stage.note_first_output("s1", "t1", 100);
        stage.note_first_output("s1", "t1", 200);
        stage.finalize_turn("s1", "t1", TerminalOutcome::Commit, true);
        let drained = stage.drain_finalized();
        assert_eq!(drained[0].timestamps.first_output_ms, Some(100));
    }

    #[test]
    fn summary_level_strips_full_bodies() {
        let stage = StageA::new(config(4, 8));
        stage.operator_set_level(RecordingLevel::L1);
        stage.record_event(&text_event(1));
        let detail = stage.drain_detail();
        assert_eq!(detail.len(), 1);
        assert!(detail[0].full.is_none());
        assert!(detail[0].summary.contains("seq=1"));
    }
}
