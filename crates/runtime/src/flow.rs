//! Flow control: watermark-driven xoff/xon and credit grants.
//!
//! Backpressure never hides inside a blocking call.  Watermark assertion
//! emits `flow_xoff`; recovery emits `flow_xon` (signal mode) or a
//! `credit_grant` (credit mode).  A producer blocked past the per-edge
//! budget gets a deterministic shed instead of a stall.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use vox_abi::{SignalDraft, SignalEmitter};
use vox_domain::envelope::Lane;
use vox_domain::signal::{emitter, ControlSignalKind, SignalScope};
use vox_domain::trace::TraceEvent;
use vox_domain::{Event, Result};

use crate::identity::SessionIdentity;

/// Recovery style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowMode {
    /// Pause/resume with `flow_xoff` / `flow_xon`.
    Signal,
    /// Replenish with `credit_grant`.
    Credit,
}

/// Flow-control knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    pub mode: FlowMode,
    /// Longest a producer may be held at one edge before load is shed.
    pub max_block_time_ms: u64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        FlowConfig {
            mode: FlowMode::Signal,
            max_block_time_ms: 250,
        }
    }
}

/// Per-session flow controller (emitter identity `RK-14`).
pub struct FlowController {
    emitter: Arc<SignalEmitter>,
    ids: Arc<SessionIdentity>,
    config: FlowConfig,
    /// Edges currently under an asserted xoff.
    asserted: Mutex<HashSet<String>>,
}

impl FlowController {
    pub fn new(emitter: Arc<SignalEmitter>, ids: Arc<SessionIdentity>, config: FlowConfig) -> Self {
        FlowController {
            emitter,
            ids,
            config,
            asserted: Mutex::new(HashSet::new()),
        }
    }

    pub fn mode(&self) -> FlowMode {
        self.config.mode
    }

    /// High-watermark assertion for an edge.  Emits `flow_xoff` once per
    /// assertion episode; re-asserting an already-paused edge is a no-op.
    pub fn on_high_watermark(
        &self,
        edge_id: &str,
        target_lane: Lane,
        turn: Option<(&str, u64)>,
    ) -> Result<Option<Event>> {
        if !self.asserted.lock().insert(edge_id.to_owned()) {
            return Ok(None);
        }
        let mut draft = SignalDraft::new(ControlSignalKind::FlowXoff, emitter::FLOW)
            .reason("backpressure_asserted")
            .edge(edge_id)
            .target_lane(target_lane);
        draft = scope_to_turn(draft, turn);
        let event = self.emitter.emit(draft, self.ids.as_ref())?;
        TraceEvent::FlowTransition {
            edge_id: edge_id.to_owned(),
            signal: "flow_xoff".into(),
        }
        .emit();
        Ok(Some(event))
    }

    /// Recovery trigger for an edge.
    ///
    /// In signal mode this emits `flow_xon` — also when no xoff was ever
    /// asserted (idempotent resume).  In credit mode it grants
    /// `max(1, requested)` credits.
    pub fn on_recovery(
        &self,
        edge_id: &str,
        target_lane: Lane,
        requested_credit: u64,
        turn: Option<(&str, u64)>,
    ) -> Result<Event> {
        self.asserted.lock().remove(edge_id);

        let mut draft = match self.config.mode {
            FlowMode::Signal => SignalDraft::new(ControlSignalKind::FlowXon, emitter::FLOW),
            FlowMode::Credit => SignalDraft::new(ControlSignalKind::CreditGrant, emitter::FLOW)
                .amount(requested_credit.max(1)),
        };
        draft = draft.edge(edge_id).target_lane(target_lane);
        draft = scope_to_turn(draft, turn);

        let event = self.emitter.emit(draft, self.ids.as_ref())?;
        TraceEvent::FlowTransition {
            edge_id: edge_id.to_owned(),
            signal: match self.config.mode {
                FlowMode::Signal => "flow_xon".into(),
                FlowMode::Credit => "credit_grant".into(),
            },
        }
        .emit();
        Ok(event)
    }

    /// A producer exceeded the per-edge blocking budget: shed
    /// deterministically instead of stalling the pipeline.
    pub fn on_block_exceeded(&self, edge_id: &str, blocked_ms: u64) -> Result<Option<Event>> {
        if blocked_ms <= self.config.max_block_time_ms {
            return Ok(None);
        }
        let mut draft = SignalDraft::new(ControlSignalKind::Shed, emitter::ADMISSION)
            .reason("max_block_time_exceeded")
            .scope(SignalScope::Session);
        draft.edge_id = Some(edge_id.to_owned());
        let event = self.emitter.emit(draft, self.ids.as_ref())?;
        Ok(Some(event))
    }
}

fn scope_to_turn(draft: SignalDraft, turn: Option<(&str, u64)>) -> SignalDraft {
    // Flow signals apply at an edge; their scope inherits the turn when
    // one is running, the session otherwise.
    match turn {
        Some((turn_id, epoch)) => draft.turn(turn_id, epoch),
        None => draft,
    }
}
