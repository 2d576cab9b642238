//! The per-session pipeline — ingress, lanes, arbiter, fences, flow, sync,
//! and recording wired together behind one façade.
//!
//! Sessions are independent; everything in here is owned per session and
//! runs to completion per event.  Callers (transport adapters, node
//! supervisors) drive it from their own tasks.

use std::sync::Arc;

use vox_abi::{
    envelope_digest, resolve_unknown, IdentitySource, SignalDraft, SignalEmitter,
    UnknownEventDecision, ValidationPolicy,
};
use vox_adapter::{InvocationOutcome, InvokeContext, TransportFrame};
use vox_domain::envelope::Lane;
use vox_domain::outcome::{AbortReason, ProviderOutcome};
use vox_domain::signal::{emitter, ControlSignalKind, SignalScope};
use vox_domain::{Error, Event, Result};
use vox_recorder::{AppendOutcome, RecorderConfig, StageA};

use crate::admission::{AdmissionConfig, AdmissionController};
use crate::arbiter::{OpenOutcome, ProviderDirective, TurnArbiter, TurnPhase};
use crate::authority::AuthorityService;
use crate::fence::FenceMap;
use crate::flow::{FlowConfig, FlowController};
use crate::identity::SessionIdentity;
use crate::ingress::{IngressConfig, IngressNormalizer};
use crate::lanes::{LaneConfig, LaneRouter, PushOutcome};
use crate::output::{OutputAttempt, OutputDecision, OutputFence};
use crate::plan::{AdaptiveAction, SnapshotBundle};
use crate::sync::SyncEngine;
use crate::timebase::Timebase;

/// Everything a session pipeline is built from.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub pipeline_version: String,
    pub policy: ValidationPolicy,
    pub ingress: IngressConfig,
    pub flow: FlowConfig,
    pub lanes: LaneConfig,
    pub admission: AdmissionConfig,
    pub recorder: RecorderConfig,
    pub allowed_adaptive_actions: Vec<AdaptiveAction>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            pipeline_version: "dev".into(),
            policy: ValidationPolicy::default(),
            ingress: IngressConfig::default(),
            flow: FlowConfig::default(),
            lanes: LaneConfig::default(),
            admission: AdmissionConfig::default(),
            recorder: RecorderConfig::default(),
            allowed_adaptive_actions: vec![AdaptiveAction::RetryProvider],
        }
    }
}

/// Result of ingesting one transport frame.
#[derive(Debug)]
pub struct IngestOutcome {
    pub event: Event,
    /// False when the data queue refused the event (`WouldBlock`); the
    /// producer must honor the accompanying flow signal, not retry blindly.
    pub queued: bool,
    /// Control signals raised by the ingest (flow transitions, recording
    /// downgrades).
    pub signals: Vec<Event>,
}

/// One session's control core.
pub struct SessionPipeline {
    session_id: String,
    ids: Arc<SessionIdentity>,
    emitter: Arc<SignalEmitter>,
    authority: Arc<AuthorityService>,
    fence: Arc<FenceMap>,
    stage_a: Arc<StageA>,
    timebase: Arc<Timebase>,
    arbiter: TurnArbiter,
    ingress: IngressNormalizer,
    flow: FlowController,
    sync: SyncEngine,
    lanes: LaneRouter,
    output: OutputFence,
}

impl SessionPipeline {
    pub fn new(session_id: impl Into<String>, config: PipelineConfig) -> Result<Self> {
        let session_id = session_id.into();
        let ids = Arc::new(SessionIdentity::new(&session_id));
        let emitter = Arc::new(SignalEmitter::new(
            &session_id,
            &config.pipeline_version,
            config.policy.clone(),
        ));
        let authority = Arc::new(AuthorityService::new());
        authority.issue_lease(&session_id);
        let fence = Arc::new(FenceMap::new());
        let stage_a = Arc::new(StageA::new(config.recorder.clone()));
        let admission = Arc::new(AdmissionController::new(config.admission.clone()));

        let timebase = Arc::new(Timebase::new());
        timebase.calibrate(&session_id, ids.runtime_now_ms(), ids.wall_now_ms(), 0)?;

        let arbiter = TurnArbiter::new(
            &session_id,
            emitter.clone(),
            ids.clone(),
            authority.clone(),
            admission,
            fence.clone(),
            stage_a.clone(),
            config.allowed_adaptive_actions.clone(),
        );
        let ingress = IngressNormalizer::new(&config.ingress, config.policy.clone())?;
        let flow = FlowController::new(emitter.clone(), ids.clone(), config.flow.clone());
        let sync = SyncEngine::new(emitter.clone(), ids.clone());
        let lanes = LaneRouter::new(config.lanes.clone());
        let output = OutputFence::new(
            &session_id,
            emitter.clone(),
            ids.clone(),
            fence.clone(),
            authority.clone(),
            stage_a.clone(),
        );

        Ok(SessionPipeline {
            session_id,
            ids,
            emitter,
            authority,
            fence,
            stage_a,
            timebase,
            arbiter,
            ingress,
            flow,
            sync,
            lanes,
            output,
        })
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Accessors
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn epoch(&self) -> Option<u64> {
        self.authority.current(&self.session_id)
    }

    pub fn phase(&self) -> TurnPhase {
        self.arbiter.phase()
    }

    pub fn current_turn(&self) -> Option<String> {
        self.arbiter.current_turn()
    }

    pub fn stage_a(&self) -> &Arc<StageA> {
        &self.stage_a
    }

    pub fn timebase(&self) -> &Arc<Timebase> {
        &self.timebase
    }

    pub fn sync(&self) -> &SyncEngine {
        &self.sync
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Connection lifecycle
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// The transport attached.
    pub fn connect(&self) -> Result<Event> {
        let event = self.emitter.emit(
            SignalDraft::new(ControlSignalKind::Connected, emitter::CONNECTION)
                .scope(SignalScope::Session),
            self.ids.as_ref(),
        )?;
        self.record(std::slice::from_ref(&event));
        Ok(event)
    }

    /// The transport detached or stalled.  An active turn is aborted with
    /// the stable transport reason.
    pub fn disconnect(&self) -> Result<Vec<Event>> {
        let mut events = vec![self.emitter.emit(
            SignalDraft::new(ControlSignalKind::Disconnected, emitter::CONNECTION)
                .scope(SignalScope::Session),
            self.ids.as_ref(),
        )?];
        if self.arbiter.phase() == TurnPhase::Active {
            events.extend(self.arbiter.transport_lost()?);
        }
        self.record(&events);
        Ok(events)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Turn lifecycle
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Run the opening pass for a proposed turn.
    pub fn propose_turn(
        &self,
        turn_id: &str,
        observed_epoch: Option<u64>,
        bundle: &SnapshotBundle,
    ) -> Result<OpenOutcome> {
        let outcome = self.arbiter.propose(turn_id, observed_epoch, bundle)?;
        self.record(&outcome.events);
        Ok(outcome)
    }

    /// Commit the active turn.
    pub fn complete_turn(&self) -> Result<Vec<Event>> {
        let events = self.arbiter.complete()?;
        self.record(&events);
        Ok(events)
    }

    /// Accept a cancel at the given scope.
    ///
    /// Acceptance emits the cancel signal, sets the fence for the active
    /// turn, and drives the arbiter through `abort(cancelled)` + `close`.
    pub fn cancel(&self, scope: SignalScope) -> Result<Vec<Event>> {
        let mut draft = SignalDraft::new(ControlSignalKind::Cancel, emitter::CANCEL).scope(scope);
        let active = self.arbiter.current_turn();
        if scope == SignalScope::Turn {
            let turn_id = active
                .clone()
                .ok_or_else(|| Error::Validation("cancel scope=turn without an active turn".into()))?;
            draft = draft.turn(turn_id, self.arbiter.epoch());
        }
        let mut events = vec![self.emitter.emit(draft, self.ids.as_ref())?];

        if active.is_some() {
            events.extend(self.arbiter.cancel_accepted()?);
        }
        self.record(&events);
        Ok(events)
    }

    /// The barge-in detector fired: interruption, then cancellation of the
    /// active turn.
    pub fn barge_in(&self) -> Result<Vec<Event>> {
        let turn_id = self
            .arbiter
            .current_turn()
            .ok_or_else(|| Error::Validation("barge_in without an active turn".into()))?;
        let barge = self.emitter.emit(
            SignalDraft::new(ControlSignalKind::BargeIn, emitter::BARGE_IN)
                .turn(turn_id, self.arbiter.epoch()),
            self.ids.as_ref(),
        )?;
        self.record(std::slice::from_ref(&barge));
        let mut events = vec![barge];
        events.extend(self.cancel(SignalScope::Turn)?);
        Ok(events)
    }

    /// The session's lease was revoked (handoff, migration).  The new lease
    /// is announced with `lease_rotated`; an active turn drains.
    pub fn revoke_authority(&self) -> Result<Vec<Event>> {
        self.authority.revoke(&self.session_id);
        let mut events = Vec::new();
        if self.arbiter.phase() == TurnPhase::Active {
            events.extend(self.arbiter.authority_revoked()?);
        }
        events.push(self.emitter.emit(
            SignalDraft::new(ControlSignalKind::LeaseRotated, emitter::AUTHORITY)
                .scope(SignalScope::Session),
            self.ids.as_ref(),
        )?);
        self.record(&events);
        Ok(events)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Data path
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Normalize, validate, record, and route one inbound frame.
    pub fn ingest(&self, frame: TransportFrame) -> Result<IngestOutcome> {
        let epoch = self.epoch().unwrap_or_default();
        let mut event = self.ingress.normalize_frame(frame, epoch, self.ids.as_ref())?;
        self.resolve_extensions(&mut event)?;

        if let (Some(turn_id), Some(class)) =
            (self.arbiter.current_turn(), event.envelope.payload_class)
        {
            self.stage_a.tag_payload(&self.session_id, &turn_id, class);
        }
        let mut signals = Vec::new();
        self.record_with_notices(std::slice::from_ref(&event), &mut signals);

        let edge_key = event
            .envelope
            .edge_id
            .clone()
            .unwrap_or_else(|| "default".to_owned());
        let turn = self.arbiter.current_turn();
        let turn_ctx = turn.as_deref().map(|t| (t, self.arbiter.epoch()));

        let queued = match self.lanes.push(event.clone()) {
            PushOutcome::Queued | PushOutcome::TelemetryShed => true,
            PushOutcome::QueuedAtHighWatermark => {
                if let Some(xoff) =
                    self.flow
                        .on_high_watermark(&edge_key, Lane::Data, turn_ctx)?
                {
                    self.record_with_notices(std::slice::from_ref(&xoff), &mut signals);
                    signals.push(xoff);
                }
                true
            }
            PushOutcome::WouldBlock => {
                if let Some(xoff) =
                    self.flow
                        .on_high_watermark(&edge_key, Lane::Data, turn_ctx)?
                {
                    self.record_with_notices(std::slice::from_ref(&xoff), &mut signals);
                    signals.push(xoff);
                }
                false
            }
        };

        Ok(IngestOutcome {
            event,
            queued,
            signals,
        })
    }

    /// Next observable event on an edge (control preempts data).
    pub fn drain(&self, edge_id: &str) -> Option<Event> {
        self.lanes.pop(edge_id)
    }

    /// An edge recovered; resume it per the configured flow mode.
    pub fn recover_edge(&self, edge_id: &str, requested_credit: u64) -> Result<Event> {
        let turn = self.arbiter.current_turn();
        let turn_ctx = turn.as_deref().map(|t| (t, self.arbiter.epoch()));
        let event = self
            .flow
            .on_recovery(edge_id, Lane::Data, requested_credit, turn_ctx)?;
        self.record(std::slice::from_ref(&event));
        Ok(event)
    }

    /// Evaluate one output attempt against the fence.
    pub fn submit_output(&self, attempt: &OutputAttempt) -> Result<OutputDecision> {
        let decision = self.output.evaluate(attempt)?;
        self.record(std::slice::from_ref(&decision.signal));
        Ok(decision)
    }

    /// Resolve unknown extension namespaces per the unknown-event policy,
    /// appending the decision (with envelope digest) to the timeline.
    fn resolve_extensions(&self, event: &mut Event) -> Result<()> {
        let policy = self.emitter.policy();
        let unknown: Vec<String> = event
            .envelope
            .extensions
            .keys()
            .filter(|key| !policy.known_extension_namespaces.iter().any(|n| n == *key))
            .cloned()
            .collect();
        if unknown.is_empty() {
            return Ok(());
        }

        let reason = format!("unknown extension namespaces: {}", unknown.join(", "));
        let turn_id = event.envelope.turn_id.clone();
        match resolve_unknown(&event.envelope, &reason, policy) {
            Ok(marker) => {
                let decision = match marker.decision {
                    UnknownEventDecision::Rejected => "rejected",
                    UnknownEventDecision::Dropped => "dropped",
                    UnknownEventDecision::PassedThrough => "passed_through",
                };
                self.stage_a.record_audit(
                    &self.session_id,
                    turn_id.as_deref(),
                    format!("unknown_event {decision}"),
                    serde_json::to_value(&marker)?,
                );
                if marker.decision == UnknownEventDecision::Dropped {
                    for namespace in &unknown {
                        event.envelope.extensions.remove(namespace);
                    }
                }
                Ok(())
            }
            Err(e) => {
                let digest = envelope_digest(&event.envelope).unwrap_or_default();
                self.stage_a.record_audit(
                    &self.session_id,
                    turn_id.as_deref(),
                    "unknown_event rejected".into(),
                    serde_json::json!({ "reason": reason, "envelope_digest": digest }),
                );
                Err(e)
            }
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Provider invocations
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Context for invoking an external node under the active turn.  The
    /// cancel flag is the turn's fence flag: fence acceptance propagates to
    /// the invocation immediately.
    pub fn invocation_context(&self, invocation_id: &str) -> Result<InvokeContext> {
        let turn_id = self
            .arbiter
            .current_turn()
            .ok_or_else(|| Error::Validation("invocation without an active turn".into()))?;
        Ok(InvokeContext {
            session_id: self.session_id.clone(),
            turn_id: turn_id.clone(),
            invocation_id: invocation_id.to_owned(),
            authority_epoch: self.arbiter.epoch(),
            cancel: self.fence.flag(&self.session_id, &turn_id),
        })
    }

    /// Fold a normalized invocation outcome into the turn.
    pub fn handle_invocation_outcome(
        &self,
        outcome: &InvocationOutcome,
    ) -> Result<(ProviderDirective, Vec<Event>)> {
        let directive = self.arbiter.provider_directive(outcome.outcome);
        let mut events = Vec::new();

        if outcome.outcome != ProviderOutcome::Success {
            let mut draft = SignalDraft::new(ControlSignalKind::ProviderError, emitter::PROVIDER)
                .reason(outcome.outcome.to_string())
                .scope(SignalScope::ProviderInvocation);
            draft.provider_invocation_id = Some(outcome.invocation_id.clone());
            events.push(self.emitter.emit(draft, self.ids.as_ref())?);
        }

        match directive {
            ProviderDirective::Proceed | ProviderDirective::Retry => {}
            ProviderDirective::Fallback => {
                let turn = self.arbiter.current_turn();
                let mut draft = SignalDraft::new(ControlSignalKind::Fallback, emitter::PROVIDER)
                    .reason("provider_pressure");
                if let Some(turn_id) = turn {
                    draft = draft.turn(turn_id, self.arbiter.epoch());
                }
                events.push(self.emitter.emit(draft, self.ids.as_ref())?);
            }
            ProviderDirective::Abort(AbortReason::Cancelled) => {
                events.extend(self.arbiter.cancel_accepted()?);
            }
            ProviderDirective::Abort(reason) => {
                events.extend(self.arbiter.provider_failed(reason)?);
            }
        }

        self.record(&events);
        Ok((directive, events))
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Recording
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn record(&self, events: &[Event]) {
        let mut notices = Vec::new();
        self.record_with_notices(events, &mut notices);
        // Downgrade notices raised outside the data path are recorded but
        // surface only through the timeline.
        for notice in &notices {
            self.stage_a.record_event(notice);
        }
    }

    fn record_with_notices(&self, events: &[Event], notices: &mut Vec<Event>) {
        for event in events {
            if let AppendOutcome::Downgraded(level) = self.stage_a.record_event(event) {
                if let Ok(notice) = self.emitter.emit(
                    SignalDraft::new(
                        ControlSignalKind::RecordingLevelDowngraded,
                        emitter::RECORDER,
                    )
                    .reason(format!("stage_a_pressure:{level}"))
                    .scope(SignalScope::Session),
                    self.ids.as_ref(),
                ) {
                    notices.push(notice);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vox_domain::outcome::TerminalOutcome;
    use vox_domain::payload::TextKind;
    use vox_domain::Payload;

    use crate::plan::test_support::bundle;

    fn audio_frame(edge: &str) -> TransportFrame {
        let mut frame = TransportFrame::data(
            "s1",
            "dev",
            Payload::Audio {
                data: vec![0; 320],
                sample_rate_hz: 16_000,
                channels: 1,
            },
        );
        frame.codec = Some("pcm16".into());
        frame.edge_id = Some(edge.into());
        frame.runtime_timestamp_ms = Some(20);
        frame
    }

    fn text_frame(edge: &str, text: &str) -> TransportFrame {
        let mut frame = TransportFrame::data(
            "s1",
            "dev",
            Payload::Text {
                text: text.into(),
                text_kind: TextKind::Delta,
            },
        );
        frame.edge_id = Some(edge.into());
        frame
    }

    fn kinds(events: &[Event]) -> Vec<ControlSignalKind> {
        events
            .iter()
            .filter_map(|e| e.control_signal().map(|s| s.kind))
            .collect()
    }

    fn pipeline() -> SessionPipeline {
        SessionPipeline::new("s1", PipelineConfig::default()).unwrap()
    }

    #[test]
    fn cancel_fence_scenario_end_to_end() {
        let p = pipeline();

        // connected, turn_open_proposed, ingress_audio, output, cancel, output
        p.connect().unwrap();
        let open = p.propose_turn("t1", None, &bundle()).unwrap();
        assert!(open.accepted);
        let ingest = p.ingest(audio_frame("mic")).unwrap();
        assert!(ingest.queued);

        let first = p.submit_output(&OutputAttempt::for_turn("t1")).unwrap();
        assert!(first.accepted);
        assert_eq!(
            first.signal.control_signal().unwrap().kind,
            ControlSignalKind::OutputAccepted
        );

        let cancel_events = p.cancel(SignalScope::Turn).unwrap();
        assert_eq!(
            kinds(&cancel_events),
            vec![
                ControlSignalKind::Cancel,
                ControlSignalKind::Abort,
                ControlSignalKind::Close,
            ]
        );
        assert_eq!(
            cancel_events[1].control_signal().unwrap().reason.as_deref(),
            Some("cancelled")
        );

        let second = p.submit_output(&OutputAttempt::for_turn("t1")).unwrap();
        assert!(!second.accepted);
        assert_eq!(
            second.signal.control_signal().unwrap().kind,
            ControlSignalKind::PlaybackCancelled
        );
        assert_eq!(second.reason.as_deref(), Some("cancel_fence_applied"));

        // The baseline evidence recorded the abort.
        let drained = p.stage_a().drain_finalized();
        assert_eq!(drained.len(), 1);
        assert_eq!(
            drained[0].terminal,
            Some(TerminalOutcome::Abort {
                reason: AbortReason::Cancelled
            })
        );
        assert!(drained[0].timestamps.first_output_ms.is_some());
        assert!(drained[0]
            .payload_tags
            .contains(&vox_domain::PayloadClass::AudioRaw));
    }

    #[test]
    fn committed_turn_lifecycle() {
        let p = pipeline();
        p.connect().unwrap();
        let open = p.propose_turn("t1", None, &bundle()).unwrap();
        assert!(open.accepted);

        let done = p.complete_turn().unwrap();
        assert_eq!(
            kinds(&done),
            vec![ControlSignalKind::Commit, ControlSignalKind::Close]
        );
        let drained = p.stage_a().drain_finalized();
        assert_eq!(drained[0].terminal, Some(TerminalOutcome::Commit));
    }

    #[test]
    fn high_watermark_raises_xoff_once() {
        let mut config = PipelineConfig::default();
        config.lanes = LaneConfig {
            data_capacity: 4,
            telemetry_capacity: 8,
            high_watermark: 2,
        };
        let p = SessionPipeline::new("s1", config).unwrap();

        let a = p.ingest(text_frame("e1", "a")).unwrap();
        assert!(a.signals.is_empty());
        let b = p.ingest(text_frame("e1", "b")).unwrap();
        assert_eq!(kinds(&b.signals), vec![ControlSignalKind::FlowXoff]);
        // Still asserted: no duplicate xoff.
        let c = p.ingest(text_frame("e1", "c")).unwrap();
        assert!(c.signals.is_empty());

        let xon = p.recover_edge("e1", 0).unwrap();
        assert_eq!(
            xon.control_signal().unwrap().kind,
            ControlSignalKind::FlowXon
        );
    }

    #[test]
    fn full_queue_refuses_without_blocking() {
        let mut config = PipelineConfig::default();
        config.lanes = LaneConfig {
            data_capacity: 1,
            telemetry_capacity: 8,
            high_watermark: 1,
        };
        let p = SessionPipeline::new("s1", config).unwrap();

        assert!(p.ingest(text_frame("e1", "a")).unwrap().queued);
        let refused = p.ingest(text_frame("e1", "b")).unwrap();
        assert!(!refused.queued);
    }

    #[test]
    fn control_drains_before_data() {
        let p = pipeline();
        p.ingest(text_frame("default", "a")).unwrap();
        p.ingest(text_frame("default", "b")).unwrap();

        // A later-arriving control event on the same edge is observed first.
        let open = p.propose_turn("t1", None, &bundle()).unwrap();
        for event in &open.events {
            p.lanes.push(event.clone());
        }

        let first = p.drain("default").unwrap();
        assert_eq!(first.envelope.lane, Lane::Control);
        let next = p.drain("default").unwrap();
        assert_eq!(next.envelope.lane, Lane::Control);
    }

    #[test]
    fn barge_in_cancels_the_active_turn() {
        let p = pipeline();
        p.connect().unwrap();
        p.propose_turn("t1", None, &bundle()).unwrap();

        let events = p.barge_in().unwrap();
        let k = kinds(&events);
        assert_eq!(k[0], ControlSignalKind::BargeIn);
        assert!(k.contains(&ControlSignalKind::Cancel));
        assert!(k.contains(&ControlSignalKind::Abort));
        assert!(k.contains(&ControlSignalKind::Close));
        assert_eq!(p.phase(), TurnPhase::Idle);
    }

    #[test]
    fn disconnect_aborts_with_transport_reason() {
        let p = pipeline();
        p.connect().unwrap();
        p.propose_turn("t1", None, &bundle()).unwrap();

        let events = p.disconnect().unwrap();
        let k = kinds(&events);
        assert_eq!(k[0], ControlSignalKind::Disconnected);
        assert!(k.contains(&ControlSignalKind::Abort));
        let abort = events
            .iter()
            .find(|e| e.control_signal().is_some_and(|s| s.kind == ControlSignalKind::Abort))
            .unwrap();
        assert_eq!(
            abort.control_signal().unwrap().reason.as_deref(),
            Some("transport_disconnect_or_stall")
        );
    }

    #[test]
    fn revoked_authority_drains_the_turn() {
        let p = pipeline();
        p.connect().unwrap();
        p.propose_turn("t1", None, &bundle()).unwrap();

        let events = p.revoke_authority().unwrap();
        let k = kinds(&events);
        assert_eq!(k[0], ControlSignalKind::DeauthorizedDrain);
        assert!(k.contains(&ControlSignalKind::Abort));

        // Outputs produced under the old epoch are now refused.
        let mut attempt = OutputAttempt::for_turn("t1");
        attempt.observed_epoch = Some(1);
        let decision = p.submit_output(&attempt).unwrap();
        assert!(!decision.accepted);
        assert_eq!(
            decision.signal.control_signal().unwrap().kind,
            ControlSignalKind::StaleEpochReject
        );
    }

    #[test]
    fn invocation_context_observes_the_fence() {
        let p = pipeline();
        p.connect().unwrap();
        p.propose_turn("t1", None, &bundle()).unwrap();

        let ctx = p.invocation_context("inv-1").unwrap();
        assert_eq!(ctx.turn_id, "t1");
        assert_eq!(ctx.authority_epoch, 1);
        assert!(!ctx.cancel.is_cancelled());

        p.cancel(SignalScope::Turn).unwrap();
        assert!(ctx.cancel.is_cancelled());
    }

    #[test]
    fn provider_timeout_retries_under_the_plan() {
        let p = pipeline();
        p.connect().unwrap();
        p.propose_turn("t1", None, &bundle()).unwrap();

        let (directive, events) = p
            .handle_invocation_outcome(&InvocationOutcome {
                invocation_id: "inv-1".into(),
                outcome: ProviderOutcome::Timeout,
                detail: None,
            })
            .unwrap();
        assert_eq!(directive, ProviderDirective::Retry);
        assert_eq!(kinds(&events), vec![ControlSignalKind::ProviderError]);
        // The turn is still active.
        assert_eq!(p.phase(), TurnPhase::Active);
    }

    #[test]
    fn provider_safety_block_aborts_the_turn() {
        let p = pipeline();
        p.connect().unwrap();
        p.propose_turn("t1", None, &bundle()).unwrap();

        let (directive, events) = p
            .handle_invocation_outcome(&InvocationOutcome {
                invocation_id: "inv-1".into(),
                outcome: ProviderOutcome::SafetyOrPolicyBlock,
                detail: None,
            })
            .unwrap();
        assert_eq!(
            directive,
            ProviderDirective::Abort(AbortReason::ProviderFailed)
        );
        let k = kinds(&events);
        assert!(k.contains(&ControlSignalKind::ProviderError));
        assert!(k.contains(&ControlSignalKind::Abort));
        assert!(k.contains(&ControlSignalKind::Close));
    }

    #[test]
    fn unknown_extension_namespace_follows_policy() {
        use vox_abi::UnknownEventPolicy;

        let mut ext_frame = text_frame("e1", "hello");
        ext_frame
            .extensions
            .insert("com.example.lab".into(), serde_json::json!({"x": 1}));

        // Default policy: drop with an audit marker.
        let p = pipeline();
        let outcome = p.ingest(ext_frame.clone()).unwrap();
        assert!(outcome.event.envelope.extensions.is_empty());

        // Strict policy: reject outright.
        let mut config = PipelineConfig::default();
        config.policy.unknown_event = UnknownEventPolicy::StrictReject;
        let p = SessionPipeline::new("s1", config).unwrap();
        assert!(p.ingest(ext_frame.clone()).is_err());

        // Pass-through keeps the namespace.
        let mut config = PipelineConfig::default();
        config.policy.unknown_event = UnknownEventPolicy::PassThroughWithAuditMarker;
        let p = SessionPipeline::new("s1", config).unwrap();
        let outcome = p.ingest(ext_frame.clone()).unwrap();
        assert!(outcome
            .event
            .envelope
            .extensions
            .contains_key("com.example.lab"));

        // A known namespace is never an unknown event.
        let mut config = PipelineConfig::default();
        config.policy.unknown_event = UnknownEventPolicy::StrictReject;
        config
            .policy
            .known_extension_namespaces
            .push("com.example.lab".into());
        let p = SessionPipeline::new("s1", config).unwrap();
        let outcome = p.ingest(ext_frame).unwrap();
        assert!(outcome
            .event
            .envelope
            .extensions
            .contains_key("com.example.lab"));
    }

    #[test]
    fn session_cancel_without_active_turn_is_signal_only() {
        let p = pipeline();
        p.connect().unwrap();
        let events = p.cancel(SignalScope::Session).unwrap();
        assert_eq!(kinds(&events), vec![ControlSignalKind::Cancel]);
    }
}
