//! The turn arbiter.
//!
//! One arbiter per session drives the turn lifecycle
//! `Idle → Opening → Active → Terminal → Closed`.  `turn_open` is emitted
//! only after admission passes, the authority epoch validates, the plan
//! materializes, and Stage-A records the baseline evidence.  Accepted
//! turns end in exactly one terminal outcome (`commit` XOR `abort`)
//! followed by `close`; pre-turn rejections emit neither.

use std::sync::Arc;

use parking_lot::Mutex;

use vox_abi::{IdentitySource, SignalDraft, SignalEmitter};
use vox_domain::outcome::{AbortReason, ProviderOutcome, TerminalOutcome};
use vox_domain::signal::{emitter, ControlSignalKind, SignalScope};
use vox_domain::trace::TraceEvent;
use vox_domain::{Error, Event, Result};
use vox_recorder::{AppendOutcome, BaselineEvidence, StageA, TurnTimestamps};

use crate::admission::{AdmissionController, AdmissionDecision};
use crate::authority::AuthorityService;
use crate::fence::FenceMap;
use crate::identity::SessionIdentity;
use crate::plan::{self, AdaptiveAction, ResolvedTurnPlan, SnapshotBundle};

/// Turn lifecycle phase.  `Opening`, `Terminal`, and `Closed` are transient
/// within a single arbiter call; between calls a session is `Idle` or has
/// an `Active` turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Opening,
    Active,
    Terminal,
    Closed,
}

/// What a proposal produced.
#[derive(Debug)]
pub struct OpenOutcome {
    /// True when the turn reached (and stayed in) `Active`.
    pub accepted: bool,
    /// Every control event emitted during the opening pass, in order.
    pub events: Vec<Event>,
}

/// What the arbiter wants done about a provider outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderDirective {
    Proceed,
    Retry,
    Fallback,
    Abort(AbortReason),
}

struct ArbiterState {
    phase: TurnPhase,
    turn_id: Option<String>,
    plan: Option<ResolvedTurnPlan>,
    epoch: u64,
}

/// Per-session turn arbiter.
pub struct TurnArbiter {
    session_id: String,
    emitter: Arc<SignalEmitter>,
    ids: Arc<SessionIdentity>,
    authority: Arc<AuthorityService>,
    admission: Arc<AdmissionController>,
    fence: Arc<FenceMap>,
    stage_a: Arc<StageA>,
    /// Adaptive actions granted to plans this arbiter materializes.
    allowed_adaptive_actions: Vec<AdaptiveAction>,
    state: Mutex<ArbiterState>,
}

impl TurnArbiter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: impl Into<String>,
        emitter: Arc<SignalEmitter>,
        ids: Arc<SessionIdentity>,
        authority: Arc<AuthorityService>,
        admission: Arc<AdmissionController>,
        fence: Arc<FenceMap>,
        stage_a: Arc<StageA>,
        allowed_adaptive_actions: Vec<AdaptiveAction>,
    ) -> Self {
        TurnArbiter {
            session_id: session_id.into(),
            emitter,
            ids,
            authority,
            admission,
            fence,
            stage_a,
            allowed_adaptive_actions,
            state: Mutex::new(ArbiterState {
                phase: TurnPhase::Idle,
                turn_id: None,
                plan: None,
                epoch: 0,
            }),
        }
    }

    pub fn phase(&self) -> TurnPhase {
        self.state.lock().phase
    }

    pub fn current_turn(&self) -> Option<String> {
        self.state.lock().turn_id.clone()
    }

    /// The active turn's frozen plan.
    pub fn plan(&self) -> Option<ResolvedTurnPlan> {
        self.state.lock().plan.clone()
    }

    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Opening
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Run the full opening pass for a proposed turn.
    ///
    /// `observed_epoch` is the epoch the proposer was operating under, when
    /// it carried one; a non-current value is refused with
    /// `stale_epoch_reject` before any turn state is created.
    pub fn propose(
        &self,
        turn_id: &str,
        observed_epoch: Option<u64>,
        bundle: &SnapshotBundle,
    ) -> Result<OpenOutcome> {
        let mut state = self.state.lock();
        let mut events = Vec::new();
        let proposed_at_ms = self.ids.wall_now_ms();

        events.push(self.emit(
            SignalDraft::new(ControlSignalKind::TurnOpenProposed, emitter::TURN_PROPOSER)
                .scope(SignalScope::Session),
        )?);

        if state.phase != TurnPhase::Idle {
            events.push(self.pre_turn(ControlSignalKind::Defer, "turn_in_progress")?);
            return Ok(OpenOutcome {
                accepted: false,
                events,
            });
        }
        state.phase = TurnPhase::Opening;

        // Admission gate.
        match self.admission.decide() {
            AdmissionDecision::Admit { reason } => {
                events.push(self.pre_turn(ControlSignalKind::Admit, reason)?);
            }
            AdmissionDecision::Reject { reason } => {
                events.push(self.pre_turn(ControlSignalKind::Reject, reason)?);
                state.phase = TurnPhase::Idle;
                TraceEvent::TurnRejectedPreOpen {
                    session_id: self.session_id.clone(),
                    reason: reason.into(),
                }
                .emit();
                return Ok(OpenOutcome {
                    accepted: false,
                    events,
                });
            }
            AdmissionDecision::Defer { reason } => {
                events.push(self.pre_turn(ControlSignalKind::Defer, reason)?);
                state.phase = TurnPhase::Idle;
                return Ok(OpenOutcome {
                    accepted: false,
                    events,
                });
            }
        }

        // Authority gate — a precondition to turn_open.
        let current = self.authority.current(&self.session_id);
        let epoch = match (current, observed_epoch) {
            (None, observed) => {
                events.push(self.stale_reject("no_active_lease", observed.unwrap_or(0))?);
                state.phase = TurnPhase::Idle;
                return Ok(OpenOutcome {
                    accepted: false,
                    events,
                });
            }
            (Some(current), Some(observed)) if observed != current => {
                events.push(self.stale_reject("stale_proposal_epoch", observed)?);
                state.phase = TurnPhase::Idle;
                return Ok(OpenOutcome {
                    accepted: false,
                    events,
                });
            }
            (Some(current), _) => current,
        };

        // Plan materialization.  The runtime sequence at this instant is
        // one of the two determinism-seed inputs.
        let plan = match plan::materialize(
            bundle,
            self.ids.current_sequence(),
            &self.emitter.policy().current_schema,
            self.allowed_adaptive_actions.clone(),
        ) {
            Ok(plan) => plan,
            Err(e) => {
                let kind = if e.is_retryable() {
                    ControlSignalKind::Defer
                } else {
                    ControlSignalKind::Reject
                };
                events.push(self.pre_turn(kind, e.reason())?);
                state.phase = TurnPhase::Idle;
                return Ok(OpenOutcome {
                    accepted: false,
                    events,
                });
            }
        };

        let turn_open = self.emit(
            SignalDraft::new(ControlSignalKind::TurnOpen, emitter::ARBITER).turn(turn_id, epoch),
        )?;

        let evidence = BaselineEvidence {
            session_id: self.session_id.clone(),
            turn_id: turn_id.to_owned(),
            envelope: turn_open.envelope.clone(),
            payload_tags: Vec::new(),
            redactions: Default::default(),
            plan_hash: plan.plan_hash.clone(),
            snapshot_provenance: plan.snapshot_provenance.clone(),
            determinism_seed: plan.determinism.seed,
            ordering_markers: plan.determinism.ordering_markers.clone(),
            merge_rule_id: plan.determinism.merge_rule_id.clone(),
            merge_rule_version: plan.determinism.merge_rule_version,
            authority_epoch: epoch,
            terminal: None,
            close_emitted: false,
            timestamps: TurnTimestamps {
                turn_open_proposed_ms: Some(proposed_at_ms),
                turn_open_ms: Some(self.ids.wall_now_ms()),
                first_output_ms: None,
            },
        };

        let mut downgrade_notice = None;
        let level_before = self.stage_a.level();
        match self.stage_a.open_turn(evidence) {
            Ok(AppendOutcome::Recorded) => {}
            Ok(AppendOutcome::Downgraded(level)) => {
                downgrade_notice = Some(self.emit(
                    SignalDraft::new(
                        ControlSignalKind::RecordingLevelDowngraded,
                        emitter::RECORDER,
                    )
                    .reason(format!("stage_a_pressure:{level}"))
                    .scope(SignalScope::Session),
                )?);
            }
            Err(Error::RecordingOverflow(detail)) => {
                // The turn is accepted but its evidence cannot be
                // preserved: deterministic terminal policy.
                tracing::warn!(session = %self.session_id, turn = %turn_id, %detail,
                    "baseline evidence unavailable at turn open");
                events.push(turn_open);
                if self.stage_a.level() < level_before {
                    events.push(self.emit(
                        SignalDraft::new(
                            ControlSignalKind::RecordingLevelDowngraded,
                            emitter::RECORDER,
                        )
                        .reason("stage_a_exhausted")
                        .scope(SignalScope::Session),
                    )?);
                }
                events.push(self.turn_signal(
                    ControlSignalKind::Abort,
                    turn_id,
                    epoch,
                    Some(AbortReason::RecordingEvidenceUnavailable.as_str()),
                )?);
                events.push(self.turn_signal(ControlSignalKind::Close, turn_id, epoch, None)?);
                state.phase = TurnPhase::Idle;
                TraceEvent::TurnClosed {
                    session_id: self.session_id.clone(),
                    turn_id: turn_id.to_owned(),
                    outcome: AbortReason::RecordingEvidenceUnavailable.to_string(),
                }
                .emit();
                return Ok(OpenOutcome {
                    accepted: false,
                    events,
                });
            }
            Err(e) => return Err(e),
        }

        events.push(turn_open);
        events.extend(downgrade_notice);
        state.phase = TurnPhase::Active;
        state.turn_id = Some(turn_id.to_owned());
        state.epoch = epoch;
        self.admission.on_turn_opened();
        TraceEvent::TurnOpened {
            session_id: self.session_id.clone(),
            turn_id: turn_id.to_owned(),
            plan_hash: plan.plan_hash.clone(),
            authority_epoch: epoch,
        }
        .emit();
        state.plan = Some(plan);

        Ok(OpenOutcome {
            accepted: true,
            events,
        })
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Terminal transitions
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// The turn's work succeeded: `commit` then `close`.
    pub fn complete(&self) -> Result<Vec<Event>> {
        self.terminalize(TerminalOutcome::Commit)
    }

    /// A cancel was accepted for the active turn: set the fence, then
    /// `abort(cancelled)` and `close`.
    pub fn cancel_accepted(&self) -> Result<Vec<Event>> {
        {
            let state = self.state.lock();
            let turn_id = active_turn(&state)?;
            self.fence.accept(&self.session_id, turn_id);
        }
        self.terminalize(TerminalOutcome::Abort {
            reason: AbortReason::Cancelled,
        })
    }

    /// The session's lease was revoked while the turn ran.
    pub fn authority_revoked(&self) -> Result<Vec<Event>> {
        let drain = {
            let state = self.state.lock();
            let turn_id = active_turn(&state)?.to_owned();
            self.emit(
                SignalDraft::new(ControlSignalKind::DeauthorizedDrain, emitter::AUTHORITY)
                    .reason("lease_revoked")
                    .turn(turn_id, state.epoch),
            )?
        };
        let mut events = vec![drain];
        events.extend(self.terminalize(TerminalOutcome::Abort {
            reason: AbortReason::DeauthorizedDrain,
        })?);
        Ok(events)
    }

    /// The transport disconnected or stalled out.
    pub fn transport_lost(&self) -> Result<Vec<Event>> {
        self.terminalize(TerminalOutcome::Abort {
            reason: AbortReason::TransportDisconnectOrStall,
        })
    }

    /// Terminal policy escalation from the recorder.
    pub fn recording_unavailable(&self) -> Result<Vec<Event>> {
        self.terminalize(TerminalOutcome::Abort {
            reason: AbortReason::RecordingEvidenceUnavailable,
        })
    }

    /// Abort for a provider that failed beyond the plan's adaptive budget.
    pub fn provider_failed(&self, reason: AbortReason) -> Result<Vec<Event>> {
        self.terminalize(TerminalOutcome::Abort { reason })
    }

    fn terminalize(&self, terminal: TerminalOutcome) -> Result<Vec<Event>> {
        let mut state = self.state.lock();
        let turn_id = active_turn(&state)?.to_owned();
        let epoch = state.epoch;
        state.phase = TurnPhase::Terminal;

        let mut events = Vec::new();
        let outcome_name = match terminal {
            TerminalOutcome::Commit => {
                events.push(self.turn_signal(ControlSignalKind::Commit, &turn_id, epoch, None)?);
                "commit".to_owned()
            }
            TerminalOutcome::Abort { reason } => {
                events.push(self.turn_signal(
                    ControlSignalKind::Abort,
                    &turn_id,
                    epoch,
                    Some(reason.as_str()),
                )?);
                reason.to_string()
            }
        };

        events.push(self.turn_signal(ControlSignalKind::Close, &turn_id, epoch, None)?);
        state.phase = TurnPhase::Closed;
        self.stage_a
            .finalize_turn(&self.session_id, &turn_id, terminal, true);

        state.phase = TurnPhase::Idle;
        state.turn_id = None;
        state.plan = None;
        self.admission.on_turn_closed();
        TraceEvent::TurnClosed {
            session_id: self.session_id.clone(),
            turn_id,
            outcome: outcome_name,
        }
        .emit();

        Ok(events)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Provider outcomes
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Decide what a normalized provider outcome means for the active
    /// turn, honoring the plan's allowed adaptive actions.
    pub fn provider_directive(&self, outcome: ProviderOutcome) -> ProviderDirective {
        let state = self.state.lock();
        let plan = state.plan.as_ref();
        match outcome {
            ProviderOutcome::Success => ProviderDirective::Proceed,
            ProviderOutcome::Cancelled => ProviderDirective::Abort(AbortReason::Cancelled),
            ProviderOutcome::Timeout | ProviderOutcome::OverloadOrRateLimit => {
                if plan.is_some_and(|p| p.allows(AdaptiveAction::RetryProvider)) {
                    ProviderDirective::Retry
                } else if plan.is_some_and(|p| p.allows(AdaptiveAction::FallbackProvider)) {
                    ProviderDirective::Fallback
                } else {
                    ProviderDirective::Abort(AbortReason::ProviderFailed)
                }
            }
            ProviderOutcome::SafetyOrPolicyBlock => {
                ProviderDirective::Abort(AbortReason::ProviderFailed)
            }
            ProviderOutcome::InfraDisconnect => {
                ProviderDirective::Abort(AbortReason::TransportDisconnectOrStall)
            }
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Emission helpers
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn emit(&self, draft: SignalDraft) -> Result<Event> {
        self.emitter.emit(draft, self.ids.as_ref())
    }

    fn pre_turn(&self, kind: ControlSignalKind, reason: &str) -> Result<Event> {
        self.emit(
            SignalDraft::new(kind, emitter::ADMISSION)
                .reason(reason)
                .scope(SignalScope::Session),
        )
    }

    fn stale_reject(&self, reason: &str, observed_epoch: u64) -> Result<Event> {
        let mut draft = SignalDraft::new(ControlSignalKind::StaleEpochReject, emitter::AUTHORITY)
            .reason(reason)
            .scope(SignalScope::Session);
        draft.authority_epoch = Some(observed_epoch);
        self.emit(draft)
    }

    fn turn_signal(
        &self,
        kind: ControlSignalKind,
        turn_id: &str,
        epoch: u64,
        reason: Option<&str>,
    ) -> Result<Event> {
        let mut draft = SignalDraft::new(kind, emitter::ARBITER).turn(turn_id, epoch);
        if let Some(reason) = reason {
            draft = draft.reason(reason);
        }
        self.emit(draft)
    }
}

fn active_turn(state: &ArbiterState) -> Result<&str> {
    if state.phase != TurnPhase::Active {
        return Err(Error::Validation("no active turn".into()));
    }
    state
        .turn_id
        .as_deref()
        .ok_or_else(|| Error::Validation("active phase without a turn id".into()))
}
