//! The output fence: post-cancel and stale-authority egress rejection.
//!
//! Every output attempt passes here before egress encoding.  The fence is
//! strict: outputs generated before a cancel but arriving after it are
//! rejected and marked `late_after_cancel` for diagnostics.

use std::sync::Arc;

use vox_abi::{IdentitySource, SignalDraft, SignalEmitter};
use vox_domain::signal::{emitter, ControlSignalKind};
use vox_domain::trace::TraceEvent;
use vox_domain::{Event, Result};
use vox_recorder::StageA;

use crate::authority::AuthorityService;
use crate::fence::FenceMap;
use crate::identity::SessionIdentity;

/// One output attempt against a turn.
#[derive(Debug, Clone)]
pub struct OutputAttempt {
    pub turn_id: String,
    /// Epoch the producing stage was operating under, when it carried one.
    pub observed_epoch: Option<u64>,
    /// The attempt itself carries an accepted cancel (e.g. a provider
    /// acknowledged mid-flight cancellation); the fence sets before the
    /// decision.
    pub cancel_accepted: bool,
    /// The output was generated before the fence set but arrived after.
    pub generated_pre_fence: bool,
}

impl OutputAttempt {
    pub fn for_turn(turn_id: impl Into<String>) -> Self {
        OutputAttempt {
            turn_id: turn_id.into(),
            observed_epoch: None,
            cancel_accepted: false,
            generated_pre_fence: false,
        }
    }
}

/// The fence's verdict, with the signal it emitted.
#[derive(Debug, Clone)]
pub struct OutputDecision {
    pub accepted: bool,
    pub signal: Event,
    pub reason: Option<String>,
}

/// Per-session output fence (emitter identity `RK-22`).
pub struct OutputFence {
    session_id: String,
    emitter: Arc<SignalEmitter>,
    ids: Arc<SessionIdentity>,
    fence: Arc<FenceMap>,
    authority: Arc<AuthorityService>,
    stage_a: Arc<StageA>,
}

impl OutputFence {
    pub fn new(
        session_id: impl Into<String>,
        emitter: Arc<SignalEmitter>,
        ids: Arc<SessionIdentity>,
        fence: Arc<FenceMap>,
        authority: Arc<AuthorityService>,
        stage_a: Arc<StageA>,
    ) -> Self {
        OutputFence {
            session_id: session_id.into(),
            emitter,
            ids,
            fence,
            authority,
            stage_a,
        }
    }

    /// Evaluate one output attempt.
    ///
    /// Order is load-bearing: authority first (a stale producer must not
    /// even reach the fence), then fence acceptance carried on the attempt,
    /// then the fence verdict.
    pub fn evaluate(&self, attempt: &OutputAttempt) -> Result<OutputDecision> {
        let epoch = self.effective_epoch(attempt);

        if let Some(observed) = attempt.observed_epoch {
            if self.authority.validate(&self.session_id, observed).is_err() {
                let mut draft =
                    SignalDraft::new(ControlSignalKind::StaleEpochReject, emitter::AUTHORITY)
                        .reason("stale_output_epoch")
                        .turn(&attempt.turn_id, observed);
                draft.authority_epoch = Some(observed);
                let signal = self.emitter.emit(draft, self.ids.as_ref())?;
                TraceEvent::OutputRejected {
                    session_id: self.session_id.clone(),
                    turn_id: Some(attempt.turn_id.clone()),
                    reason: "stale_output_epoch".into(),
                    late_after_cancel: false,
                }
                .emit();
                return Ok(OutputDecision {
                    accepted: false,
                    signal,
                    reason: Some("stale_output_epoch".into()),
                });
            }
        }

        if attempt.cancel_accepted {
            self.fence.accept(&self.session_id, &attempt.turn_id);
        }

        if self.fence.is_fenced(&self.session_id, &attempt.turn_id) {
            let mut signal = self.emitter.emit(
                SignalDraft::new(ControlSignalKind::PlaybackCancelled, emitter::OUTPUT_FENCE)
                    .reason("cancel_fence_applied")
                    .turn(&attempt.turn_id, epoch),
                self.ids.as_ref(),
            )?;
            if attempt.generated_pre_fence {
                signal.envelope.late_after_cancel = true;
            }
            TraceEvent::OutputRejected {
                session_id: self.session_id.clone(),
                turn_id: Some(attempt.turn_id.clone()),
                reason: "cancel_fence_applied".into(),
                late_after_cancel: attempt.generated_pre_fence,
            }
            .emit();
            return Ok(OutputDecision {
                accepted: false,
                signal,
                reason: Some("cancel_fence_applied".into()),
            });
        }

        let signal = self.emitter.emit(
            SignalDraft::new(ControlSignalKind::OutputAccepted, emitter::OUTPUT_FENCE)
                .turn(&attempt.turn_id, epoch),
            self.ids.as_ref(),
        )?;
        self.stage_a.note_first_output(
            &self.session_id,
            &attempt.turn_id,
            self.ids.wall_now_ms(),
        );
        Ok(OutputDecision {
            accepted: true,
            signal,
            reason: None,
        })
    }

    /// Playback lifecycle markers, fenced the same way outputs are: no
    /// `playback_started` ever follows an accepted cancel.
    pub fn playback_started(&self, turn_id: &str) -> Result<Option<Event>> {
        if self.fence.is_fenced(&self.session_id, turn_id) {
            return Ok(None);
        }
        let epoch = self
            .authority
            .current(&self.session_id)
            .unwrap_or_default();
        let event = self.emitter.emit(
            SignalDraft::new(ControlSignalKind::PlaybackStarted, emitter::OUTPUT_FENCE)
                .turn(turn_id, epoch),
            self.ids.as_ref(),
        )?;
        Ok(Some(event))
    }

    pub fn playback_completed(&self, turn_id: &str) -> Result<Option<Event>> {
        if self.fence.is_fenced(&self.session_id, turn_id) {
            return Ok(None);
        }
        let epoch = self
            .authority
            .current(&self.session_id)
            .unwrap_or_default();
        let event = self.emitter.emit(
            SignalDraft::new(ControlSignalKind::PlaybackCompleted, emitter::OUTPUT_FENCE)
                .turn(turn_id, epoch),
            self.ids.as_ref(),
        )?;
        Ok(Some(event))
    }

    fn effective_epoch(&self, attempt: &OutputAttempt) -> u64 {
        attempt
            .observed_epoch
            .or_else(|| self.authority.current(&self.session_id))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vox_abi::ValidationPolicy;
    use vox_recorder::RecorderConfig;

    struct Fixture {
        output: OutputFence,
        fence: Arc<FenceMap>,
        authority: Arc<AuthorityService>,
    }

    fn fixture() -> Fixture {
        let emitter = Arc::new(SignalEmitter::new(
            "s1",
            "p1",
            ValidationPolicy::default(),
        ));
        let ids = Arc::new(SessionIdentity::new("s1"));
        let fence = Arc::new(FenceMap::new());
        let authority = Arc::new(AuthorityService::new());
        authority.issue_lease("s1");
        let stage_a = Arc::new(StageA::new(RecorderConfig::default()));
        Fixture {
            output: OutputFence::new(
                "s1",
                emitter,
                ids,
                fence.clone(),
                authority.clone(),
                stage_a,
            ),
            fence,
            authority,
        }
    }

    #[test]
    fn unfenced_output_is_accepted() {
        let f = fixture();
        let decision = f
            .output
            .evaluate(&OutputAttempt::for_turn("t1"))
            .unwrap();
        assert!(decision.accepted);
        assert_eq!(
            decision.signal.control_signal().unwrap().kind,
            ControlSignalKind::OutputAccepted
        );
        assert!(decision.reason.is_none());
    }

    #[test]
    fn fenced_output_is_rejected_with_reason() {
        let f = fixture();
        f.fence.accept("s1", "t1");

        let decision = f
            .output
            .evaluate(&OutputAttempt::for_turn("t1"))
            .unwrap();
        assert!(!decision.accepted);
        let signal = decision.signal.control_signal().unwrap();
        assert_eq!(signal.kind, ControlSignalKind::PlaybackCancelled);
        assert_eq!(signal.reason.as_deref(), Some("cancel_fence_applied"));
    }

    #[test]
    fn attempt_carrying_cancel_sets_the_fence_first() {
        let f = fixture();
        let mut attempt = OutputAttempt::for_turn("t1");
        attempt.cancel_accepted = true;

        let decision = f.output.evaluate(&attempt).unwrap();
        assert!(!decision.accepted);
        assert!(f.fence.is_fenced("s1", "t1"));

        // Every later attempt stays rejected.
        let decision = f
            .output
            .evaluate(&OutputAttempt::for_turn("t1"))
            .unwrap();
        assert!(!decision.accepted);
    }

    #[test]
    fn late_output_is_marked_for_diagnostics() {
        let f = fixture();
        f.fence.accept("s1", "t1");

        let mut attempt = OutputAttempt::for_turn("t1");
        attempt.generated_pre_fence = true;
        let decision = f.output.evaluate(&attempt).unwrap();
        assert!(!decision.accepted);
        assert!(decision.signal.envelope.late_after_cancel);
    }

    #[test]
    fn stale_epoch_is_rejected_before_the_fence() {
        let f = fixture();
        f.authority.issue_lease("s1"); // now at epoch 2

        let mut attempt = OutputAttempt::for_turn("t1");
        attempt.observed_epoch = Some(1);
        let decision = f.output.evaluate(&attempt).unwrap();
        assert!(!decision.accepted);
        assert_eq!(
            decision.signal.control_signal().unwrap().kind,
            ControlSignalKind::StaleEpochReject
        );
        assert_eq!(decision.reason.as_deref(), Some("stale_output_epoch"));
    }

    #[test]
    fn current_epoch_passes_the_authority_check() {
        let f = fixture();
        let mut attempt = OutputAttempt::for_turn("t1");
        attempt.observed_epoch = Some(1);
        assert!(f.output.evaluate(&attempt).unwrap().accepted);
    }

    #[test]
    fn playback_markers_are_fenced() {
        let f = fixture();
        assert!(f.output.playback_started("t1").unwrap().is_some());
        f.fence.accept("s1", "t1");
        assert!(f.output.playback_started("t1").unwrap().is_none());
        assert!(f.output.playback_completed("t1").unwrap().is_none());
    }
}
