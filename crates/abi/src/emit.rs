//! Control-signal emission engine.
//!
//! Modules never hand-build control events.  They submit a partial
//! [`SignalDraft`]; the engine fills the envelope bookkeeping (schema
//! version, scope, event id, sequences, timestamps), normalizes, validates
//! against the signal-family rules, and records the emission.

use vox_domain::envelope::{EventScope, Lane};
use vox_domain::signal::{ControlSignal, ControlSignalKind, SignalScope};
use vox_domain::trace::TraceEvent;
use vox_domain::{Envelope, Event, Payload, PayloadClass, Result};

use crate::normalize::normalize;
use crate::policy::ValidationPolicy;
use crate::validate::validate_or_err;

/// Source of event identity and time for a session's single logical writer.
/// The runtime implements this with the session's id issuer and sequence
/// allocator; tests stub it.
pub trait IdentitySource: Send + Sync {
    fn next_event_id(&self) -> String;
    fn next_runtime_sequence(&self) -> u64;
    fn runtime_now_ms(&self) -> u64;
    fn wall_now_ms(&self) -> i64;
}

/// A partial control signal submitted by a module.
#[derive(Debug, Clone, Default)]
pub struct SignalDraft {
    pub kind: Option<ControlSignalKind>,
    pub emitted_by: String,
    pub reason: Option<String>,
    pub scope: Option<SignalScope>,
    pub target_lane: Option<Lane>,
    pub seq_range: Option<(u64, u64)>,
    pub amount: Option<u64>,
    pub turn_id: Option<String>,
    pub authority_epoch: Option<u64>,
    pub node_id: Option<String>,
    pub edge_id: Option<String>,
    pub provider_invocation_id: Option<String>,
    pub sync_id: Option<String>,
    pub sync_domain: Option<String>,
    pub discontinuity_id: Option<String>,
    pub causal_parent_id: Option<String>,
}

impl SignalDraft {
    pub fn new(kind: ControlSignalKind, emitted_by: impl Into<String>) -> Self {
        SignalDraft {
            kind: Some(kind),
            emitted_by: emitted_by.into(),
            ..SignalDraft::default()
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn scope(mut self, scope: SignalScope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn turn(mut self, turn_id: impl Into<String>, authority_epoch: u64) -> Self {
        self.turn_id = Some(turn_id.into());
        self.authority_epoch = Some(authority_epoch);
        self
    }

    pub fn target_lane(mut self, lane: Lane) -> Self {
        self.target_lane = Some(lane);
        self
    }

    pub fn edge(mut self, edge_id: impl Into<String>) -> Self {
        self.edge_id = Some(edge_id.into());
        self
    }

    pub fn seq_range(mut self, start: u64, end: u64) -> Self {
        self.seq_range = Some((start, end));
        self
    }

    pub fn amount(mut self, amount: u64) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn sync(mut self, domain: impl Into<String>, discontinuity_id: impl Into<String>) -> Self {
        self.sync_domain = Some(domain.into());
        self.discontinuity_id = Some(discontinuity_id.into());
        self
    }
}

/// Per-session emission engine.
pub struct SignalEmitter {
    session_id: String,
    pipeline_version: String,
    policy: ValidationPolicy,
}

impl SignalEmitter {
    pub fn new(
        session_id: impl Into<String>,
        pipeline_version: impl Into<String>,
        policy: ValidationPolicy,
    ) -> Self {
        SignalEmitter {
            session_id: session_id.into(),
            pipeline_version: pipeline_version.into(),
            policy,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn policy(&self) -> &ValidationPolicy {
        &self.policy
    }

    /// Normalize, validate, and materialize a draft into a control event.
    pub fn emit(&self, draft: SignalDraft, ids: &dyn IdentitySource) -> Result<Event> {
        let kind = draft
            .kind
            .ok_or_else(|| vox_domain::Error::Validation("signal draft missing kind".into()))?;

        let mut envelope = Envelope::session_scoped(&self.session_id);
        envelope.pipeline_version = self.pipeline_version.clone();
        envelope.event_id = ids.next_event_id();
        envelope.runtime_sequence = ids.next_runtime_sequence();
        envelope.runtime_timestamp_ms = ids.runtime_now_ms();
        envelope.wall_clock_timestamp_ms = ids.wall_now_ms();
        envelope.lane = Lane::Control;
        envelope.payload_class = Some(PayloadClass::Metadata);
        envelope.event_scope = if draft.turn_id.is_some() {
            EventScope::Turn
        } else {
            EventScope::Session
        };
        envelope.turn_id = draft.turn_id;
        envelope.authority_epoch = draft.authority_epoch;
        envelope.node_id = draft.node_id;
        envelope.edge_id = draft.edge_id;
        envelope.provider_invocation_id = draft.provider_invocation_id;
        envelope.sync_id = draft.sync_id;
        envelope.sync_domain = draft.sync_domain;
        envelope.discontinuity_id = draft.discontinuity_id;
        envelope.causal_parent_id = draft.causal_parent_id;

        let signal = ControlSignal {
            kind,
            emitted_by: draft.emitted_by,
            reason: draft.reason,
            scope: draft.scope,
            target_lane: draft.target_lane,
            seq_range: draft.seq_range,
            amount: draft.amount,
        };

        let mut events = vec![Event::new(envelope, Payload::Control { signal })];
        normalize(&mut events, &self.policy, false);
        let event = events.remove(0);
        validate_or_err(&event, &self.policy)?;

        TraceEvent::SignalEmitted {
            kind: kind.wire_name().to_owned(),
            emitted_by: event
                .control_signal()
                .map(|s| s.emitted_by.clone())
                .unwrap_or_default(),
            session_id: self.session_id.clone(),
            turn_id: event.envelope.turn_id.clone(),
        }
        .emit();

        Ok(event)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::FixedIdentity;
    use super::*;
    use vox_domain::signal::emitter;

    fn engine() -> SignalEmitter {
        SignalEmitter::new("s1", "pipeline-v7", ValidationPolicy::default())
    }

    #[test]
    fn emit_fills_envelope_bookkeeping() {
        let ids = FixedIdentity::new();
        let event = engine()
            .emit(
                SignalDraft::new(ControlSignalKind::Connected, emitter::CONNECTION),
                &ids,
            )
            .unwrap();

        assert_eq!(event.envelope.event_id, "ev-1");
        assert_eq!(event.envelope.runtime_sequence, 1);
        assert_eq!(event.envelope.lane, Lane::Control);
        assert_eq!(event.envelope.payload_class, Some(PayloadClass::Metadata));
        // Scope was normalized from the session event scope.
        assert_eq!(
            event.control_signal().unwrap().scope,
            Some(SignalScope::Session)
        );
    }

    #[test]
    fn turn_draft_produces_turn_scoped_event() {
        let ids = FixedIdentity::new();
        let event = engine()
            .emit(
                SignalDraft::new(ControlSignalKind::TurnOpen, emitter::ARBITER).turn("t1", 4),
                &ids,
            )
            .unwrap();
        assert_eq!(event.envelope.event_scope, EventScope::Turn);
        assert_eq!(event.envelope.turn_id.as_deref(), Some("t1"));
        assert_eq!(event.envelope.authority_epoch, Some(4));
        assert_eq!(
            event.control_signal().unwrap().scope,
            Some(SignalScope::Turn)
        );
    }

    #[test]
    fn invalid_drafts_are_rejected_not_emitted() {
        let ids = FixedIdentity::new();
        // turn_open without a turn id fails the family rules.
        let err = engine().emit(
            SignalDraft::new(ControlSignalKind::TurnOpen, emitter::ARBITER),
            &ids,
        );
        assert!(err.is_err());

        // credit_grant without amount fails.
        let err = engine().emit(
            SignalDraft::new(ControlSignalKind::CreditGrant, emitter::FLOW)
                .target_lane(Lane::Data)
                .edge("edge-1"),
            &ids,
        );
        assert!(err.is_err());
    }

    #[test]
    fn sequences_advance_per_emission() {
        let ids = FixedIdentity::new();
        let eng = engine();
        let a = eng
            .emit(
                SignalDraft::new(ControlSignalKind::Connected, emitter::CONNECTION),
                &ids,
            )
            .unwrap();
        let b = eng
            .emit(
                SignalDraft::new(ControlSignalKind::Silence, emitter::CONNECTION),
                &ids,
            )
            .unwrap();
        assert!(b.envelope.runtime_sequence > a.envelope.runtime_sequence);
    }
}
