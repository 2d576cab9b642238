//! Envelope and signal-family validation.
//!
//! `validate` returns every violation it finds — callers decide whether a
//! non-empty list is fatal.  `validate_sequence` enforces the ordering
//! invariant across an already-validated batch and fails the whole batch on
//! the first regression.

use vox_domain::envelope::{EventScope, Lane};
use vox_domain::signal::{emitter, ControlSignal, ControlSignalKind, SignalScope};
use vox_domain::{Envelope, Error, Event, Payload, PayloadClass, Result};

use crate::policy::ValidationPolicy;
use crate::violation::{join_violations, Violation, ViolationCode};

/// Validate one event against the envelope rules and the signal-family
/// table.  Returns all violations found; an empty vector means valid.
pub fn validate(event: &Event, policy: &ValidationPolicy) -> Vec<Violation> {
    let mut v = Vec::new();
    let env = &event.envelope;

    check_envelope_basics(env, policy, &mut v);
    check_lane_payload(event, &mut v);
    check_media_time(event, &mut v);
    check_extensions(env, &mut v);

    if let Some(signal) = event.control_signal() {
        check_signal(env, signal, policy, &mut v);
    }

    v
}

/// `validate`, collapsed into the shared error type.
pub fn validate_or_err(event: &Event, policy: &ValidationPolicy) -> Result<()> {
    let violations = validate(event, policy);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(join_violations(&violations)))
    }
}

/// Enforce sequence monotonicity across a validated batch.
///
/// `runtime_sequence` must be non-decreasing across the slice, and
/// `transport_sequence` must be non-decreasing among the events that carry
/// one.  A regression is fatal to the whole batch.
pub fn validate_sequence(events: &[Event]) -> Result<()> {
    let mut last_runtime: Option<u64> = None;
    let mut last_transport: Option<u64> = None;

    for event in events {
        let rt = event.envelope.runtime_sequence;
        if let Some(prev) = last_runtime {
            if rt < prev {
                return Err(Error::SequenceRegression {
                    series: "runtime_sequence".into(),
                    prev,
                    next: rt,
                });
            }
        }
        last_runtime = Some(rt);

        if let Some(ts) = event.envelope.transport_sequence {
            if let Some(prev) = last_transport {
                if ts < prev {
                    return Err(Error::SequenceRegression {
                        series: "transport_sequence".into(),
                        prev,
                        next: ts,
                    });
                }
            }
            last_transport = Some(ts);
        }
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Envelope checks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn check_envelope_basics(env: &Envelope, policy: &ValidationPolicy, v: &mut Vec<Violation>) {
    for (field, value) in [
        ("session_id", &env.session_id),
        ("pipeline_version", &env.pipeline_version),
        ("event_id", &env.event_id),
    ] {
        if value.is_empty() {
            v.push(Violation::new(
                field,
                ViolationCode::EmptyField,
                format!("{field} must be non-empty"),
            ));
        }
    }

    if !env.schema_version.compatible_with(&policy.current_schema) {
        v.push(Violation::new(
            "schema_version",
            ViolationCode::IncompatibleSchema,
            format!(
                "schema {} is incompatible with baseline {}",
                env.schema_version, policy.current_schema
            ),
        ));
    }

    if env.wall_clock_timestamp_ms < 0 {
        v.push(Violation::new(
            "wall_clock_timestamp_ms",
            ViolationCode::InvalidValue,
            "wall clock timestamp must be non-negative",
        ));
    }

    if env.event_scope == EventScope::Turn {
        if env.turn_id.as_deref().unwrap_or("").is_empty() {
            v.push(Violation::new(
                "turn_id",
                ViolationCode::MissingField,
                "turn-scoped events must carry turn_id",
            ));
        }
        if env.authority_epoch.is_none() {
            v.push(Violation::new(
                "authority_epoch",
                ViolationCode::MissingField,
                "turn-scoped events must carry authority_epoch",
            ));
        }
    }
}

fn check_lane_payload(event: &Event, v: &mut Vec<Violation>) {
    let env = &event.envelope;
    match (&env.lane, &event.payload) {
        (Lane::Control, Payload::Control { .. }) => {
            if env.payload_class != Some(PayloadClass::Metadata) {
                v.push(Violation::new(
                    "payload_class",
                    ViolationCode::LanePayloadMismatch,
                    "control events must be classed metadata",
                ));
            }
        }
        (Lane::Control, _) => {
            v.push(Violation::new(
                "lane",
                ViolationCode::LanePayloadMismatch,
                "control lane requires a control payload",
            ));
        }
        (_, Payload::Control { .. }) => {
            v.push(Violation::new(
                "lane",
                ViolationCode::LanePayloadMismatch,
                "control payloads must ride the control lane",
            ));
        }
        _ => {}
    }
}

fn check_media_time(event: &Event, v: &mut Vec<Violation>) {
    let is_raw_audio = event.is_audio()
        || event.envelope.payload_class == Some(PayloadClass::AudioRaw);
    let present = event
        .envelope
        .media_time
        .as_ref()
        .is_some_and(|mt| !mt.is_empty());

    if is_raw_audio && !present {
        v.push(Violation::new(
            "media_time",
            ViolationCode::MissingField,
            "raw audio events must carry media_time",
        ));
    }
    if !is_raw_audio && event.envelope.media_time.is_some() {
        v.push(Violation::new(
            "media_time",
            ViolationCode::InvalidValue,
            "media_time is only valid on raw audio events",
        ));
    }
}

fn check_extensions(env: &Envelope, v: &mut Vec<Violation>) {
    for key in env.extensions.keys() {
        if Envelope::RESERVED_KEYS.contains(&key.as_str()) {
            v.push(Violation::new(
                "extensions",
                ViolationCode::ReservedExtensionKey,
                format!("extension namespace {key:?} shadows a core envelope field"),
            ));
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Signal-family rules
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn check_signal(
    env: &Envelope,
    signal: &ControlSignal,
    policy: &ValidationPolicy,
    v: &mut Vec<Violation>,
) {
    use ControlSignalKind::*;

    if signal.emitted_by.is_empty() {
        v.push(Violation::new(
            "emitted_by",
            ViolationCode::EmptyField,
            "control signals must carry an emitter id",
        ));
    }
    if signal.scope.is_none() {
        v.push(Violation::new(
            "scope",
            ViolationCode::MissingField,
            "control signals must carry a scope (normalize before validating)",
        ));
    }

    match signal.kind {
        TurnOpenProposed => {
            require_emitter(signal, &[emitter::TURN_PROPOSER], v);
            require_scope(signal, &[SignalScope::Session], v);
        }
        TurnOpen | Commit | Abort | Close => {
            require_emitter(signal, &[emitter::ARBITER], v);
            require_scope(signal, &[SignalScope::Turn], v);
            if env.turn_id.as_deref().unwrap_or("").is_empty() {
                v.push(missing(signal.kind, "turn_id"));
            }
            if env.authority_epoch.is_none() {
                v.push(missing(signal.kind, "authority_epoch"));
            }
        }
        BargeIn => {
            require_emitter(signal, &[emitter::BARGE_IN], v);
            require_scope(signal, &[SignalScope::Turn], v);
        }
        Cancel => {
            require_emitter(signal, &[emitter::CANCEL], v);
            require_scope(
                signal,
                &[
                    SignalScope::Session,
                    SignalScope::Turn,
                    SignalScope::Node,
                    SignalScope::ProviderInvocation,
                ],
                v,
            );
            if signal.scope == Some(SignalScope::Turn)
                && env.turn_id.as_deref().unwrap_or("").is_empty()
            {
                v.push(missing(signal.kind, "turn_id"));
            }
            if signal.scope == Some(SignalScope::ProviderInvocation)
                && env.provider_invocation_id.is_none()
            {
                v.push(missing(signal.kind, "provider_invocation_id"));
            }
        }
        Admit | Reject | Defer => {
            require_emitter(
                signal,
                &[emitter::ADMISSION, emitter::CONTROL_PLANE_ADMISSION],
                v,
            );
            require_reason(signal, v);
            require_scope(signal, &[SignalScope::Session], v);
        }
        Shed => {
            require_emitter(signal, &[emitter::ADMISSION], v);
            require_reason(signal, v);
        }
        StaleEpochReject | DeauthorizedDrain => {
            require_emitter(signal, &[emitter::AUTHORITY], v);
            require_reason(signal, v);
            require_scope(signal, &[SignalScope::Session, SignalScope::Turn], v);
            if env.authority_epoch.is_none() {
                v.push(missing(signal.kind, "authority_epoch"));
            }
        }
        Degrade | Fallback | BudgetWarning | BudgetExhausted => {
            if !policy
                .policy_emitters
                .iter()
                .any(|e| e == &signal.emitted_by)
            {
                v.push(Violation::new(
                    "emitted_by",
                    ViolationCode::WrongEmitter,
                    format!(
                        "{} may only be emitted by the policy emitter catalog",
                        signal.kind
                    ),
                ));
            }
            require_reason(signal, v);
            require_scope(signal, &[SignalScope::Session, SignalScope::Turn], v);
        }
        FlowXoff | FlowXon | CreditGrant => {
            require_emitter(signal, &[emitter::FLOW], v);
            require_target_lane(signal, v);
            require_edge(env, signal.kind, v);
            if signal.kind == CreditGrant && signal.amount.unwrap_or(0) < 1 {
                v.push(Violation::new(
                    "amount",
                    ViolationCode::InvalidValue,
                    "credit_grant requires amount >= 1",
                ));
            }
        }
        DropNotice => {
            require_emitter(signal, &[emitter::SYNC_DROP], v);
            require_target_lane(signal, v);
            require_edge(env, signal.kind, v);
            match signal.seq_range {
                None => v.push(missing(signal.kind, "seq_range")),
                Some((start, end)) if start > end => v.push(Violation::new(
                    "seq_range",
                    ViolationCode::InvalidValue,
                    "seq_range start must not exceed end",
                )),
                Some(_) => {}
            }
        }
        Discontinuity => {
            require_emitter(signal, &[emitter::SYNC_DISCONTINUITY], v);
            if env.sync_domain.as_deref().unwrap_or("").is_empty() {
                v.push(missing(signal.kind, "sync_domain"));
            }
            if env.discontinuity_id.as_deref().unwrap_or("").is_empty() {
                v.push(missing(signal.kind, "discontinuity_id"));
            }
        }
        ProviderError | CircuitEvent | ProviderSwitch => {
            require_emitter(signal, &[emitter::PROVIDER], v);
        }
        LeaseIssued | LeaseRotated | MigrationStart | MigrationFinish | SessionHandoff => {
            require_emitter(signal, &[emitter::AUTHORITY], v);
        }
        Connected | Reconnecting | Disconnected | Ended | Silence | Stall => {
            require_emitter(signal, &[emitter::CONNECTION], v);
        }
        OutputAccepted | PlaybackStarted | PlaybackCompleted | PlaybackCancelled => {
            require_emitter(signal, &[emitter::OUTPUT_FENCE], v);
        }
        RecordingLevelDowngraded => {
            require_emitter(signal, &[emitter::RECORDER], v);
        }
        Watermark | Stop => {
            // No per-kind constraints beyond the generic signal checks.
        }
    }
}

fn require_emitter(signal: &ControlSignal, allowed: &[&str], v: &mut Vec<Violation>) {
    if !allowed.iter().any(|e| *e == signal.emitted_by) {
        v.push(Violation::new(
            "emitted_by",
            ViolationCode::WrongEmitter,
            format!(
                "{} must be emitted by {} (got {:?})",
                signal.kind,
                allowed.join(" or "),
                signal.emitted_by
            ),
        ));
    }
}

fn require_scope(signal: &ControlSignal, allowed: &[SignalScope], v: &mut Vec<Violation>) {
    if let Some(scope) = signal.scope {
        if !allowed.contains(&scope) {
            v.push(Violation::new(
                "scope",
                ViolationCode::ScopeMismatch,
                format!("{} is not valid at scope {scope}", signal.kind),
            ));
        }
    }
}

fn require_reason(signal: &ControlSignal, v: &mut Vec<Violation>) {
    if signal.reason.as_deref().unwrap_or("").is_empty() {
        v.push(missing(signal.kind, "reason"));
    }
}

fn require_target_lane(signal: &ControlSignal, v: &mut Vec<Violation>) {
    if signal.target_lane.is_none() {
        v.push(missing(signal.kind, "target_lane"));
    }
}

fn require_edge(env: &Envelope, kind: ControlSignalKind, v: &mut Vec<Violation>) {
    if env.edge_id.as_deref().unwrap_or("").is_empty() {
        v.push(missing(kind, "edge_id"));
    }
}

fn missing(kind: ControlSignalKind, field: &str) -> Violation {
    Violation::new(
        field,
        ViolationCode::MissingField,
        format!("{kind} requires {field}"),
    )
}
