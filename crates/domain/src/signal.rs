//! Control-signal vocabulary.
//!
//! Control signals ride the preemptive Control lane with
//! `payload_class = metadata`.  The vocabulary is strict and partitioned
//! into families; validation enforces per-signal emitter, field, and scope
//! rules (see `vox-abi`).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::envelope::Lane;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Emitter module ids
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Stable module ids stamped into `emitted_by`.  Implementations may
/// colocate several modules in one process but must preserve these
/// identities in emitted signals.
pub mod emitter {
    /// Connection tracker.
    pub const CONNECTION: &str = "RK-01";
    /// Turn proposer (upstream of the arbiter).
    pub const TURN_PROPOSER: &str = "RK-02";
    /// Turn arbiter.
    pub const ARBITER: &str = "RK-03";
    /// Barge-in detector.
    pub const BARGE_IN: &str = "RK-06";
    /// Provider supervisor.
    pub const PROVIDER: &str = "RK-08";
    /// Sync engine, drop path.
    pub const SYNC_DROP: &str = "RK-12";
    /// Flow-control controller.
    pub const FLOW: &str = "RK-14";
    /// Sync engine, discontinuity path.
    pub const SYNC_DISCONTINUITY: &str = "RK-15";
    /// Cancellation intake.
    pub const CANCEL: &str = "RK-16";
    /// Output fence.
    pub const OUTPUT_FENCE: &str = "RK-22";
    /// Authority service.
    pub const AUTHORITY: &str = "RK-24";
    /// Admission controller.
    pub const ADMISSION: &str = "RK-25";
    /// Timeline recorder.
    pub const RECORDER: &str = "RK-30";
    /// Control-plane admission (remote).
    pub const CONTROL_PLANE_ADMISSION: &str = "CP-05";
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Signal kinds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The family a control signal belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalFamily {
    Lifecycle,
    Interruption,
    Pressure,
    Integrity,
    Provider,
    Authority,
    Admission,
    Connection,
    Output,
    Replay,
}

/// The full control-signal vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlSignalKind {
    // Turn lifecycle
    TurnOpenProposed,
    TurnOpen,
    Commit,
    Abort,
    Close,

    // Interruption
    BargeIn,
    Stop,
    Cancel,

    // Pressure / flow
    Watermark,
    BudgetWarning,
    BudgetExhausted,
    Degrade,
    Fallback,
    FlowXoff,
    FlowXon,
    CreditGrant,

    // Integrity
    DropNotice,
    Discontinuity,

    // Provider
    ProviderError,
    CircuitEvent,
    ProviderSwitch,

    // Authority
    LeaseIssued,
    LeaseRotated,
    MigrationStart,
    MigrationFinish,
    SessionHandoff,
    StaleEpochReject,
    DeauthorizedDrain,

    // Admission
    Admit,
    Reject,
    Defer,
    Shed,

    // Connection
    Connected,
    Reconnecting,
    Disconnected,
    Ended,
    Silence,
    Stall,

    // Output
    OutputAccepted,
    PlaybackStarted,
    PlaybackCompleted,
    PlaybackCancelled,

    // Replay
    RecordingLevelDowngraded,
}

impl ControlSignalKind {
    pub fn family(self) -> SignalFamily {
        use ControlSignalKind::*;
        match self {
            TurnOpenProposed | TurnOpen | Commit | Abort | Close => SignalFamily::Lifecycle,
            BargeIn | Stop | Cancel => SignalFamily::Interruption,
            Watermark | BudgetWarning | BudgetExhausted | Degrade | Fallback | FlowXoff
            | FlowXon | CreditGrant => SignalFamily::Pressure,
            DropNotice | Discontinuity => SignalFamily::Integrity,
            ProviderError | CircuitEvent | ProviderSwitch => SignalFamily::Provider,
            LeaseIssued | LeaseRotated | MigrationStart | MigrationFinish | SessionHandoff
            | StaleEpochReject | DeauthorizedDrain => SignalFamily::Authority,
            Admit | Reject | Defer | Shed => SignalFamily::Admission,
            Connected | Reconnecting | Disconnected | Ended | Silence | Stall => {
                SignalFamily::Connection
            }
            OutputAccepted | PlaybackStarted | PlaybackCompleted | PlaybackCancelled => {
                SignalFamily::Output
            }
            RecordingLevelDowngraded => SignalFamily::Replay,
        }
    }

    /// The stable wire name (matches the serde rename).
    pub fn wire_name(self) -> &'static str {
        use ControlSignalKind::*;
        match self {
            TurnOpenProposed => "turn_open_proposed",
            TurnOpen => "turn_open",
            Commit => "commit",
            Abort => "abort",
            Close => "close",
            BargeIn => "barge_in",
            Stop => "stop",
            Cancel => "cancel",
            Watermark => "watermark",
            BudgetWarning => "budget_warning",
            BudgetExhausted => "budget_exhausted",
            Degrade => "degrade",
            Fallback => "fallback",
            FlowXoff => "flow_xoff",
            FlowXon => "flow_xon",
            CreditGrant => "credit_grant",
            DropNotice => "drop_notice",
            Discontinuity => "discontinuity",
            ProviderError => "provider_error",
            CircuitEvent => "circuit_event",
            ProviderSwitch => "provider_switch",
            LeaseIssued => "lease_issued",
            LeaseRotated => "lease_rotated",
            MigrationStart => "migration_start",
            MigrationFinish => "migration_finish",
            SessionHandoff => "session_handoff",
            StaleEpochReject => "stale_epoch_reject",
            DeauthorizedDrain => "deauthorized_drain",
            Admit => "admit",
            Reject => "reject",
            Defer => "defer",
            Shed => "shed",
            Connected => "connected",
            Reconnecting => "reconnecting",
            Disconnected => "disconnected",
            Ended => "ended",
            Silence => "silence",
            Stall => "stall",
            OutputAccepted => "output_accepted",
            PlaybackStarted => "playback_started",
            PlaybackCompleted => "playback_completed",
            PlaybackCancelled => "playback_cancelled",
            RecordingLevelDowngraded => "recording_level_downgraded",
        }
    }
}

impl fmt::Display for ControlSignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Signal scope and body
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What a control signal applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalScope {
    Session,
    Turn,
    Node,
    ProviderInvocation,
    Edge,
}

impl fmt::Display for SignalScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalScope::Session => "session",
            SignalScope::Turn => "turn",
            SignalScope::Node => "node",
            SignalScope::ProviderInvocation => "provider_invocation",
            SignalScope::Edge => "edge",
        };
        f.write_str(s)
    }
}

/// A control signal — the body of a `Payload::Control` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlSignal {
    pub kind: ControlSignalKind,
    /// Stable module id of the emitter (e.g. `RK-03`).
    pub emitted_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<SignalScope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_lane: Option<Lane>,
    /// Inclusive `[start, end]` sequence range, for drop notices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq_range: Option<(u64, u64)>,
    /// Credit amount, for `credit_grant`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<u64>,
}

impl ControlSignal {
    /// A bare signal with only kind and emitter; the emission engine fills
    /// in scope and the envelope bookkeeping.
    pub fn new(kind: ControlSignalKind, emitted_by: impl Into<String>) -> Self {
        ControlSignal {
            kind,
            emitted_by: emitted_by.into(),
            reason: None,
            scope: None,
            target_lane: None,
            seq_range: None,
            amount: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_scope(mut self, scope: SignalScope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_target_lane(mut self, lane: Lane) -> Self {
        self.target_lane = Some(lane);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_match_serde() {
        for kind in [
            ControlSignalKind::TurnOpenProposed,
            ControlSignalKind::FlowXoff,
            ControlSignalKind::StaleEpochReject,
            ControlSignalKind::RecordingLevelDowngraded,
        ] {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json.as_str().unwrap(), kind.wire_name());
        }
    }

    #[test]
    fn families_partition_the_vocabulary() {
        assert_eq!(
            ControlSignalKind::Cancel.family(),
            SignalFamily::Interruption
        );
        assert_eq!(
            ControlSignalKind::CreditGrant.family(),
            SignalFamily::Pressure
        );
        assert_eq!(
            ControlSignalKind::DeauthorizedDrain.family(),
            SignalFamily::Authority
        );
        assert_eq!(ControlSignalKind::Shed.family(), SignalFamily::Admission);
        assert_eq!(
            ControlSignalKind::PlaybackCancelled.family(),
            SignalFamily::Output
        );
    }

    #[test]
    fn builder_fills_optionals() {
        let sig = ControlSignal::new(ControlSignalKind::FlowXoff, emitter::FLOW)
            .with_reason("backpressure_asserted")
            .with_scope(SignalScope::Edge)
            .with_target_lane(Lane::Data);
        assert_eq!(sig.emitted_by, "RK-14");
        assert_eq!(sig.reason.as_deref(), Some("backpressure_asserted"));
        assert_eq!(sig.target_lane, Some(Lane::Data));
    }
}
