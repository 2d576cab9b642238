//! Recorded evidence types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use vox_domain::outcome::TerminalOutcome;
use vox_domain::{Envelope, PayloadClass};

/// Lifecycle timestamps captured for a turn (wall-clock milliseconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TurnTimestamps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_open_proposed_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_open_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_output_ms: Option<i64>,
}

/// One baseline record per accepted turn.  This is the evidence replay
/// needs; it must survive any recording-level downgrade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineEvidence {
    pub session_id: String,
    pub turn_id: String,
    /// Snapshot of the `turn_open` envelope.
    pub envelope: Envelope,
    /// Payload classes observed on the turn's data path.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload_tags: Vec<PayloadClass>,
    /// Redaction decisions applied before recording, keyed by field.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub redactions: BTreeMap<String, String>,
    pub plan_hash: String,
    /// Named refs to each snapshot frozen into the plan.
    pub snapshot_provenance: BTreeMap<String, String>,
    pub determinism_seed: u64,
    pub ordering_markers: Vec<String>,
    pub merge_rule_id: String,
    pub merge_rule_version: u32,
    pub authority_epoch: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal: Option<TerminalOutcome>,
    #[serde(default)]
    pub close_emitted: bool,
    #[serde(default)]
    pub timestamps: TurnTimestamps,
}

impl BaselineEvidence {
    /// Finalized records have a terminal outcome and an emitted close; only
    /// those are eligible for Stage-B export.
    pub fn is_finalized(&self) -> bool {
        self.terminal.is_some() && self.close_emitted
    }
}

/// Decision captured in a trace artifact (and compared during replay).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDecision {
    /// What kind of decision this was (e.g. "output", "terminal", "admission").
    pub kind: String,
    /// The decision outcome (e.g. "accepted", "abort").
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A detail record — everything that is not baseline evidence.  Detail is
/// best-effort and sheds first under pressure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailRecord {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
    pub runtime_sequence: u64,
    /// One-line summary (always present, even at summary level).
    pub summary: String,
    /// Full event body; retained only at recording level L2.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full: Option<serde_json::Value>,
}
