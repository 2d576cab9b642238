//! Normalized provider outcomes, turn abort reasons, and terminal outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Normalized outcome class for a provider invocation or external node call.
/// Every provider adapter must map its native result into this set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderOutcome {
    Success,
    Timeout,
    OverloadOrRateLimit,
    SafetyOrPolicyBlock,
    InfraDisconnect,
    Cancelled,
}

impl fmt::Display for ProviderOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProviderOutcome::Success => "success",
            ProviderOutcome::Timeout => "timeout",
            ProviderOutcome::OverloadOrRateLimit => "overload_or_rate_limit",
            ProviderOutcome::SafetyOrPolicyBlock => "safety_or_policy_block",
            ProviderOutcome::InfraDisconnect => "infra_disconnect",
            ProviderOutcome::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Stable reasons an accepted turn can abort.  Every abort carries one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    Cancelled,
    DeauthorizedDrain,
    TransportDisconnectOrStall,
    RecordingEvidenceUnavailable,
    ProviderFailed,
    Internal,
}

impl AbortReason {
    pub fn as_str(self) -> &'static str {
        match self {
            AbortReason::Cancelled => "cancelled",
            AbortReason::DeauthorizedDrain => "deauthorized_drain",
            AbortReason::TransportDisconnectOrStall => "transport_disconnect_or_stall",
            AbortReason::RecordingEvidenceUnavailable => "recording_evidence_unavailable",
            AbortReason::ProviderFailed => "provider_failed",
            AbortReason::Internal => "internal",
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single terminal outcome of an accepted turn: commit XOR abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TerminalOutcome {
    Commit,
    Abort { reason: AbortReason },
}

impl TerminalOutcome {
    pub fn is_commit(self) -> bool {
        matches!(self, TerminalOutcome::Commit)
    }
}
