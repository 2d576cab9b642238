use crate::outcome::ProviderOutcome;

/// Shared error type used across all Voxline crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Envelope or signal rejected by validation.  Never silently dropped;
    /// the message lists the violations.
    #[error("validation: {0}")]
    Validation(String),

    /// A sequence number regressed within its series.  Fatal to the batch
    /// being validated.
    #[error("sequence regression in {series}: {prev} -> {next}")]
    SequenceRegression {
        series: String,
        prev: u64,
        next: u64,
    },

    /// An operation observed a non-current authority epoch.
    #[error("stale authority epoch: observed {observed}, current {current}")]
    StaleAuthority { observed: u64, current: u64 },

    /// Output rejected by the cancellation fence.  Not an error in the
    /// pipeline sense — the rejection is signalled as `playback_cancelled`.
    #[error("output fenced for session {session_id} turn {turn_id}")]
    CancelFenced {
        session_id: String,
        turn_id: String,
    },

    /// Stage-A could not preserve required recording evidence.
    #[error("recording overflow: {0}")]
    RecordingOverflow(String),

    /// A provider invocation finished with a non-success normalized class.
    #[error("provider invocation {invocation_id}: {outcome}")]
    Provider {
        invocation_id: String,
        outcome: ProviderOutcome,
    },

    /// An event outside the known vocabulary, resolved by policy.
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
