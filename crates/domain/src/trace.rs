use serde::Serialize;

/// Structured trace events emitted across all Voxline crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SignalEmitted {
        kind: String,
        emitted_by: String,
        session_id: String,
        turn_id: Option<String>,
    },
    TurnOpened {
        session_id: String,
        turn_id: String,
        plan_hash: String,
        authority_epoch: u64,
    },
    TurnClosed {
        session_id: String,
        turn_id: String,
        outcome: String,
    },
    TurnRejectedPreOpen {
        session_id: String,
        reason: String,
    },
    FenceApplied {
        session_id: String,
        turn_id: String,
    },
    OutputRejected {
        session_id: String,
        turn_id: Option<String>,
        reason: String,
        late_after_cancel: bool,
    },
    EpochRotated {
        session_id: String,
        epoch: u64,
    },
    FrameRejected {
        session_id: String,
        reason: String,
    },
    UnknownEventResolved {
        session_id: String,
        decision: String,
        digest: String,
    },
    RecordingDowngraded {
        from_level: String,
        to_level: String,
    },
    ArtifactExported {
        address: String,
        bytes: usize,
    },
    ExportFailed {
        address: String,
        error: String,
    },
    TimebaseRebased {
        session_id: String,
        skew_ms: i64,
    },
    FlowTransition {
        edge_id: String,
        signal: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "vox_event");
    }
}
