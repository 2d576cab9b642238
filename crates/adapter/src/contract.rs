//! Runtime and external-node contracts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use vox_domain::outcome::ProviderOutcome;
use vox_domain::stream::BoxStream;
use vox_domain::{Event, Result};

use crate::frame::{CodecPlan, TransportFrame};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cancellation flag
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One-way cancellation flag carried across the node boundary.
///
/// The fence sets it when a cancel is accepted; node runtimes poll it (or
/// select on their own machinery keyed off it) to stop in-flight work.
#[derive(Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        CancelFlag {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Signal cancellation.  Monotonic — there is no reset.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Capability snapshot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What a transport can do right now.  Snapshots are frozen into the turn
/// plan and applied at turn boundaries only — mid-turn capability changes
/// never affect a running turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySnapshot {
    pub transport: String,
    pub codecs: Vec<String>,
    pub max_frame_bytes: usize,
    pub supports_barge_in: bool,
    pub captured_at_ms: i64,
}

impl CapabilitySnapshot {
    pub fn captured_now(transport: impl Into<String>) -> Self {
        CapabilitySnapshot {
            transport: transport.into(),
            codecs: Vec::new(),
            max_frame_bytes: 0,
            supports_barge_in: false,
            captured_at_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Contracts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Transport boundary contract.  Implementations translate between the
/// transport's native framing and the core event ABI.
pub trait RuntimeAdapter: Send + Sync {
    /// Decode and pre-validate an inbound frame.
    fn normalize_ingress(&self, frame: TransportFrame) -> Result<Event>;

    /// Encode an outbound event for the transport.
    fn encode_egress(&self, event: &Event, plan: &CodecPlan) -> Result<TransportFrame>;

    /// The transport's current capabilities.
    fn capability_snapshot(&self) -> CapabilitySnapshot;
}

/// Context for one external-node invocation.
#[derive(Clone)]
pub struct InvokeContext {
    pub session_id: String,
    pub turn_id: String,
    pub invocation_id: String,
    /// Epoch the invocation was launched under; carried on every event.
    pub authority_epoch: u64,
    pub cancel: CancelFlag,
}

/// Outcome of one invocation, normalized to the shared class set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationOutcome {
    pub invocation_id: String,
    pub outcome: ProviderOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// External node boundary (ASR, LLM, TTS, custom stages).
///
/// Nodes speak the same event ABI: they consume a stream of events and
/// produce a stream of events, every one carrying the launch epoch.
/// Cancellation propagates through the context flag.
#[async_trait::async_trait]
pub trait ExternalNodeRuntime: Send + Sync {
    /// A stable identifier for this node implementation.
    fn node_id(&self) -> &str;

    /// Run one invocation.  Implementations must return (not hang) once
    /// `ctx.cancel` is set, and must map their native result into
    /// [`InvocationOutcome`].
    async fn invoke(
        &self,
        ctx: InvokeContext,
        input: BoxStream<'static, Event>,
    ) -> Result<(BoxStream<'static, Event>, InvocationOutcome)>;
}
