//! The Voxline session runtime — the deterministic control core that sits
//! between transports and external model providers.
//!
//! Everything here is per-session and non-suspending: validation, fences,
//! and arbiter transitions run to completion per event.  Sessions run in
//! parallel; within a session a single logical writer owns the sequence
//! series and modules hand immutable events across bounded queues.

pub mod admission;
pub mod arbiter;
pub mod authority;
pub mod determinism;
pub mod fence;
pub mod flow;
pub mod identity;
pub mod ingress;
pub mod lanes;
pub mod output;
pub mod pipeline;
pub mod plan;
pub mod sync;
pub mod timebase;

pub use admission::{AdmissionConfig, AdmissionController, AdmissionDecision};
pub use arbiter::{TurnArbiter, TurnPhase};
pub use authority::AuthorityService;
pub use determinism::{issue_context, DeterminismContext};
pub use fence::FenceMap;
pub use flow::{FlowConfig, FlowController, FlowMode};
pub use identity::SessionIdentity;
pub use ingress::{IngressConfig, IngressNormalizer};
pub use lanes::{LaneRouter, PushOutcome};
pub use output::{OutputAttempt, OutputDecision, OutputFence};
pub use pipeline::{PipelineConfig, SessionPipeline};
pub use plan::{AdaptiveAction, PlanError, ResolvedTurnPlan, SnapshotBundle, SnapshotRef};
pub use sync::SyncEngine;
pub use timebase::{Observation, Projection, Timebase};
