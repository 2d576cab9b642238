//! Transport and external-node contracts.
//!
//! Concrete transports (WebRTC rooms, websockets) and provider runtimes
//! live outside the core; this crate defines the boundary they speak:
//! the raw [`TransportFrame`], codec gating, the [`RuntimeAdapter`] and
//! [`ExternalNodeRuntime`] traits, and capability snapshots applied at
//! turn boundaries.

pub mod contract;
pub mod frame;

pub use contract::{
    CancelFlag, CapabilitySnapshot, ExternalNodeRuntime, InvocationOutcome, InvokeContext,
    RuntimeAdapter,
};
pub use frame::{CodecPlan, SourceCodec, TransportFrame};
