//! Shared domain types for the Voxline control core.
//!
//! Everything that crosses a stage boundary is expressed here: the canonical
//! event envelope, the payload taxonomy, the control-signal vocabulary, the
//! shared error type, and the structured trace events the whole workspace
//! logs through.

pub mod envelope;
pub mod error;
pub mod event;
pub mod outcome;
pub mod payload;
pub mod signal;
pub mod stream;
pub mod trace;

pub use envelope::{Envelope, EventScope, Lane, MediaTime, SchemaVersion};
pub use error::{Error, Result};
pub use event::Event;
pub use outcome::{AbortReason, ProviderOutcome, TerminalOutcome};
pub use payload::{Payload, PayloadClass};
pub use signal::{ControlSignal, ControlSignalKind, SignalFamily, SignalScope};
