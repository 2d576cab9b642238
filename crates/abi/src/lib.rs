//! Event ABI — normalization, validation, and control-signal emission.
//!
//! The ABI is the contract every stage speaks: events are normalized, then
//! validated against the envelope rules and the signal-family table, and
//! every control signal entering the pipeline goes through the emission
//! engine so its envelope bookkeeping is filled deterministically.

pub mod digest;
pub mod emit;
pub mod normalize;
pub mod policy;
pub mod unknown;
pub mod validate;
pub mod violation;

pub use digest::envelope_digest;
pub use emit::{IdentitySource, SignalDraft, SignalEmitter};
pub use normalize::normalize;
pub use policy::{UnknownEventPolicy, ValidationPolicy};
pub use unknown::{resolve_unknown, AuditMarker, UnknownEventDecision};
pub use validate::{validate, validate_or_err, validate_sequence};
pub use violation::{Violation, ViolationCode};
