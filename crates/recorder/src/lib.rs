//! Two-stage timeline recorder and replay comparator.
//!
//! Stage-A is an in-memory, non-blocking append path: a reserved baseline
//! ring that never drops evidence for accepted turns, and a detail ring
//! that sheds first under pressure.  Stage-B drains Stage-A asynchronously,
//! content-addresses every artifact, and hands it to an export sink.
//! Neither stage may ever block control or data flow.

pub mod compare;
pub mod evidence;
pub mod export;
pub mod ring;
pub mod stage_a;

pub use compare::{compare, ComparatorConfig, Divergence, DivergenceKind, TraceArtifact};
pub use evidence::{ArtifactDecision, BaselineEvidence, DetailRecord, TurnTimestamps};
pub use export::{ExportArtifact, ExportSink, JsonlSink, MemorySink, StageBExporter};
pub use ring::RecordingLevel;
pub use stage_a::{AppendOutcome, RecorderConfig, StageA};
