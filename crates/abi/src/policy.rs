//! Validation policy — how strict the ABI is and what happens to events
//! outside the known vocabulary.

use serde::{Deserialize, Serialize};

use vox_domain::SchemaVersion;

/// How to handle events whose shape or extension namespace is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownEventPolicy {
    /// Reject with a validation error.
    StrictReject,
    /// Drop the event and append an audit marker to the timeline.
    DropWithAuditMarker,
    /// Pass the event through and append an audit marker to the timeline.
    PassThroughWithAuditMarker,
}

/// Policy knobs for ABI validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationPolicy {
    /// In strict mode, out-of-range frame values fail instead of clamping.
    pub strict: bool,
    pub unknown_event: UnknownEventPolicy,
    /// The schema baseline this runtime speaks.  Events with a different
    /// major version are rejected with an audit marker.
    pub current_schema: SchemaVersion,
    /// Emitters allowed to raise budget/degrade/fallback pressure signals.
    pub policy_emitters: Vec<String>,
    /// Extension namespaces this deployment understands.  Events carrying
    /// any other namespace follow the unknown-event policy.
    pub known_extension_namespaces: Vec<String>,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        ValidationPolicy {
            strict: false,
            unknown_event: UnknownEventPolicy::DropWithAuditMarker,
            current_schema: SchemaVersion::CURRENT,
            policy_emitters: vec![
                vox_domain::signal::emitter::ADMISSION.to_owned(),
                vox_domain::signal::emitter::CONTROL_PLANE_ADMISSION.to_owned(),
                vox_domain::signal::emitter::PROVIDER.to_owned(),
            ],
            known_extension_namespaces: Vec::new(),
        }
    }
}
