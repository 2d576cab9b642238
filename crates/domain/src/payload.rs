//! Payload taxonomy — the tagged union carried alongside every envelope.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::signal::ControlSignal;

/// Security classification of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadClass {
    AudioRaw,
    TextRaw,
    Pii,
    Phi,
    DerivedSummary,
    Metadata,
}

/// Incremental vs. final text content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextKind {
    Delta,
    Final,
}

/// The payload of an inter-stage event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    /// Raw sampled audio frames.
    Audio {
        data: Vec<u8>,
        sample_rate_hz: u32,
        channels: u16,
    },

    /// Delta or final text tokens.
    Text { text: String, text_kind: TextKind },

    /// A control signal.  Metadata only — control events never carry media.
    Control { signal: ControlSignal },

    /// Numeric metric samples, best-effort.
    Metrics { values: BTreeMap<String, f64> },

    /// Free-form diagnostic payload.
    Debug {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<serde_json::Value>,
    },

    /// An error surfaced as an event.
    Error { code: String, message: String },
}

impl Payload {
    /// The payload class implied by the payload kind when the producer did
    /// not tag one explicitly.
    pub fn default_class(&self) -> PayloadClass {
        match self {
            Payload::Audio { .. } => PayloadClass::AudioRaw,
            Payload::Text { .. } => PayloadClass::TextRaw,
            Payload::Control { .. }
            | Payload::Metrics { .. }
            | Payload::Debug { .. }
            | Payload::Error { .. } => PayloadClass::Metadata,
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Payload::Audio { .. })
    }

    pub fn is_control(&self) -> bool {
        matches!(self, Payload::Control { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{ControlSignalKind, SignalScope};

    #[test]
    fn payload_tags_are_stable() {
        let p = Payload::Text {
            text: "hi".into(),
            text_kind: TextKind::Delta,
        };
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["kind"], "text");
        assert_eq!(json["text_kind"], "delta");
    }

    #[test]
    fn control_payload_roundtrips() {
        let p = Payload::Control {
            signal: ControlSignal {
                kind: ControlSignalKind::Cancel,
                emitted_by: "RK-16".into(),
                reason: Some("barge_in".into()),
                scope: Some(SignalScope::Turn),
                target_lane: None,
                seq_range: None,
                amount: None,
            },
        };
        let json = serde_json::to_string(&p).unwrap();
        let back: Payload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn default_class_by_kind() {
        let audio = Payload::Audio {
            data: vec![0, 1],
            sample_rate_hz: 16_000,
            channels: 1,
        };
        assert_eq!(audio.default_class(), PayloadClass::AudioRaw);
        let metrics = Payload::Metrics {
            values: BTreeMap::new(),
        };
        assert_eq!(metrics.default_class(), PayloadClass::Metadata);
    }
}
