//! Raw transport frames and codec gating.
//!
//! A `TransportFrame` is what a transport adapter hands the ingress
//! normalizer: the envelope fields as they arrived on the wire, signed and
//! optional where the wire cannot guarantee them.  The normalizer clamps,
//! defaults, stamps identity, and produces a validated `Event`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use vox_domain::envelope::{EventScope, Lane, MediaTime};
use vox_domain::{Error, Payload, PayloadClass, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Source codec
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Audio codecs the ingress gate admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceCodec {
    Pcm16,
    Opus,
    Pcmu,
    Mulaw,
}

impl SourceCodec {
    /// Parse a configured codec constraint.  The value is lower-cased
    /// first; an empty string means "no constraint".
    pub fn parse_constraint(value: &str) -> Result<Option<SourceCodec>> {
        let lowered = value.trim().to_ascii_lowercase();
        if lowered.is_empty() {
            return Ok(None);
        }
        lowered.parse().map(Some)
    }
}

impl FromStr for SourceCodec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pcm16" => Ok(SourceCodec::Pcm16),
            "opus" => Ok(SourceCodec::Opus),
            "pcmu" => Ok(SourceCodec::Pcmu),
            "mulaw" => Ok(SourceCodec::Mulaw),
            other => Err(Error::Validation(format!(
                "unsupported source codec {other:?} (allowed: pcm16, opus, pcmu, mulaw)"
            ))),
        }
    }
}

impl fmt::Display for SourceCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceCodec::Pcm16 => "pcm16",
            SourceCodec::Opus => "opus",
            SourceCodec::Pcmu => "pcmu",
            SourceCodec::Mulaw => "mulaw",
        };
        f.write_str(s)
    }
}

/// How egress audio should be encoded for the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecPlan {
    pub codec: SourceCodec,
    pub sample_rate_hz: u32,
    pub channels: u16,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport frame
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An event as it arrives from (or leaves toward) a transport.
///
/// Wire integers are signed — some transports report negative placeholder
/// sequences — and get clamped to zero by the ingress normalizer in
/// non-strict mode.  Identity fields (`event_id`, `runtime_sequence`,
/// `authority_epoch`) are absent: ingress stamps them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
    pub session_id: String,
    pub pipeline_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_scope: Option<EventScope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lane: Option<Lane>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_sequence: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_timestamp_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wall_clock_timestamp_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_time: Option<MediaTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_class: Option<PayloadClass>,
    /// Codec of the carried audio, when the payload is audio.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// Extension blocks keyed by namespace, passed through to the envelope.
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub extensions: std::collections::BTreeMap<String, serde_json::Value>,
    pub payload: Payload,
}

impl TransportFrame {
    /// A minimal data frame; callers fill in the rest.
    pub fn data(
        session_id: impl Into<String>,
        pipeline_version: impl Into<String>,
        payload: Payload,
    ) -> Self {
        TransportFrame {
            schema_version: None,
            session_id: session_id.into(),
            pipeline_version: pipeline_version.into(),
            event_scope: None,
            turn_id: None,
            lane: None,
            node_id: None,
            edge_id: None,
            transport_sequence: None,
            runtime_timestamp_ms: None,
            wall_clock_timestamp_ms: None,
            media_time: None,
            payload_class: None,
            codec: None,
            idempotency_key: None,
            extensions: std::collections::BTreeMap::new(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_constraint_parsing() {
        assert_eq!(SourceCodec::parse_constraint("").unwrap(), None);
        assert_eq!(SourceCodec::parse_constraint("  ").unwrap(), None);
        assert_eq!(
            SourceCodec::parse_constraint("PCM16").unwrap(),
            Some(SourceCodec::Pcm16)
        );
        assert_eq!(
            SourceCodec::parse_constraint("Mulaw").unwrap(),
            Some(SourceCodec::Mulaw)
        );
        assert!(SourceCodec::parse_constraint("flac").is_err());
    }

    #[test]
    fn frame_roundtrips_with_negative_sequences() {
        let mut frame = TransportFrame::data(
            "s1",
            "p1",
            Payload::Text {
                text: "hi".into(),
                text_kind: vox_domain::payload::TextKind::Delta,
            },
        );
        frame.transport_sequence = Some(-1);
        let json = serde_json::to_string(&frame).unwrap();
        let back: TransportFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame);
    }
}
