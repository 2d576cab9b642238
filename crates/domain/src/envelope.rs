//! The canonical event envelope.
//!
//! Every inter-stage message carries exactly one envelope.  Field names are
//! stable wire strings; optional fields are omitted when absent so binary
//! and text codecs can preserve the envelope bit-exactly.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::payload::PayloadClass;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Schema version
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Envelope schema version: `v<major>.<minor>[.<patch>]`.
///
/// Compatibility is checked, not negotiated: events whose major version
/// differs from the runtime baseline are rejected at validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: Option<u32>,
}

impl SchemaVersion {
    /// The current baseline version stamped on events that arrive without one.
    pub const CURRENT: SchemaVersion = SchemaVersion {
        major: 1,
        minor: 0,
        patch: None,
    };

    /// Same-major versions are compatible.
    pub fn compatible_with(&self, other: &SchemaVersion) -> bool {
        self.major == other.major
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.patch {
            Some(p) => write!(f, "v{}.{}.{}", self.major, self.minor, p),
            None => write!(f, "v{}.{}", self.major, self.minor),
        }
    }
}

impl FromStr for SchemaVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix('v')
            .ok_or_else(|| format!("schema version must start with 'v': {s:?}"))?;
        let mut parts = rest.split('.');

        let major = parse_component(parts.next(), s)?;
        let minor = parse_component(parts.next(), s)?;
        let patch = match parts.next() {
            Some(p) => Some(parse_component(Some(p), s)?),
            None => None,
        };
        if parts.next().is_some() {
            return Err(format!("schema version has too many components: {s:?}"));
        }

        Ok(SchemaVersion {
            major,
            minor,
            patch,
        })
    }
}

fn parse_component(part: Option<&str>, full: &str) -> Result<u32, String> {
    let part = part.ok_or_else(|| format!("incomplete schema version: {full:?}"))?;
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("invalid schema version component in {full:?}"));
    }
    part.parse()
        .map_err(|_| format!("schema version component out of range in {full:?}"))
}

impl Serialize for SchemaVersion {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SchemaVersion {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scope and lanes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Whether an event belongs to a session or to a specific turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventScope {
    Session,
    Turn,
}

/// Traffic lane.  Control preempts Data; Telemetry is best-effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    Data,
    Control,
    Telemetry,
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lane::Data => write!(f, "data"),
            Lane::Control => write!(f, "control"),
            Lane::Telemetry => write!(f, "telemetry"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Media time
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Media-time position of a raw audio event.
///
/// Required iff the payload class is raw audio.  Either field alone is
/// sufficient; ingress backfills `pts_ms` from the runtime timestamp when
/// a frame arrives without it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MediaTime {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_index: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pts_ms: Option<i64>,
}

impl MediaTime {
    pub fn is_empty(&self) -> bool {
        self.sample_index.is_none() && self.pts_ms.is_none()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The canonical envelope carried by every inter-stage event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub schema_version: SchemaVersion,
    pub event_scope: EventScope,
    pub session_id: String,
    pub pipeline_version: String,
    pub event_id: String,
    /// Required when `event_scope` is `Turn`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
    pub lane: Lane,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<String>,
    /// Monotonic per transport stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_sequence: Option<u64>,
    /// Monotonic per session; assigned by the session's single logical writer.
    pub runtime_sequence: u64,
    pub runtime_timestamp_ms: u64,
    pub wall_clock_timestamp_ms: i64,
    /// Required iff the payload is raw audio.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_time: Option<MediaTime>,
    /// Required on turn-scoped and authority-sensitive events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority_epoch: Option<u64>,
    /// Security classification of the payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_class: Option<PayloadClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causal_parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_invocation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discontinuity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merged_from_event_ids: Vec<String>,
    /// Diagnostic marker on outputs generated pre-fence but arriving after it.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub late_after_cancel: bool,
    /// Extension blocks keyed by namespace.  Extensions may not shadow core
    /// envelope fields; validation rejects reserved keys.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl Envelope {
    /// A minimal session-scoped envelope; callers fill in the rest.
    pub fn session_scoped(session_id: impl Into<String>) -> Self {
        Envelope {
            schema_version: SchemaVersion::CURRENT,
            event_scope: EventScope::Session,
            session_id: session_id.into(),
            pipeline_version: String::new(),
            event_id: String::new(),
            turn_id: None,
            lane: Lane::Data,
            node_id: None,
            edge_id: None,
            transport_sequence: None,
            runtime_sequence: 0,
            runtime_timestamp_ms: 0,
            wall_clock_timestamp_ms: 0,
            media_time: None,
            authority_epoch: None,
            payload_class: None,
            causal_parent_id: None,
            idempotency_key: None,
            provider_invocation_id: None,
            sync_id: None,
            sync_domain: None,
            discontinuity_id: None,
            merge_group_id: None,
            merged_from_event_ids: Vec::new(),
            late_after_cancel: false,
            extensions: BTreeMap::new(),
        }
    }

    /// The core field names an extension namespace may not shadow.
    pub const RESERVED_KEYS: &'static [&'static str] = &[
        "schema_version",
        "event_scope",
        "session_id",
        "pipeline_version",
        "event_id",
        "turn_id",
        "lane",
        "node_id",
        "edge_id",
        "transport_sequence",
        "runtime_sequence",
        "runtime_timestamp_ms",
        "wall_clock_timestamp_ms",
        "media_time",
        "authority_epoch",
        "payload_class",
        "causal_parent_id",
        "idempotency_key",
        "provider_invocation_id",
        "sync_id",
        "sync_domain",
        "discontinuity_id",
        "merge_group_id",
        "merged_from_event_ids",
        "late_after_cancel",
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_version_parse_roundtrip() {
        let v: SchemaVersion = "v1.2".parse().unwrap();
        assert_eq!(v.major, 1);
        assert_eq!(v.minor, 2);
        assert_eq!(v.patch, None);
        assert_eq!(v.to_string(), "v1.2");

        let v: SchemaVersion = "v2.0.7".parse().unwrap();
        assert_eq!(v.patch, Some(7));
        assert_eq!(v.to_string(), "v2.0.7");
    }

    #[test]
    fn schema_version_rejects_malformed() {
        assert!("1.2".parse::<SchemaVersion>().is_err());
        assert!("v1".parse::<SchemaVersion>().is_err());
        assert!("v1.2.3.4".parse::<SchemaVersion>().is_err());
        assert!("v1.x".parse::<SchemaVersion>().is_err());
        assert!("vv1.2".parse::<SchemaVersion>().is_err());
    }

    #[test]
    fn schema_version_compatibility_is_major_only() {
        let a: SchemaVersion = "v1.0".parse().unwrap();
        let b: SchemaVersion = "v1.9.3".parse().unwrap();
        let c: SchemaVersion = "v2.0".parse().unwrap();
        assert!(a.compatible_with(&b));
        assert!(!a.compatible_with(&c));
    }

    #[test]
    fn envelope_serde_omits_empty_optionals() {
        let env = Envelope::session_scoped("s1");
        let json = serde_json::to_value(&env).unwrap();
        let obj = json.as_object().unwrap();
        assert!(!obj.contains_key("turn_id"));
        assert!(!obj.contains_key("late_after_cancel"));
        assert!(!obj.contains_key("extensions"));
        assert_eq!(obj["schema_version"], "v1.0");
    }

    #[test]
    fn envelope_roundtrips_through_json() {
        let mut env = Envelope::session_scoped("s1");
        env.turn_id = Some("t1".into());
        env.event_scope = EventScope::Turn;
        env.authority_epoch = Some(3);
        env.media_time = Some(MediaTime {
            sample_index: Some(480),
            pts_ms: Some(10),
        });
        env.late_after_cancel = true;

        let json = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, env);
    }
}
