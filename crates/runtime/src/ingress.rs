//! Ingress normalization: transport frames → validated events.
//!
//! Ingress is where the wire gets honest: codecs are gated, negative wire
//! values are clamped (or refused in strict mode), identity and the current
//! authority epoch are stamped, media time is backfilled for raw audio, and
//! per-stream transport sequences are checked for regression.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use vox_abi::{normalize, validate_or_err, IdentitySource, ValidationPolicy};
use vox_adapter::{SourceCodec, TransportFrame};
use vox_domain::envelope::{EventScope, Lane};
use vox_domain::trace::TraceEvent;
use vox_domain::{Envelope, Error, Event, PayloadClass, Result, SchemaVersion};

/// Ingress knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngressConfig {
    /// Class tagged onto unclassed non-audio data payloads.
    pub default_data_class: PayloadClass,
    /// Source codec constraint; empty admits any supported codec.
    pub source_codec: String,
}

impl Default for IngressConfig {
    fn default() -> Self {
        IngressConfig {
            default_data_class: PayloadClass::TextRaw,
            source_codec: String::new(),
        }
    }
}

/// The ingress normalizer for one session.
pub struct IngressNormalizer {
    policy: ValidationPolicy,
    default_data_class: PayloadClass,
    codec_constraint: Option<SourceCodec>,
    /// Last transport sequence seen per stream (edge, falling back to node).
    cursors: Mutex<HashMap<String, u64>>,
}

impl IngressNormalizer {
    /// Build a normalizer, parsing the codec constraint up front so a
    /// misconfigured codec fails at wiring time, not per frame.
    pub fn new(config: &IngressConfig, policy: ValidationPolicy) -> Result<Self> {
        let codec_constraint = SourceCodec::parse_constraint(&config.source_codec)?;
        Ok(IngressNormalizer {
            policy,
            default_data_class: config.default_data_class,
            codec_constraint,
            cursors: Mutex::new(HashMap::new()),
        })
    }

    /// Normalize one frame into a validated event.
    ///
    /// `epoch` is the session's current authority epoch, stamped onto every
    /// ingested event.
    pub fn normalize_frame(
        &self,
        frame: TransportFrame,
        epoch: u64,
        ids: &dyn IdentitySource,
    ) -> Result<Event> {
        self.gate_codec(&frame)?;

        let schema_version = match frame.schema_version.as_deref() {
            None => SchemaVersion::CURRENT,
            Some(raw) => raw
                .parse()
                .map_err(|e: String| Error::Validation(e))?,
        };

        let transport_sequence = match frame.transport_sequence {
            None => None,
            Some(ts) => Some(self.clamp(ts, "transport_sequence")? as u64),
        };
        let runtime_timestamp_ms = match frame.runtime_timestamp_ms {
            None => ids.runtime_now_ms(),
            Some(ts) => self.clamp(ts, "runtime_timestamp_ms")? as u64,
        };
        let wall_clock_timestamp_ms = match frame.wall_clock_timestamp_ms {
            None => ids.wall_now_ms(),
            Some(ts) => self.clamp(ts, "wall_clock_timestamp_ms")?,
        };

        let payload_class = frame.payload_class.unwrap_or_else(|| {
            if frame.payload.is_audio() {
                PayloadClass::AudioRaw
            } else {
                self.default_data_class
            }
        });

        let mut envelope = Envelope::session_scoped(&frame.session_id);
        envelope.schema_version = schema_version;
        envelope.pipeline_version = frame.pipeline_version.clone();
        envelope.event_id = ids.next_event_id();
        envelope.runtime_sequence = ids.next_runtime_sequence();
        envelope.event_scope = frame.event_scope.unwrap_or(if frame.turn_id.is_some() {
            EventScope::Turn
        } else {
            EventScope::Session
        });
        envelope.turn_id = frame.turn_id.clone();
        envelope.lane = frame.lane.unwrap_or(Lane::Data);
        envelope.node_id = frame.node_id.clone();
        envelope.edge_id = frame.edge_id.clone();
        envelope.transport_sequence = transport_sequence;
        envelope.runtime_timestamp_ms = runtime_timestamp_ms;
        envelope.wall_clock_timestamp_ms = wall_clock_timestamp_ms;
        envelope.media_time = frame.media_time;
        envelope.authority_epoch = Some(epoch);
        envelope.payload_class = Some(payload_class);
        envelope.idempotency_key = frame.idempotency_key.clone();
        envelope.extensions = frame.extensions.clone();

        let mut events = vec![Event::new(envelope, frame.payload)];
        normalize(&mut events, &self.policy, true);
        let event = events.remove(0);

        self.check_transport_series(&event)?;
        if let Err(e) = validate_or_err(&event, &self.policy) {
            TraceEvent::FrameRejected {
                session_id: event.envelope.session_id.clone(),
                reason: e.to_string(),
            }
            .emit();
            return Err(e);
        }
        Ok(event)
    }

    fn gate_codec(&self, frame: &TransportFrame) -> Result<()> {
        if !frame.payload.is_audio() {
            return Ok(());
        }
        let frame_codec = match frame.codec.as_deref() {
            None => {
                // Audio with no declared codec only passes an open gate.
                if let Some(required) = self.codec_constraint {
                    return Err(Error::Validation(format!(
                        "audio frame missing codec (require {required})"
                    )));
                }
                return Ok(());
            }
            Some(raw) => raw.trim().to_ascii_lowercase().parse::<SourceCodec>()?,
        };
        if let Some(required) = self.codec_constraint {
            if frame_codec != required {
                return Err(Error::Validation(format!(
                    "codec {frame_codec} refused (require {required})"
                )));
            }
        }
        Ok(())
    }

    fn clamp(&self, value: i64, field: &str) -> Result<i64> {
        if value >= 0 {
            return Ok(value);
        }
        if self.policy.strict {
            return Err(Error::Validation(format!(
                "{field} must be non-negative (got {value})"
            )));
        }
        Ok(0)
    }

    fn check_transport_series(&self, event: &Event) -> Result<()> {
        let Some(ts) = event.envelope.transport_sequence else {
            return Ok(());
        };
        let series = event
            .envelope
            .edge_id
            .as_deref()
            .or(event.envelope.node_id.as_deref())
            .unwrap_or("transport")
            .to_owned();

        let mut cursors = self.cursors.lock();
        if let Some(&prev) = cursors.get(&series) {
            if ts < prev {
                return Err(Error::SequenceRegression {
                    series,
                    prev,
                    next: ts,
                });
            }
        }
        cursors.insert(series, ts);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vox_domain::payload::TextKind;
    use vox_domain::Payload;

    use crate::identity::SessionIdentity;

    fn audio_frame() -> TransportFrame {
        let mut frame = TransportFrame::data(
            "s1",
            "p1",
            Payload::Audio {
                data: vec![0; 320],
                sample_rate_hz: 16_000,
                channels: 1,
            },
        );
        frame.codec = Some("pcm16".into());
        frame.runtime_timestamp_ms = Some(40);
        frame
    }

    fn text_frame(text: &str) -> TransportFrame {
        TransportFrame::data(
            "s1",
            "p1",
            Payload::Text {
                text: text.into(),
                text_kind: TextKind::Delta,
            },
        )
    }

    fn normalizer(codec: &str) -> IngressNormalizer {
        IngressNormalizer::new(
            &IngressConfig {
                default_data_class: PayloadClass::TextRaw,
                source_codec: codec.into(),
            },
            ValidationPolicy::default(),
        )
        .unwrap()
    }

    #[test]
    fn audio_gets_class_epoch_and_media_time() {
        let ids = SessionIdentity::new("s1");
        let event = normalizer("pcm16")
            .normalize_frame(audio_frame(), 3, &ids)
            .unwrap();

        assert_eq!(event.envelope.payload_class, Some(PayloadClass::AudioRaw));
        assert_eq!(event.envelope.authority_epoch, Some(3));
        // pts backfilled from the runtime timestamp.
        assert_eq!(event.envelope.media_time.unwrap().pts_ms, Some(40));
        assert!(!event.envelope.event_id.is_empty());
        assert_eq!(event.envelope.runtime_sequence, 1);
    }

    #[test]
    fn codec_gate_enforces_the_constraint() {
        let ids = SessionIdentity::new("s1");
        let mut frame = audio_frame();
        frame.codec = Some("opus".into());
        assert!(normalizer("pcm16")
            .normalize_frame(frame, 1, &ids)
            .is_err());

        // Unconstrained gate admits any supported codec.
        let mut frame = audio_frame();
        frame.codec = Some("OPUS".into());
        assert!(normalizer("").normalize_frame(frame, 1, &ids).is_ok());

        // Unknown codecs always fail.
        let mut frame = audio_frame();
        frame.codec = Some("flac".into());
        assert!(normalizer("").normalize_frame(frame, 1, &ids).is_err());
    }

    #[test]
    fn misconfigured_constraint_fails_at_construction() {
        assert!(IngressNormalizer::new(
            &IngressConfig {
                default_data_class: PayloadClass::TextRaw,
                source_codec: "wav".into(),
            },
            ValidationPolicy::default(),
        )
        .is_err());
    }

    #[test]
    fn negative_wire_values_clamp_in_lenient_mode() {
        let ids = SessionIdentity::new("s1");
        let mut frame = text_frame("hi");
        frame.transport_sequence = Some(-5);
        frame.runtime_timestamp_ms = Some(-1);
        let event = normalizer("").normalize_frame(frame, 1, &ids).unwrap();
        assert_eq!(event.envelope.transport_sequence, Some(0));
        assert_eq!(event.envelope.runtime_timestamp_ms, 0);
    }

    #[test]
    fn negative_wire_values_fail_in_strict_mode() {
        let ids = SessionIdentity::new("s1");
        let normalizer = IngressNormalizer::new(
            &IngressConfig::default(),
            ValidationPolicy {
                strict: true,
                ..ValidationPolicy::default()
            },
        )
        .unwrap();
        let mut frame = text_frame("hi");
        frame.transport_sequence = Some(-5);
        assert!(normalizer.normalize_frame(frame, 1, &ids).is_err());
    }

    #[test]
    fn transport_series_regression_is_fatal() {
        let ids = SessionIdentity::new("s1");
        let normalizer = normalizer("");

        let mut frame = text_frame("a");
        frame.edge_id = Some("edge-1".into());
        frame.transport_sequence = Some(10);
        normalizer.normalize_frame(frame, 1, &ids).unwrap();

        let mut frame = text_frame("b");
        frame.edge_id = Some("edge-1".into());
        frame.transport_sequence = Some(9);
        let err = normalizer.normalize_frame(frame, 1, &ids).unwrap_err();
        assert!(matches!(err, Error::SequenceRegression { prev: 10, next: 9, .. }));

        // A different stream has its own series.
        let mut frame = text_frame("c");
        frame.edge_id = Some("edge-2".into());
        frame.transport_sequence = Some(1);
        assert!(normalizer.normalize_frame(frame, 1, &ids).is_ok());
    }

    #[test]
    fn unknown_schema_major_is_rejected() {
        let ids = SessionIdentity::new("s1");
        let mut frame = text_frame("hi");
        frame.schema_version = Some("v9.0".into());
        assert!(normalizer("").normalize_frame(frame, 1, &ids).is_err());

        let mut frame = text_frame("hi");
        frame.schema_version = Some("not-a-version".into());
        assert!(normalizer("").normalize_frame(frame, 1, &ids).is_err());
    }

    #[test]
    fn runtime_sequences_advance_per_frame() {
        let ids = SessionIdentity::new("s1");
        let normalizer = normalizer("");
        let a = normalizer.normalize_frame(text_frame("a"), 1, &ids).unwrap();
        let b = normalizer.normalize_frame(text_frame("b"), 1, &ids).unwrap();
        assert!(b.envelope.runtime_sequence > a.envelope.runtime_sequence);
    }
}
