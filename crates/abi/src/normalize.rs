//! Event normalization — applied before validation.
//!
//! Missing schema versions and negative wire values are handled at frame
//! decode (the wire form carries signed integers; `Envelope` does not), so
//! normalization here covers the event-level defaults: payload class,
//! signal scope, and the ingress-only media-time backfill.

use vox_domain::envelope::{EventScope, MediaTime};
use vox_domain::signal::SignalScope;
use vox_domain::{Event, Payload};

use crate::policy::ValidationPolicy;

/// Normalize a batch of events in place.
///
/// `at_ingress` gates the audio `pts_ms` backfill: only the ingress
/// normalizer may synthesize media time from the runtime timestamp.
pub fn normalize(events: &mut [Event], _policy: &ValidationPolicy, at_ingress: bool) {
    for event in events {
        normalize_one(event, at_ingress);
    }
}

fn normalize_one(event: &mut Event, at_ingress: bool) {
    // Default the payload class from the payload kind.
    if event.envelope.payload_class.is_none() {
        event.envelope.payload_class = Some(event.payload.default_class());
    }

    // Fill the signal scope from the event scope.
    let event_scope = event.envelope.event_scope;
    if let Payload::Control { signal } = &mut event.payload {
        if signal.scope.is_none() {
            signal.scope = Some(match event_scope {
                EventScope::Session => SignalScope::Session,
                EventScope::Turn => SignalScope::Turn,
            });
        }
    }

    // Ingress-only: backfill pts_ms on raw audio from the runtime timestamp.
    if at_ingress && event.payload.is_audio() {
        let ts = event.envelope.runtime_timestamp_ms;
        let mt = event
            .envelope
            .media_time
            .get_or_insert_with(MediaTime::default);
        if mt.pts_ms.is_none() {
            mt.pts_ms = Some(ts as i64);
        }
    }
}
