//! The unified inter-stage event: one envelope, one payload.

use serde::{Deserialize, Serialize};

use crate::envelope::{Envelope, Lane};
use crate::payload::Payload;
use crate::signal::ControlSignal;

/// An inter-stage event.  This is the one event type the whole core works
/// with; control signals and data records are narrowing views, not separate
/// artifact types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub envelope: Envelope,
    pub payload: Payload,
}

impl Event {
    pub fn new(envelope: Envelope, payload: Payload) -> Self {
        Event { envelope, payload }
    }

    /// The control signal carried by this event, if any.
    pub fn control_signal(&self) -> Option<&ControlSignal> {
        match &self.payload {
            Payload::Control { signal } => Some(signal),
            _ => None,
        }
    }

    pub fn is_control(&self) -> bool {
        self.envelope.lane == Lane::Control && self.payload.is_control()
    }

    pub fn is_audio(&self) -> bool {
        self.payload.is_audio()
    }

    pub fn session_id(&self) -> &str {
        &self.envelope.session_id
    }

    pub fn turn_id(&self) -> Option<&str> {
        self.envelope.turn_id.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{emitter, ControlSignalKind};

    #[test]
    fn control_signal_view() {
        let mut env = Envelope::session_scoped("s1");
        env.lane = Lane::Control;
        let event = Event::new(
            env,
            Payload::Control {
                signal: ControlSignal::new(ControlSignalKind::Connected, emitter::CONNECTION),
            },
        );
        assert!(event.is_control());
        assert_eq!(
            event.control_signal().unwrap().kind,
            ControlSignalKind::Connected
        );
    }

    #[test]
    fn data_event_has_no_signal_view() {
        let event = Event::new(
            Envelope::session_scoped("s1"),
            Payload::Text {
                text: "hello".into(),
                text_kind: crate::payload::TextKind::Final,
            },
        );
        assert!(!event.is_control());
        assert!(event.control_signal().is_none());
    }
}
