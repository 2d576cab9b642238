//! Lane routing: per-(session, edge) queues with control preemption.
//!
//! FIFO within a lane; across lanes the control queue drains first, so a
//! control message is observable no later than any later-arriving data or
//! telemetry message on the same edge.  Data is bounded and reports
//! `WouldBlock` instead of blocking (flow control takes it from there);
//! telemetry never blocks producers — it sheds its oldest entry.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use vox_domain::envelope::Lane;
use vox_domain::Event;

/// Per-edge queue sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaneConfig {
    pub data_capacity: usize,
    pub telemetry_capacity: usize,
    /// Data occupancy at which the edge asserts its high watermark.
    pub high_watermark: usize,
}

impl Default for LaneConfig {
    fn default() -> Self {
        LaneConfig {
            data_capacity: 64,
            telemetry_capacity: 128,
            high_watermark: 48,
        }
    }
}

/// What happened to a pushed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued, and the edge crossed its data high watermark.
    QueuedAtHighWatermark,
    /// The data queue is full.  The event was not queued; the producer
    /// must yield to flow control rather than block.
    WouldBlock,
    /// Queued after shedding the oldest telemetry entry.
    TelemetryShed,
}

#[derive(Default)]
struct EdgeQueues {
    control: VecDeque<Event>,
    data: VecDeque<Event>,
    telemetry: VecDeque<Event>,
}

/// Router for one session's edges.
pub struct LaneRouter {
    config: LaneConfig,
    edges: Mutex<HashMap<String, EdgeQueues>>,
}

impl LaneRouter {
    pub fn new(config: LaneConfig) -> Self {
        LaneRouter {
            config,
            edges: Mutex::new(HashMap::new()),
        }
    }

    /// Queue an event on its edge (`edge_id`, defaulting to `"default"`).
    pub fn push(&self, event: Event) -> PushOutcome {
        let edge_key = event
            .envelope
            .edge_id
            .clone()
            .unwrap_or_else(|| "default".to_owned());
        let mut edges = self.edges.lock();
        let queues = edges.entry(edge_key).or_default();

        match event.envelope.lane {
            Lane::Control => {
                // Control is never refused: it is the lane that unwedges
                // everything else.
                queues.control.push_back(event);
                PushOutcome::Queued
            }
            Lane::Data => {
                if queues.data.len() >= self.config.data_capacity {
                    return PushOutcome::WouldBlock;
                }
                queues.data.push_back(event);
                if queues.data.len() >= self.config.high_watermark {
                    PushOutcome::QueuedAtHighWatermark
                } else {
                    PushOutcome::Queued
                }
            }
            Lane::Telemetry => {
                let mut shed = false;
                if queues.telemetry.len() >= self.config.telemetry_capacity {
                    queues.telemetry.pop_front();
                    shed = true;
                }
                queues.telemetry.push_back(event);
                if shed {
                    PushOutcome::TelemetryShed
                } else {
                    PushOutcome::Queued
                }
            }
        }
    }

    /// Dequeue the next observable event for an edge: control first, then
    /// data, then telemetry.
    pub fn pop(&self, edge_id: &str) -> Option<Event> {
        let mut edges = self.edges.lock();
        let queues = edges.get_mut(edge_id)?;
        queues
            .control
            .pop_front()
            .or_else(|| queues.data.pop_front())
            .or_else(|| queues.telemetry.pop_front())
    }

    /// Current data occupancy for an edge.
    pub fn data_depth(&self, edge_id: &str) -> usize {
        self.edges
            .lock()
            .get(edge_id)
            .map_or(0, |q| q.data.len())
    }

    pub fn is_empty(&self, edge_id: &str) -> bool {
        self.edges.lock().get(edge_id).is_none_or(|q| {
            q.control.is_empty() && q.data.is_empty() && q.telemetry.is_empty()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vox_domain::payload::TextKind;
    use vox_domain::signal::{emitter, ControlSignal, ControlSignalKind};
    use vox_domain::{Envelope, Payload, PayloadClass};

    fn event(lane: Lane, seq: u64, edge: &str) -> Event {
        let mut env = Envelope::session_scoped("s1");
        env.lane = lane;
        env.runtime_sequence = seq;
        env.edge_id = Some(edge.into());
        let payload = match lane {
            Lane::Control => {
                env.payload_class = Some(PayloadClass::Metadata);
                Payload::Control {
                    signal: ControlSignal::new(
                        ControlSignalKind::Watermark,
                        emitter::FLOW,
                    ),
                }
            }
            _ => Payload::Text {
                text: format!("m{seq}"),
                text_kind: TextKind::Delta,
            },
        };
        Event::new(env, payload)
    }

    fn router(data_cap: usize, telemetry_cap: usize) -> LaneRouter {
        LaneRouter::new(LaneConfig {
            data_capacity: data_cap,
            telemetry_capacity: telemetry_cap,
            high_watermark: data_cap.saturating_sub(1).max(1),
        })
    }

    #[test]
    fn control_preempts_earlier_data() {
        let router = router(8, 8);
        router.push(event(Lane::Data, 1, "e1"));
        router.push(event(Lane::Data, 2, "e1"));
        router.push(event(Lane::Control, 3, "e1"));

        // The later-arriving control event is observed first.
        let first = router.pop("e1").unwrap();
        assert_eq!(first.envelope.lane, Lane::Control);
        let second = router.pop("e1").unwrap();
        assert_eq!(second.envelope.runtime_sequence, 1);
    }

    #[test]
    fn data_is_fifo_within_the_lane() {
        let router = router(8, 8);
        for seq in 1..=4 {
            router.push(event(Lane::Data, seq, "e1"));
        }
        let seqs: Vec<_> = std::iter::from_fn(|| router.pop("e1"))
            .map(|e| e.envelope.runtime_sequence)
            .collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
    }

    #[test]
    fn full_data_queue_reports_would_block() {
        let router = router(2, 8);
        assert_ne!(router.push(event(Lane::Data, 1, "e1")), PushOutcome::WouldBlock);
        assert_eq!(
            router.push(event(Lane::Data, 2, "e1")),
            PushOutcome::QueuedAtHighWatermark
        );
        assert_eq!(
            router.push(event(Lane::Data, 3, "e1")),
            PushOutcome::WouldBlock
        );
        // Nothing was silently dropped.
        assert_eq!(router.data_depth("e1"), 2);
    }

    #[test]
    fn telemetry_sheds_oldest_and_never_blocks() {
        let router = router(8, 2);
        router.push(event(Lane::Telemetry, 1, "e1"));
        router.push(event(Lane::Telemetry, 2, "e1"));
        assert_eq!(
            router.push(event(Lane::Telemetry, 3, "e1")),
            PushOutcome::TelemetryShed
        );

        let seqs: Vec<_> = std::iter::from_fn(|| router.pop("e1"))
            .map(|e| e.envelope.runtime_sequence)
            .collect();
        assert_eq!(seqs, vec![2, 3]);
    }

    #[test]
    fn control_is_never_refused() {
        let router = router(1, 1);
        for seq in 0..32 {
            assert_eq!(
                router.push(event(Lane::Control, seq, "e1")),
                PushOutcome::Queued
            );
        }
    }

    #[test]
    fn edges_are_independent() {
        let router = router(1, 8);
        assert_ne!(router.push(event(Lane::Data, 1, "e1")), PushOutcome::WouldBlock);
        assert_eq!(
            router.push(event(Lane::Data, 2, "e1")),
            PushOutcome::WouldBlock
        );
        // A different edge still has room.
        assert_ne!(router.push(event(Lane::Data, 3, "e2")), PushOutcome::WouldBlock);
    }
}
