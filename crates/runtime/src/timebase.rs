//! Per-session timebase: monotonic ↔ wall-clock ↔ media-time mapping.
//!
//! Each session anchors a linear mapping on a `(monotonic, wall, media)`
//! triple.  Projections are strictly non-decreasing across calls even when
//! an observation rebases the anchor backwards.

use std::collections::HashMap;

use parking_lot::Mutex;

use vox_domain::trace::TraceEvent;
use vox_domain::{Error, Result};

/// A projected instant on the wall and media timelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Projection {
    pub wall_ms: i64,
    pub media_ms: i64,
}

/// Result of an observation: the mapping after any rebase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub wall_ms: i64,
    pub media_ms: i64,
    pub rebased: bool,
}

#[derive(Debug, Clone, Copy)]
struct Anchor {
    monotonic_ms: u64,
    wall_ms: i64,
    media_ms: i64,
}

#[derive(Debug, Clone, Copy)]
struct SessionTime {
    anchor: Anchor,
    /// Floor for projections, so `project` never goes backwards.
    last_projection: Option<Projection>,
}

/// The timebase service.  Holds per-session state under a lock;
/// observations may recalibrate while holding it.
#[derive(Default)]
pub struct Timebase {
    sessions: Mutex<HashMap<String, SessionTime>>,
}

impl Timebase {
    pub fn new() -> Self {
        Timebase::default()
    }

    /// Set (or reset) a session's anchor triple.  Recalibration must not
    /// move the anchor's monotonic coordinate backwards.
    pub fn calibrate(
        &self,
        session_id: &str,
        monotonic_ms: u64,
        wall_ms: i64,
        media_ms: i64,
    ) -> Result<()> {
        let mut sessions = self.sessions.lock();
        if let Some(existing) = sessions.get(session_id) {
            if monotonic_ms < existing.anchor.monotonic_ms {
                return Err(Error::Validation(format!(
                    "recalibration must not regress monotonic time ({monotonic_ms} < {})",
                    existing.anchor.monotonic_ms
                )));
            }
        }
        let anchor = Anchor {
            monotonic_ms,
            wall_ms,
            media_ms,
        };
        sessions
            .entry(session_id.to_owned())
            .and_modify(|s| s.anchor = anchor)
            .or_insert(SessionTime {
                anchor,
                last_projection: None,
            });
        Ok(())
    }

    /// Project a monotonic instant onto the wall and media timelines.
    /// Strictly non-decreasing across calls for a session.
    pub fn project(&self, session_id: &str, monotonic_ms: u64) -> Result<Projection> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::Other(format!("session {session_id} has no timebase anchor")))?;

        let mut projection = project_from(session.anchor, monotonic_ms);
        if let Some(floor) = session.last_projection {
            projection.wall_ms = projection.wall_ms.max(floor.wall_ms);
            projection.media_ms = projection.media_ms.max(floor.media_ms);
        }
        session.last_projection = Some(projection);
        Ok(projection)
    }

    /// Fold an observed `(wall, media)` pair into the mapping.
    ///
    /// Skew is the larger of the wall and media deviations from the current
    /// mapping.  Within `max_skew_ms` the mapping is kept; beyond it the
    /// anchor is rebased to the observed values and `rebased` is reported.
    pub fn observe(
        &self,
        session_id: &str,
        monotonic_ms: u64,
        observed_wall_ms: i64,
        observed_media_ms: i64,
        max_skew_ms: i64,
    ) -> Result<Observation> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::Other(format!("session {session_id} has no timebase anchor")))?;

        if monotonic_ms < session.anchor.monotonic_ms {
            return Err(Error::Validation(format!(
                "observation must not regress monotonic time ({monotonic_ms} < {})",
                session.anchor.monotonic_ms
            )));
        }

        let predicted = project_from(session.anchor, monotonic_ms);
        let skew = (observed_wall_ms - predicted.wall_ms)
            .abs()
            .max((observed_media_ms - predicted.media_ms).abs());

        if skew <= max_skew_ms {
            return Ok(Observation {
                wall_ms: predicted.wall_ms,
                media_ms: predicted.media_ms,
                rebased: false,
            });
        }

        // Deterministic rebase to the observed values.
        session.anchor = Anchor {
            monotonic_ms,
            wall_ms: observed_wall_ms,
            media_ms: observed_media_ms,
        };
        TraceEvent::TimebaseRebased {
            session_id: session_id.to_owned(),
            skew_ms: skew,
        }
        .emit();

        Ok(Observation {
            wall_ms: observed_wall_ms,
            media_ms: observed_media_ms,
            rebased: true,
        })
    }
}

fn project_from(anchor: Anchor, monotonic_ms: u64) -> Projection {
    // The anchor may sit ahead of the queried instant right after a rebase.
    let delta = monotonic_ms as i64 - anchor.monotonic_ms as i64;
    Projection {
        wall_ms: anchor.wall_ms + delta,
        media_ms: anchor.media_ms + delta,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_skew_keeps_the_mapping() {
        let tb = Timebase::new();
        tb.calibrate("s1", 100, 1000, 500).unwrap();

        let obs = tb.observe("s1", 120, 1020, 520, 5).unwrap();
        assert!(!obs.rebased);
        assert_eq!(obs.wall_ms, 1020);
        assert_eq!(obs.media_ms, 520);
    }

    #[test]
    fn large_skew_rebases_to_observed_values() {
        let tb = Timebase::new();
        tb.calibrate("s1", 100, 1000, 500).unwrap();
        tb.observe("s1", 120, 1020, 520, 5).unwrap();

        let obs = tb.observe("s1", 140, 1250, 650, 5).unwrap();
        assert!(obs.rebased);
        assert_eq!(obs.wall_ms, 1250);
        assert_eq!(obs.media_ms, 650);

        // Projections continue from the rebased anchor.
        let p = tb.project("s1", 150).unwrap();
        assert_eq!(p.wall_ms, 1260);
        assert_eq!(p.media_ms, 660);
    }

    #[test]
    fn projections_never_decrease() {
        let tb = Timebase::new();
        tb.calibrate("s1", 100, 1000, 500).unwrap();
        let p1 = tb.project("s1", 200).unwrap();

        // Rebase backwards: observed wall behind the mapping.
        tb.observe("s1", 210, 900, 400, 5).unwrap();

        // A later projection is floored at the previous one.
        let p2 = tb.project("s1", 215).unwrap();
        assert!(p2.wall_ms >= p1.wall_ms);
        assert!(p2.media_ms >= p1.media_ms);
    }

    #[test]
    fn recalibration_cannot_regress_monotonic() {
        let tb = Timebase::new();
        tb.calibrate("s1", 100, 1000, 500).unwrap();
        assert!(tb.calibrate("s1", 90, 1000, 500).is_err());
        assert!(tb.calibrate("s1", 100, 1100, 600).is_ok());
        assert!(tb.observe("s1", 50, 1000, 500, 5).is_err());
    }

    #[test]
    fn sessions_are_independent() {
        let tb = Timebase::new();
        tb.calibrate("s1", 0, 0, 0).unwrap();
        tb.calibrate("s2", 0, 10_000, 0).unwrap();

        assert_eq!(tb.project("s1", 5).unwrap().wall_ms, 5);
        assert_eq!(tb.project("s2", 5).unwrap().wall_ms, 10_005);
    }

    #[test]
    fn unknown_session_is_an_error() {
        let tb = Timebase::new();
        assert!(tb.project("ghost", 1).is_err());
        assert!(tb.observe("ghost", 1, 1, 1, 1).is_err());
    }
}
