//! Per-(session, turn) cancellation fences.
//!
//! A fence is a one-way flag: once a cancel is accepted for a turn it is
//! never cleared within that turn.  The map hands out [`CancelFlag`]s so
//! in-flight provider invocations observe the fence the moment it sets.

use std::collections::HashMap;

use parking_lot::Mutex;

use vox_adapter::CancelFlag;
use vox_domain::trace::TraceEvent;

/// The fence map.  Updates are a short critical section — map access only;
/// the flag itself is an atomic.
pub struct FenceMap {
    fences: Mutex<HashMap<(String, String), CancelFlag>>,
}

impl Default for FenceMap {
    fn default() -> Self {
        Self::new()
    }
}

impl FenceMap {
    pub fn new() -> Self {
        FenceMap {
            fences: Mutex::new(HashMap::new()),
        }
    }

    /// The shared flag for a turn, creating it unset on first use.
    /// Invocation contexts clone this so cancellation propagates.
    pub fn flag(&self, session_id: &str, turn_id: &str) -> CancelFlag {
        self.fences
            .lock()
            .entry((session_id.to_owned(), turn_id.to_owned()))
            .or_default()
            .clone()
    }

    /// Accept a cancel for the turn.  Idempotent and monotonic: returns
    /// true only on the first acceptance.
    pub fn accept(&self, session_id: &str, turn_id: &str) -> bool {
        let flag = self.flag(session_id, turn_id);
        if flag.is_cancelled() {
            return false;
        }
        flag.cancel();
        TraceEvent::FenceApplied {
            session_id: session_id.to_owned(),
            turn_id: turn_id.to_owned(),
        }
        .emit();
        true
    }

    pub fn is_fenced(&self, session_id: &str, turn_id: &str) -> bool {
        self.fences
            .lock()
            .get(&(session_id.to_owned(), turn_id.to_owned()))
            .is_some_and(CancelFlag::is_cancelled)
    }

    /// Drop a turn's fence entry once the turn is closed and its evidence
    /// exported.  The monotonicity guarantee is per-turn; a closed turn's
    /// id is never reused.
    pub fn release(&self, session_id: &str, turn_id: &str) {
        self.fences
            .lock()
            .remove(&(session_id.to_owned(), turn_id.to_owned()));
    }
}
