//! Pre-turn admission.
//!
//! Admission decisions happen before a turn exists: a rejected or deferred
//! proposal goes back to Idle and never produces `abort` or `close`.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

/// Admission capacity knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Turns allowed in flight at once.  Zero closes admission entirely.
    pub max_active_turns: usize,
    /// Queue depth at a scheduling point beyond which load is shed.
    pub shed_queue_depth: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        AdmissionConfig {
            max_active_turns: 4,
            shed_queue_depth: 64,
        }
    }
}

/// A pre-turn decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    Admit { reason: &'static str },
    Reject { reason: &'static str },
    Defer { reason: &'static str },
}

/// Counts in-flight turns and decides proposals against capacity.
pub struct AdmissionController {
    config: AdmissionConfig,
    active: AtomicUsize,
}

impl AdmissionController {
    pub fn new(config: AdmissionConfig) -> Self {
        AdmissionController {
            config,
            active: AtomicUsize::new(0),
        }
    }

    pub fn active_turns(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Decide a turn proposal.
    pub fn decide(&self) -> AdmissionDecision {
        if self.config.max_active_turns == 0 {
            return AdmissionDecision::Reject {
                reason: "admission_disabled",
            };
        }
        if self.active_turns() >= self.config.max_active_turns {
            return AdmissionDecision::Defer {
                reason: "capacity_exhausted",
            };
        }
        AdmissionDecision::Admit {
            reason: "capacity_available",
        }
    }

    /// Whether a scheduling point this deep should shed instead of queue.
    pub fn should_shed(&self, queue_depth: usize) -> bool {
        queue_depth > self.config.shed_queue_depth
    }

    pub fn on_turn_opened(&self) {
        self.active.fetch_add(1, Ordering::AcqRel);
    }

    pub fn on_turn_closed(&self) {
        // Saturating: a close without a matching open must not underflow.
        let _ = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}
