//! Per-session event identity.
//!
//! Each session has a single logical writer for its sequence series; this
//! is it.  Event ids are UUIDs, runtime sequences are a per-session atomic
//! counter, and the runtime clock is monotonic from session start.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use vox_abi::IdentitySource;

/// Identity source for one session's writer.
pub struct SessionIdentity {
    session_id: String,
    next_sequence: AtomicU64,
    started: Instant,
}

impl SessionIdentity {
    pub fn new(session_id: impl Into<String>) -> Self {
        SessionIdentity {
            session_id: session_id.into(),
            next_sequence: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The last sequence handed out (0 before any issuance).
    pub fn current_sequence(&self) -> u64 {
        self.next_sequence.load(Ordering::Acquire)
    }
}

impl IdentitySource for SessionIdentity {
    fn next_event_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    fn next_runtime_sequence(&self) -> u64 {
        self.next_sequence.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn runtime_now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn wall_now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}
