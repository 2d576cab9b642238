//! Session authority epochs.
//!
//! Authority is governed by a monotonically-increasing epoch identifying
//! the current lease holder for a session.  The epoch is stamped at
//! ingress; any operation that observes a non-current epoch must refuse to
//! act and signal `stale_epoch_reject`.

use std::collections::HashMap;

use parking_lot::Mutex;

use vox_domain::trace::TraceEvent;
use vox_domain::{Error, Result};

/// Epoch registry across sessions.
#[derive(Default)]
pub struct AuthorityService {
    epochs: Mutex<HashMap<String, u64>>,
}

impl AuthorityService {
    pub fn new() -> Self {
        AuthorityService::default()
    }

    /// Issue the first lease for a session (epoch 1), or rotate to the next
    /// epoch if one exists.  Returns the now-current epoch.
    pub fn issue_lease(&self, session_id: &str) -> u64 {
        let mut epochs = self.epochs.lock();
        let epoch = epochs
            .entry(session_id.to_owned())
            .and_modify(|e| *e += 1)
            .or_insert(1);
        let epoch = *epoch;
        TraceEvent::EpochRotated {
            session_id: session_id.to_owned(),
            epoch,
        }
        .emit();
        epoch
    }

    /// The current epoch for a session.
    pub fn current(&self, session_id: &str) -> Option<u64> {
        self.epochs.lock().get(session_id).copied()
    }

    /// Validate an observed epoch against the current lease.
    pub fn validate(&self, session_id: &str, observed: u64) -> Result<()> {
        let current = self
            .current(session_id)
            .ok_or_else(|| Error::Other(format!("session {session_id} has no authority lease")))?;
        if observed != current {
            return Err(Error::StaleAuthority { observed, current });
        }
        Ok(())
    }

    /// Revoke the session's lease by advancing past it.  Turns running
    /// under the old epoch must drain: their epoch is no longer current.
    pub fn revoke(&self, session_id: &str) -> u64 {
        self.issue_lease(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_starts_at_one_and_rotates_upward() {
        let auth = AuthorityService::new();
        assert_eq!(auth.current("s1"), None);
        assert_eq!(auth.issue_lease("s1"), 1);
        assert_eq!(auth.issue_lease("s1"), 2);
        assert_eq!(auth.current("s1"), Some(2));
    }

    #[test]
    fn stale_epoch_is_rejected() {
        let auth = AuthorityService::new();
        auth.issue_lease("s1");
        auth.issue_lease("s1");

        assert!(auth.validate("s1", 2).is_ok());
        let err = auth.validate("s1", 1).unwrap_err();
        assert!(matches!(
            err,
            Error::StaleAuthority {
                observed: 1,
                current: 2
            }
        ));
    }

    #[test]
    fn unknown_session_has_no_lease() {
        let auth = AuthorityService::new();
        assert!(auth.validate("ghost", 1).is_err());
    }

    #[test]
    fn revoke_invalidates_running_epoch() {
        let auth = AuthorityService::new();
        let epoch = auth.issue_lease("s1");
        auth.revoke("s1");
        assert!(auth.validate("s1", epoch).is_err());
    }
}
