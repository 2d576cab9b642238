//! Unknown-event resolution.
//!
//! Events outside the known vocabulary (unrecognized extension namespaces,
//! unparseable signal kinds surfaced by frame decode) are resolved by
//! policy.  The decision, reason, and envelope digest form an audit marker
//! the caller appends to the timeline.

use serde::{Deserialize, Serialize};

use vox_domain::{Envelope, Error, Result};

use crate::digest::envelope_digest;
use crate::policy::{UnknownEventPolicy, ValidationPolicy};

/// What the policy decided to do with an unknown event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownEventDecision {
    Rejected,
    Dropped,
    PassedThrough,
}

/// Timeline audit record for an unknown-event decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditMarker {
    pub decision: UnknownEventDecision,
    pub reason: String,
    pub envelope_digest: String,
}

/// Resolve an unknown event per policy.
///
/// Returns the audit marker to append to the timeline; `StrictReject`
/// additionally surfaces `Error::UnknownEvent` to the caller so the event
/// is never silently dropped.
pub fn resolve_unknown(
    envelope: &Envelope,
    reason: &str,
    policy: &ValidationPolicy,
) -> Result<AuditMarker> {
    let digest = envelope_digest(envelope)?;
    let decision = match policy.unknown_event {
        UnknownEventPolicy::StrictReject => UnknownEventDecision::Rejected,
        UnknownEventPolicy::DropWithAuditMarker => UnknownEventDecision::Dropped,
        UnknownEventPolicy::PassThroughWithAuditMarker => UnknownEventDecision::PassedThrough,
    };

    let marker = AuditMarker {
        decision,
        reason: reason.to_owned(),
        envelope_digest: digest,
    };

    if decision == UnknownEventDecision::Rejected {
        return Err(Error::UnknownEvent(format!(
            "{reason} (digest {})",
            marker.envelope_digest
        )));
    }
    Ok(marker)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(p: UnknownEventPolicy) -> ValidationPolicy {
        ValidationPolicy {
            unknown_event: p,
            ..ValidationPolicy::default()
        }
    }

    #[test]
    fn strict_reject_surfaces_an_error() {
        let env = Envelope::session_scoped("s1");
        let err = resolve_unknown(&env, "unknown namespace", &policy(UnknownEventPolicy::StrictReject));
        assert!(matches!(err, Err(Error::UnknownEvent(_))));
    }

    #[test]
    fn drop_and_pass_through_produce_markers() {
        let env = Envelope::session_scoped("s1");
        let dropped = resolve_unknown(
            &env,
            "unknown namespace",
            &policy(UnknownEventPolicy::DropWithAuditMarker),
        )
        .unwrap();
        assert_eq!(dropped.decision, UnknownEventDecision::Dropped);
        assert_eq!(dropped.envelope_digest.len(), 64);

        let passed = resolve_unknown(
            &env,
            "unknown namespace",
            &policy(UnknownEventPolicy::PassThroughWithAuditMarker),
        )
        .unwrap();
        assert_eq!(passed.decision, UnknownEventDecision::PassedThrough);
        assert_eq!(passed.envelope_digest, dropped.envelope_digest);
    }
}
