//! Replay comparator — classifies divergences between a baseline trace and
//! a replayed trace.
//!
//! At each index the most severe applicable class is reported
//! (`PLAN > AUTHORITY > OUTCOME > ORDERING > TIMING`) and comparison
//! continues across the whole sequence.

use serde::{Deserialize, Serialize};

use crate::evidence::ArtifactDecision;

/// One entry of a recorded decision trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceArtifact {
    pub plan_hash: String,
    pub snapshot_provenance_ref: String,
    pub ordering_marker: String,
    pub authority_epoch: u64,
    pub runtime_timestamp_ms: u64,
    pub decision: ArtifactDecision,
}

/// Divergence classes, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DivergenceKind {
    Plan,
    Authority,
    Outcome,
    Ordering,
    Timing,
}

/// One classified divergence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Divergence {
    pub index: usize,
    pub kind: DivergenceKind,
    pub detail: String,
}

/// Comparator knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ComparatorConfig {
    /// Timestamp deltas at or below this are not divergences.
    pub timing_tolerance_ms: u64,
}

impl Default for ComparatorConfig {
    fn default() -> Self {
        ComparatorConfig {
            timing_tolerance_ms: 0,
        }
    }
}

/// Compare a replayed trace against its baseline.
pub fn compare(
    baseline: &[TraceArtifact],
    replay: &[TraceArtifact],
    config: &ComparatorConfig,
) -> Vec<Divergence> {
    let mut divergences = Vec::new();
    let common = baseline.len().min(replay.len());

    for index in 0..common {
        if let Some(d) = classify(index, &baseline[index], &replay[index], config) {
            divergences.push(d);
        }
    }

    if baseline.len() != replay.len() {
        // A missing or surplus tail is an outcome-class divergence at the
        // first index the sequences disagree about existing at all.
        let (longer, shorter) = if baseline.len() > replay.len() {
            ("baseline", "replay")
        } else {
            ("replay", "baseline")
        };
        divergences.push(Divergence {
            index: common,
            kind: DivergenceKind::Outcome,
            detail: format!(
                "{longer} has {} artifacts beyond {shorter} (lengths {} vs {})",
                baseline.len().abs_diff(replay.len()),
                baseline.len(),
                replay.len()
            ),
        });
    }

    divergences
}

fn classify(
    index: usize,
    baseline: &TraceArtifact,
    replay: &TraceArtifact,
    config: &ComparatorConfig,
) -> Option<Divergence> {
    if baseline.plan_hash != replay.plan_hash
        || baseline.snapshot_provenance_ref != replay.snapshot_provenance_ref
    {
        return Some(Divergence {
            index,
            kind: DivergenceKind::Plan,
            detail: format!(
                "plan {}/{} vs {}/{}",
                baseline.plan_hash,
                baseline.snapshot_provenance_ref,
                replay.plan_hash,
                replay.snapshot_provenance_ref
            ),
        });
    }

    if baseline.authority_epoch != replay.authority_epoch {
        return Some(Divergence {
            index,
            kind: DivergenceKind::Authority,
            detail: format!(
                "authority epoch {} vs {}",
                baseline.authority_epoch, replay.authority_epoch
            ),
        });
    }

    if baseline.decision != replay.decision {
        return Some(Divergence {
            index,
            kind: DivergenceKind::Outcome,
            detail: format!(
                "decision {}/{} vs {}/{}",
                baseline.decision.kind,
                baseline.decision.outcome,
                replay.decision.kind,
                replay.decision.outcome
            ),
        });
    }

    if baseline.ordering_marker != replay.ordering_marker {
        return Some(Divergence {
            index,
            kind: DivergenceKind::Ordering,
            detail: format!(
                "ordering marker {:?} vs {:?}",
                baseline.ordering_marker, replay.ordering_marker
            ),
        });
    }

    let delta = baseline
        .runtime_timestamp_ms
        .abs_diff(replay.runtime_timestamp_ms);
    if delta > config.timing_tolerance_ms {
        return Some(Divergence {
            index,
            kind: DivergenceKind::Timing,
            detail: format!("timestamp delta {delta}ms exceeds tolerance"),
        });
    }

    None
}
