//! Determinism context derivation.
//!
//! A turn's determinism seed is a pure function of its plan hash and the
//! runtime sequence at which the plan materialized, so replay can re-derive
//! it bit-for-bit.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use vox_domain::{Error, Result};

/// The merge rule this runtime applies when aggregating events.
pub const MERGE_RULE_ID: &str = "merge/ordered-by-runtime-sequence";
pub const MERGE_RULE_VERSION: u32 = 1;

/// Per-turn determinism context, frozen into the plan and recorded as
/// replay evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterminismContext {
    pub seed: u64,
    pub ordering_markers: Vec<String>,
    pub merge_rule_id: String,
    pub merge_rule_version: u32,
    /// Inputs the runtime could not make deterministic (wall clock reads,
    /// provider latencies); captured so replay can tell signal from noise.
    pub nondeterministic_inputs: Vec<String>,
}

/// Derive the determinism context for `(plan_hash, runtime_seq)`.
///
/// The seed is the unsigned magnitude of the top 64 bits of
/// `sha256(plan_hash | runtime_seq)` interpreted as a signed integer.
pub fn issue_context(plan_hash: &str, runtime_seq: u64) -> Result<DeterminismContext> {
    if plan_hash.is_empty() {
        return Err(Error::Validation(
            "determinism context requires a non-empty plan hash".into(),
        ));
    }

    let mut hasher = Sha256::new();
    hasher.update(plan_hash.as_bytes());
    hasher.update(b"|");
    hasher.update(runtime_seq.to_be_bytes());
    let digest = hasher.finalize();

    let mut top = [0u8; 8];
    top.copy_from_slice(&digest[..8]);
    let seed = i64::from_be_bytes(top).unsigned_abs();

    Ok(DeterminismContext {
        seed,
        ordering_markers: vec!["runtime_sequence".into(), "event_id".into()],
        merge_rule_id: MERGE_RULE_ID.into(),
        merge_rule_version: MERGE_RULE_VERSION,
        nondeterministic_inputs: Vec::new(),
    })
}
