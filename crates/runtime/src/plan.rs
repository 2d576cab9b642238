//! Resolved turn plans.
//!
//! A turn's plan is materialized from named snapshots at `turn_open` and
//! frozen: nothing mutates it afterwards, and adaptive behavior during the
//! turn is restricted to the actions the plan allows.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use vox_adapter::CapabilitySnapshot;
use vox_domain::{Result, SchemaVersion};

use crate::determinism::{issue_context, DeterminismContext};

/// A named, immutable reference to a policy/routing/admission/ABI/
/// provider-health snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRef {
    pub name: String,
    pub ref_id: String,
    /// Marked by the snapshot store when the ref no longer matches the
    /// store head.  Stale snapshots never materialize into a plan.
    #[serde(default)]
    pub stale: bool,
}

impl SnapshotRef {
    pub fn new(name: impl Into<String>, ref_id: impl Into<String>) -> Self {
        SnapshotRef {
            name: name.into(),
            ref_id: ref_id.into(),
            stale: false,
        }
    }
}

/// The snapshots a plan is materialized from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotBundle {
    pub admission: SnapshotRef,
    pub policy: SnapshotRef,
    pub routing: SnapshotRef,
    pub abi: SnapshotRef,
    pub provider_health: SnapshotRef,
    /// Schema version the ABI snapshot was taken against.
    pub abi_schema: SchemaVersion,
    /// Transport capabilities, applied at turn boundaries only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<CapabilitySnapshot>,
}

impl SnapshotBundle {
    fn refs(&self) -> [&SnapshotRef; 5] {
        [
            &self.admission,
            &self.policy,
            &self.routing,
            &self.abi,
            &self.provider_health,
        ]
    }
}

/// Adaptive actions a plan may permit during its turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdaptiveAction {
    RetryProvider,
    FallbackProvider,
    Degrade,
}

/// Why a plan failed to materialize, and what the arbiter does about it.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("snapshot {name} is missing")]
    MissingSnapshot { name: String },

    #[error("snapshot {name} is stale")]
    StaleSnapshot { name: String },

    #[error("abi snapshot schema {found} is incompatible with {current}")]
    IncompatibleAbi {
        found: SchemaVersion,
        current: SchemaVersion,
    },
}

impl PlanError {
    /// Missing/stale snapshots may resolve on retry; an incompatible ABI
    /// will not.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PlanError::IncompatibleAbi { .. })
    }

    pub fn reason(&self) -> &'static str {
        match self {
            PlanError::MissingSnapshot { .. } => "plan_snapshot_missing",
            PlanError::StaleSnapshot { .. } => "plan_snapshot_stale",
            PlanError::IncompatibleAbi { .. } => "plan_abi_incompatible",
        }
    }
}

/// The immutable per-turn plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedTurnPlan {
    pub plan_hash: String,
    pub snapshot_provenance: BTreeMap<String, String>,
    pub determinism: DeterminismContext,
    pub allowed_adaptive_actions: Vec<AdaptiveAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<CapabilitySnapshot>,
}

impl ResolvedTurnPlan {
    pub fn allows(&self, action: AdaptiveAction) -> bool {
        self.allowed_adaptive_actions.contains(&action)
    }
}

/// Materialize a plan from a snapshot bundle.
///
/// `runtime_seq` is the session sequence at materialization — one of the
/// two inputs to the determinism seed.
pub fn materialize(
    bundle: &SnapshotBundle,
    runtime_seq: u64,
    current_schema: &SchemaVersion,
    allowed_adaptive_actions: Vec<AdaptiveAction>,
) -> std::result::Result<ResolvedTurnPlan, PlanError> {
    let mut provenance = BTreeMap::new();
    for snapshot in bundle.refs() {
        if snapshot.name.is_empty() || snapshot.ref_id.is_empty() {
            return Err(PlanError::MissingSnapshot {
                name: if snapshot.name.is_empty() {
                    "(unnamed)".into()
                } else {
                    snapshot.name.clone()
                },
            });
        }
        if snapshot.stale {
            return Err(PlanError::StaleSnapshot {
                name: snapshot.name.clone(),
            });
        }
        provenance.insert(snapshot.name.clone(), snapshot.ref_id.clone());
    }

    if !bundle.abi_schema.compatible_with(current_schema) {
        return Err(PlanError::IncompatibleAbi {
            found: bundle.abi_schema,
            current: *current_schema,
        });
    }

    let plan_hash = hash_provenance(&provenance);
    let determinism = issue_context(&plan_hash, runtime_seq)
        .unwrap_or_else(|_| unreachable!("plan hash is never empty"));

    Ok(ResolvedTurnPlan {
        plan_hash,
        snapshot_provenance: provenance,
        determinism,
        allowed_adaptive_actions,
        capabilities: bundle.capabilities.clone(),
    })
}

fn hash_provenance(provenance: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (name, ref_id) in provenance {
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(ref_id.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// `materialize`, collapsed into the shared error type (violations keep
/// their plan-failure reason).
pub fn materialize_or_err(
    bundle: &SnapshotBundle,
    runtime_seq: u64,
    current_schema: &SchemaVersion,
    allowed_adaptive_actions: Vec<AdaptiveAction>,
) -> Result<ResolvedTurnPlan> {
    materialize(bundle, runtime_seq, current_schema, allowed_adaptive_actions)
        .map_err(|e| vox_domain::Error::Validation(e.to_string()))
}
