//! Canonical envelope digests.
//!
//! Audit markers and content addresses need a stable digest of the envelope
//! alone (never the payload — digests may outlive redaction decisions).
//! Serde serialization of `Envelope` is already canonical: field order is
//! the struct declaration order and map keys are `BTreeMap`-sorted.

use sha2::{Digest, Sha256};

use vox_domain::{Envelope, Result};

/// Hex sha-256 of the canonical envelope JSON.
pub fn envelope_digest(envelope: &Envelope) -> Result<String> {
    let json = serde_json::to_vec(envelope)?;
    let mut hasher = Sha256::new();
    hasher.update(&json);
    Ok(hex::encode(hasher.finalize()))
}
