//! Content fingerprints (ETag equivalents).

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of the value's JSON serialization.
///
/// Deterministic for equal values: `serde_json` maps are ordered.
pub fn fingerprint<V: Serialize + ?Sized>(value: &V) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(value)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}
