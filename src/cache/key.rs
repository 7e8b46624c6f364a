//! Cache key generation using SHA-256 hashes

use serde_json::Value;
use sha2::{Digest, Sha256};

use super::normalize::normalize;

/// Generate a deterministic cache key for one logical request.
///
/// The key is a SHA-256 hash of the client, endpoint, upper-cased method,
/// version and the canonical JSON of the normalized parameters. No salt or
/// clock input goes in, so keys are stable across restarts.
pub fn cache_key(client: &str, endpoint: &str, params: &Value, method: &str, version: &str) -> String {
    let normalized = normalize(params);
    // Normalized values are strings, lists and maps, so this cannot fail
    let canonical = serde_json::to_string(&normalized).unwrap_or_default();

    let mut hasher = Sha256::new();

    hasher.update(client.as_bytes());
    hasher.update(b"|");
    hasher.update(endpoint.trim_matches('/').as_bytes());
    hasher.update(b"|");
    hasher.update(method.to_ascii_uppercase().as_bytes());
    hasher.update(b"|");
    hasher.update(version.as_bytes());
    hasher.update(b"|");
    hasher.update(canonical.as_bytes());

    // Return hex-encoded hash
    format!("{:x}", hasher.finalize())
}
