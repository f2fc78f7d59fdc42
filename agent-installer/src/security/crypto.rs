// Digest helpers.
//
// Used for journal line integrity and for recording that a password was set without ever
// persisting the password itself.

use base64::Engine;
use sha2::{Digest, Sha256};

use crate::security::secret::Secret;

/// SHA-256 hex digest (lowercase).
pub fn sha256_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// SHA-256 base64 digest (STANDARD).
pub fn sha256_base64(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    let digest = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(digest)
}

/// Safe fingerprint for a secret (hash only; never store the raw secret).
pub fn secret_fingerprint(secret: &Secret) -> String {
    sha256_base64(secret.expose().as_bytes())
}
