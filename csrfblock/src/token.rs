//! Per-session secret token generation
//!
//! Tokens are fixed-length hexadecimal strings derived from a SHA1 digest of
//! wall-clock time, process identity, and fresh randomness. Uniqueness is
//! probabilistic; at the default length of 16 hex characters (64 bits) a
//! collision is negligible for this use.

use rand::RngCore;
use sha1::{Digest, Sha1};
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum token length in hex characters (the full SHA1 hex digest).
pub const MAX_TOKEN_LENGTH: usize = 40;

/// Generate a new token of `length` hex characters.
///
/// `length` is clamped to `1..=MAX_TOKEN_LENGTH`. Never blocks and performs
/// no I/O.
///
/// # Example
///
/// ```rust
/// use csrfblock::token::generate_token;
///
/// let token = generate_token(16);
/// assert_eq!(token.len(), 16);
/// assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
/// ```
#[must_use]
pub fn generate_token(length: usize) -> String {
    let length = length.clamp(1, MAX_TOKEN_LENGTH);

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();

    let mut entropy = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut entropy);

    let mut hasher = Sha1::new();
    hasher.update(now.as_nanos().to_be_bytes());
    hasher.update(std::process::id().to_be_bytes());
    hasher.update(entropy);

    let digest = hex::encode(hasher.finalize());
    digest[..length].to_string()
}
