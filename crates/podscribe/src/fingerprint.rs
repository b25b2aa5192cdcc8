//! Stable job identity.
//!
//! A fingerprint is the hex SHA-256 of the normalized `(channel, episode)`
//! tuple. Each component is length-prefixed so that no two distinct tuples
//! hash the same byte stream (`("ab", "c")` vs `("a", "bc")`).

use sha2::{Digest, Sha256};

const DOMAIN: &[u8] = b"podscribe/job/v1";

/// Derives the fingerprint for an episode of a channel.
///
/// Surrounding whitespace is ignored; everything else, including case, is
/// significant (GUIDs and URLs are case-sensitive).
pub fn fingerprint(channel: &str, episode_guid_or_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(DOMAIN);
    for part in [channel.trim(), episode_guid_or_url.trim()] {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
