//! Signing-token and publish-link generation.
//!
//! Tokens are the sole credential a recipient holds, so they come from the
//! OS CSPRNG and are long enough that guessing is not a concern. Collisions
//! are closed out at insert time by a UNIQUE constraint, not here; callers
//! regenerate and retry on a constraint violation.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;

/// 256 bits of entropy for per-recipient signing tokens.
const TOKEN_BYTES: usize = 32;

/// Publish links are shorter: they only identify the document, access still
/// requires a recipient token.
const PUBLISH_LINK_BYTES: usize = 16;

/// A fresh per-recipient signing token (43 base64url chars).
pub fn generate_token() -> String {
    random_slug(TOKEN_BYTES)
}

/// A fresh opaque publish-link slug (22 base64url chars).
pub fn generate_publish_link() -> String {
    random_slug(PUBLISH_LINK_BYTES)
}

fn random_slug(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Expiry for a publish link: whole days from `now`.
pub fn expiry_from_days(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    now + Duration::days(days)
}

/// Lazy expiry check, evaluated on every access. `None` means no expiry set.
pub fn is_expired(now: DateTime<Utc>, expires_at: Option<DateTime<Utc>>) -> bool {
    expires_at.is_some_and(|at| now > at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn tokens_are_distinct_and_url_safe() {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let token = generate_token();
            assert_eq!(token.len(), 43);
            assert!(token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
            assert!(seen.insert(token), "token collision");
        }
    }

    #[test]
    fn publish_links_are_distinct_from_tokens() {
        let link = generate_publish_link();
        assert_eq!(link.len(), 22);
    }

    #[test]
    fn expiry_is_exclusive_at_the_boundary() {
        let now = Utc::now();
        let expires = expiry_from_days(now, 30);
        assert!(!is_expired(now, Some(expires)));
        assert!(!is_expired(expires, Some(expires)));
        assert!(is_expired(expires + Duration::seconds(1), Some(expires)));
        assert!(!is_expired(now, None));
    }
}
