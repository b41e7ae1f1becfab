//! ============================================================================
//! Anonymous Identity - session-scoped opaque tokens
//! ============================================================================
//! Each session holds one random URL-safe token that keys rate-limit buckets
//! and reaction/tip attribution. Tokens come only from the OS random source.
//! ============================================================================

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{GateError, Result};
use crate::storage::{Scope, ScopedStore, TOKEN_KEY};

/// Random bytes per token (43 chars once base64url-encoded)
pub const TOKEN_BYTES: usize = 32;

/// Accepted encoded length range
pub const TOKEN_MIN_LEN: usize = 40;
pub const TOKEN_MAX_LEN: usize = 48;

/// Placeholder prefixes that mark hand-typed or copy-pasted fake tokens
const DENYLISTED_PREFIXES: &[&str] = &[
    "test",
    "admin",
    "demo",
    "fake",
    "null",
    "undefined",
    "placeholder",
];

const MAX_GENERATION_ATTEMPTS: usize = 8;

/// Source of cryptographically secure bytes
pub trait EntropySource: Send + Sync {
    fn fill(&self, buf: &mut [u8]) -> Result<()>;
}

/// Operating-system RNG
#[derive(Debug, Default, Clone, Copy)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, buf: &mut [u8]) -> Result<()> {
        OsRng
            .try_fill_bytes(buf)
            .map_err(|e| GateError::EntropyUnavailable(e.to_string()))
    }
}

/// Check a token's shape. False for empty, wrong length, non-URL-safe
/// characters, or a denylisted placeholder prefix.
pub fn validate_token(token: &str) -> bool {
    if token.is_empty() {
        return false;
    }

    if token.len() < TOKEN_MIN_LEN || token.len() > TOKEN_MAX_LEN {
        return false;
    }

    if !token
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        return false;
    }

    let lower = token.to_ascii_lowercase();
    !DENYLISTED_PREFIXES.iter().any(|p| lower.starts_with(p))
}

/// Short SHA-256 fingerprint for log lines; never log raw tokens
pub fn fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..6])
}

/// Issues and persists the anonymous session token
pub struct IdentityProvider {
    store: ScopedStore,
    entropy: Arc<dyn EntropySource>,
}

impl IdentityProvider {
    /// Provider backed by the OS RNG
    pub fn new(store: ScopedStore) -> Self {
        Self::with_entropy(store, Arc::new(OsEntropy))
    }

    pub fn with_entropy(store: ScopedStore, entropy: Arc<dyn EntropySource>) -> Self {
        Self { store, entropy }
    }

    /// Return the stored token if it is still well-formed, otherwise mint,
    /// store and return a fresh one
    pub fn get_or_create_token(&self) -> Result<String> {
        if let Some(existing) = self.store.get(Scope::Session, TOKEN_KEY)? {
            if validate_token(&existing) {
                return Ok(existing);
            }
            warn!("Stored anonymous token failed validation, regenerating");
        }

        self.issue()
    }

    /// Discard the current token and issue a new one (logout)
    pub fn regenerate(&self) -> Result<String> {
        self.clear()?;
        self.issue()
    }

    /// Remove the stored token. Returns true if one was present.
    pub fn clear(&self) -> Result<bool> {
        let removed = self.store.remove(Scope::Session, TOKEN_KEY)?;
        if removed {
            debug!("Cleared anonymous token");
        }
        Ok(removed)
    }

    pub fn validate(&self, token: &str) -> bool {
        validate_token(token)
    }

    fn issue(&self) -> Result<String> {
        let token = self.generate()?;
        self.store.set(Scope::Session, TOKEN_KEY, &token)?;
        info!("Issued anonymous token {}", fingerprint(&token));
        Ok(token)
    }

    fn generate(&self) -> Result<String> {
        for _ in 0..MAX_GENERATION_ATTEMPTS {
            let mut bytes = [0u8; TOKEN_BYTES];
            self.entropy.fill(&mut bytes)?;
            let token = URL_SAFE_NO_PAD.encode(bytes);

            // A random token can still start with a denylisted word
            if validate_token(&token) {
                return Ok(token);
            }
        }

        Err(GateError::EntropyUnavailable(format!(
            "no valid token after {} attempts",
            MAX_GENERATION_ATTEMPTS
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingEntropy;

    impl EntropySource for FailingEntropy {
        fn fill(&self, _buf: &mut [u8]) -> Result<()> {
            Err(GateError::EntropyUnavailable("device not ready".into()))
        }
    }

    /// Yields bytes that encode to a "test..." prefix first, then real bytes
    struct PlaceholderFirst {
        calls: std::sync::atomic::AtomicUsize,
    }

    impl EntropySource for PlaceholderFirst {
        fn fill(&self, buf: &mut [u8]) -> Result<()> {
            let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if call == 0 {
                // "test" in base64url decodes to b5 eb 2d
                buf.fill(0);
                buf[..3].copy_from_slice(&[0xb5, 0xeb, 0x2d]);
                Ok(())
            } else {
                OsEntropy.fill(buf)
            }
        }
    }

    #[test]
    fn test_generated_token_is_valid() {
        let provider = IdentityProvider::new(ScopedStore::in_memory());
        let token = provider.get_or_create_token().unwrap();
        assert_eq!(token.len(), 43);
        assert!(validate_token(&token));
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let provider = IdentityProvider::new(ScopedStore::in_memory());
        let first = provider.get_or_create_token().unwrap();
        let second = provider.get_or_create_token().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_corrupted_token_is_replaced() {
        let store = ScopedStore::in_memory();
        store.set(Scope::Session, TOKEN_KEY, "not a token").unwrap();

        let provider = IdentityProvider::new(store.clone());
        let token = provider.get_or_create_token().unwrap();
        assert!(validate_token(&token));
        assert_eq!(store.get(Scope::Session, TOKEN_KEY).unwrap(), Some(token));
    }

    #[test]
    fn test_regenerate_changes_token() {
        let provider = IdentityProvider::new(ScopedStore::in_memory());
        let first = provider.get_or_create_token().unwrap();
        let second = provider.regenerate().unwrap();
        assert_ne!(first, second);
        assert!(provider.clear().unwrap());
        assert!(!provider.clear().unwrap());
    }

    #[test]
    fn test_entropy_failure_is_fatal() {
        let store = ScopedStore::in_memory();
        let provider = IdentityProvider::with_entropy(store.clone(), Arc::new(FailingEntropy));
        let err = provider.get_or_create_token().unwrap_err();
        assert!(matches!(err, GateError::EntropyUnavailable(_)));
        assert_eq!(store.get(Scope::Session, TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_placeholder_prefix_is_regenerated() {
        let provider = IdentityProvider::with_entropy(
            ScopedStore::in_memory(),
            Arc::new(PlaceholderFirst {
                calls: std::sync::atomic::AtomicUsize::new(0),
            }),
        );
        let token = provider.get_or_create_token().unwrap();
        assert!(!token.to_ascii_lowercase().starts_with("test"));
        assert!(validate_token(&token));
    }

    #[test]
    fn test_validate_rejects_bad_shapes() {
        assert!(!validate_token(""));
        assert!(!validate_token("abcde"));
        assert!(!validate_token(&"a".repeat(TOKEN_MAX_LEN + 1)));

        let mut with_bad_char = "a".repeat(43);
        with_bad_char.replace_range(10..11, "+");
        assert!(!validate_token(&with_bad_char));

        let padded = format!("{}=", "a".repeat(42));
        assert!(!validate_token(&padded));
    }

    #[test]
    fn test_validate_rejects_placeholder_prefixes() {
        let tail = "x".repeat(39);
        assert!(!validate_token(&format!("test{}", tail)));
        assert!(!validate_token(&format!("ADMIN{}", &tail[1..])));
        assert!(!validate_token(&format!("demo{}", tail)));
        assert!(validate_token(&format!("abcd{}", tail)));
    }

    #[test]
    fn test_fingerprint_is_short_and_stable() {
        let fp = fingerprint("some-token");
        assert_eq!(fp.len(), 12);
        assert_eq!(fp, fingerprint("some-token"));
        assert_ne!(fp, fingerprint("other-token"));
    }
}
