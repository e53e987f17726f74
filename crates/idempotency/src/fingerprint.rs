use sha2::{Digest, Sha256};

/// SHA-256 digest identifying the content of a request.
///
/// A key reused with a different user, endpoint, or body produces a different
/// fingerprint and is rejected instead of replayed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestFingerprint(String);

impl RequestFingerprint {
    pub fn compute(user_id: &str, endpoint: &str, body: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        for part in [user_id.as_bytes(), endpoint.as_bytes(), body] {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part);
        }
        Self(hex::encode(hasher.finalize()))
    }

    /// Wraps a digest loaded from storage.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_request_same_fingerprint() {
        let a = RequestFingerprint::compute("u1", "POST /transactions", b"{\"amount\":1}");
        let b = RequestFingerprint::compute("u1", "POST /transactions", b"{\"amount\":1}");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn any_component_changes_fingerprint() {
        let base = RequestFingerprint::compute("u1", "POST /transactions", b"{}");
        assert_ne!(base, RequestFingerprint::compute("u2", "POST /transactions", b"{}"));
        assert_ne!(base, RequestFingerprint::compute("u1", "POST /refunds", b"{}"));
        assert_ne!(base, RequestFingerprint::compute("u1", "POST /transactions", b"[]"));
    }

    #[test]
    fn components_are_length_delimited() {
        assert_ne!(
            RequestFingerprint::compute("ab", "c", b""),
            RequestFingerprint::compute("a", "bc", b"")
        );
    }
}
