use serde::{Deserialize, Serialize};

/// Business reference of a transaction (e.g. `TXN-100`).
///
/// This is the identity that crosses service boundaries: it is the outbox
/// aggregate id, the event partition key, and the correlation field of
/// fraud-check results.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionReference(String);

impl TransactionReference {
    /// Wraps an existing reference string.
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Generates a fresh `TXN-` prefixed reference.
    pub fn generate() -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        let suffix = NEXT_SUFFIX.fetch_add(1, std::sync::atomic::Ordering::Relaxed) % 10_000;
        Self(format!("TXN-{millis}-{suffix:04}"))
    }

    /// Returns the reference as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

static NEXT_SUFFIX: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

impl std::fmt::Display for TransactionReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionReference {
    fn from(reference: &str) -> Self {
        Self(reference.to_string())
    }
}

impl From<String> for TransactionReference {
    fn from(reference: String) -> Self {
        Self(reference)
    }
}

/// Identifier of the account a transaction debits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Wraps an existing account identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_references_are_unique() {
        let a = TransactionReference::generate();
        let b = TransactionReference::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("TXN-"));
    }

    #[test]
    fn reference_serializes_as_plain_string() {
        let reference = TransactionReference::from("TXN-100");
        let json = serde_json::to_string(&reference).unwrap();
        assert_eq!(json, "\"TXN-100\"");

        let back: TransactionReference = serde_json::from_str(&json).unwrap();
        assert_eq!(back, reference);
    }

    #[test]
    fn account_id_display() {
        assert_eq!(AccountId::from("acc-7").to_string(), "acc-7");
    }
}
