use crate::IdempotencyError;

/// Maximum accepted key length in bytes.
pub const MAX_KEY_LEN: usize = 255;

/// Client-supplied token identifying one logical request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Validates a raw key: non-empty, at most 255 bytes, visible ASCII only.
    pub fn parse(raw: &str) -> Result<Self, IdempotencyError> {
        if raw.is_empty() {
            return Err(IdempotencyError::MissingKey);
        }
        if raw.len() > MAX_KEY_LEN {
            return Err(IdempotencyError::InvalidKey(format!(
                "longer than {MAX_KEY_LEN} characters"
            )));
        }
        if !raw.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(IdempotencyError::InvalidKey(
                "must contain only visible ASCII characters".to_string(),
            ));
        }
        Ok(Self(raw.to_string()))
    }

    /// Validates an optional header value; `None` is a missing key.
    pub fn from_header(value: Option<&str>) -> Result<Self, IdempotencyError> {
        value
            .map(str::trim)
            .ok_or(IdempotencyError::MissingKey)
            .and_then(Self::parse)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_uuid_like_keys() {
        let key = IdempotencyKey::parse("c0a8012e-7f4b-4c1e-9b43-2f2d5b3b6a11").unwrap();
        assert_eq!(key.as_str(), "c0a8012e-7f4b-4c1e-9b43-2f2d5b3b6a11");
    }

    #[test]
    fn rejects_empty_and_missing() {
        assert!(matches!(
            IdempotencyKey::parse(""),
            Err(IdempotencyError::MissingKey)
        ));
        assert!(matches!(
            IdempotencyKey::from_header(None),
            Err(IdempotencyError::MissingKey)
        ));
        assert!(matches!(
            IdempotencyKey::from_header(Some("   ")),
            Err(IdempotencyError::MissingKey)
        ));
    }

    #[test]
    fn rejects_too_long_and_non_printable() {
        let long = "k".repeat(MAX_KEY_LEN + 1);
        assert!(matches!(
            IdempotencyKey::parse(&long),
            Err(IdempotencyError::InvalidKey(_))
        ));
        assert!(matches!(
            IdempotencyKey::parse("has space"),
            Err(IdempotencyError::InvalidKey(_))
        ));
        assert!(IdempotencyKey::parse(&"k".repeat(MAX_KEY_LEN)).is_ok());
    }
}
