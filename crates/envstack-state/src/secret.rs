//! Opaque secret material.
//!
//! `SecretValue` deliberately implements neither `Serialize` nor a revealing
//! `Debug`/`Display`, so a token cannot end up in logs or state files by
//! accident. Code that needs the clear text calls [`SecretValue::expose`].

use sha2::{Digest, Sha256};

/// A credential passed through to providers without ever being printed.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        SecretValue(value.into())
    }

    /// Borrow the clear-text value.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// SHA-256 hex of the value, used to fingerprint resources that embed it.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretValue(***)")
    }
}

impl std::fmt::Display for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("***")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_and_display_are_redacted() {
        let secret = SecretValue::new("ghp_supersecret");
        assert!(!format!("{:?}", secret).contains("supersecret"));
        assert!(!secret.to_string().contains("supersecret"));
        assert_eq!(secret.expose(), "ghp_supersecret");
    }

    #[test]
    fn test_digest_is_stable_and_distinct() {
        let a = SecretValue::new("one");
        let b = SecretValue::new("two");
        assert_eq!(a.digest(), SecretValue::new("one").digest());
        assert_ne!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);
    }
}
