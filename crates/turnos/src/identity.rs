//! Lookup keys for national identity documents.
//!
//! Documents are normalized (separators dropped, letters uppercased) and hashed with
//! SHA-256 under a deployment pepper, so the same document always maps to the same key
//! while the raw number never needs to be stored.

use sha2::{Digest, Sha256};

use crate::workflows::turnos::IdentityHash;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("identity document is empty")]
    Empty,
    #[error("identity document may only contain letters, digits, dots, dashes and spaces")]
    InvalidCharacters,
}

/// Strips spaces, dots and dashes and uppercases letters: `"12.345.678-k"` becomes `"12345678K"`.
pub fn normalize_document(raw: &str) -> Result<String, IdentityError> {
    let mut normalized = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            ' ' | '.' | '-' | '\t' => {}
            c if c.is_ascii_alphanumeric() => normalized.push(c.to_ascii_uppercase()),
            _ => return Err(IdentityError::InvalidCharacters),
        }
    }

    if normalized.is_empty() {
        return Err(IdentityError::Empty);
    }
    Ok(normalized)
}

#[derive(Clone)]
pub struct IdentityHasher {
    pepper: String,
}

impl std::fmt::Debug for IdentityHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityHasher")
            .field("pepper", &"<redacted>")
            .finish()
    }
}

impl IdentityHasher {
    pub fn new(pepper: impl Into<String>) -> Self {
        Self {
            pepper: pepper.into(),
        }
    }

    pub fn hash(&self, raw_document: &str) -> Result<IdentityHash, IdentityError> {
        let normalized = normalize_document(raw_document)?;
        let mut hasher = Sha256::new();
        hasher.update(self.pepper.as_bytes());
        hasher.update(b":");
        hasher.update(normalized.as_bytes());
        Ok(IdentityHash(hex::encode(hasher.finalize())))
    }
}
