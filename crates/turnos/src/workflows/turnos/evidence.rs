//! Storage for the files that accompany a turno request.
//!
//! Uploads are validated here (allowed media types, size limits) before they reach an
//! [`EvidenceStorage`] backend. [`FileEvidenceStorage`] keeps files on disk under a
//! content-addressed, sharded layout:
//!
//! ```text
//! <root>/sha256/ab/ab3f9e…/<upload name>
//! ```
//!
//! The upload name is part of the path so two requests carrying identical bytes still own
//! separate files, and deleting one never removes the other.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Largest accepted upload.
pub const MAX_EVIDENCE_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    Prescription,
    IdentityCard,
}

impl EvidenceKind {
    pub const fn label(self) -> &'static str {
        match self {
            EvidenceKind::Prescription => "prescription",
            EvidenceKind::IdentityCard => "identity_card",
        }
    }
}

/// Opaque handle returned by a storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvidenceReference(pub String);

impl fmt::Display for EvidenceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait EvidenceStorage: Send + Sync {
    fn store(&self, bytes: &[u8], suggested_name: &str)
        -> Result<EvidenceReference, EvidenceError>;
    fn retrieve(&self, reference: &EvidenceReference) -> Result<Vec<u8>, EvidenceError>;
    fn delete(&self, reference: &EvidenceReference) -> Result<(), EvidenceError>;
}

#[derive(Debug, thiserror::Error)]
pub enum EvidenceError {
    #[error("evidence {0} not found")]
    NotFound(EvidenceReference),
    #[error("malformed evidence reference '{0}'")]
    InvalidReference(String),
    #[error("evidence storage failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Media types accepted for uploads, checked against the file's leading bytes.
pub fn detect_media_type(bytes: &[u8]) -> Option<mime::Mime> {
    if bytes.starts_with(b"%PDF-") {
        Some(mime::APPLICATION_PDF)
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(mime::IMAGE_JPEG)
    } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some(mime::IMAGE_PNG)
    } else {
        None
    }
}

/// Checks an upload and returns its media type. A declared or name-derived type must agree
/// with what the content looks like.
pub fn validate_upload(
    file_name: &str,
    declared: Option<&str>,
    bytes: &[u8],
) -> Result<mime::Mime, String> {
    if bytes.is_empty() {
        return Err(format!("{file_name} is empty"));
    }
    if bytes.len() > MAX_EVIDENCE_BYTES {
        return Err(format!(
            "{file_name} exceeds the {} MiB limit",
            MAX_EVIDENCE_BYTES / (1024 * 1024)
        ));
    }

    let detected = detect_media_type(bytes)
        .ok_or_else(|| format!("{file_name} must be a PDF, JPEG or PNG file"))?;

    let claimed = match declared {
        Some(raw) => Some(
            raw.parse::<mime::Mime>()
                .map_err(|_| format!("{file_name} declares an invalid content type '{raw}'"))?,
        ),
        None => mime_guess::from_path(file_name).first(),
    };
    if let Some(claimed) = claimed {
        if claimed.essence_str() != detected.essence_str() {
            return Err(format!(
                "{file_name} is declared as {} but its content is {}",
                claimed.essence_str(),
                detected.essence_str()
            ));
        }
    }

    Ok(detected)
}

/// Keeps evidence in process memory. Used by tests and the demo command.
#[derive(Debug, Default)]
pub struct MemoryEvidenceStorage {
    files: Mutex<HashMap<EvidenceReference, Vec<u8>>>,
    sequence: AtomicU64,
}

impl MemoryEvidenceStorage {
    pub fn len(&self) -> usize {
        self.files.lock().map(|files| files.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn files(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<EvidenceReference, Vec<u8>>>, EvidenceError>
    {
        self.files.lock().map_err(|_| {
            EvidenceError::Io(std::io::Error::other("evidence store mutex poisoned"))
        })
    }
}

impl EvidenceStorage for MemoryEvidenceStorage {
    fn store(
        &self,
        bytes: &[u8],
        suggested_name: &str,
    ) -> Result<EvidenceReference, EvidenceError> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let reference = EvidenceReference(format!(
            "memory/{sequence:06}/{}",
            sanitize_name(suggested_name)
        ));
        self.files()?.insert(reference.clone(), bytes.to_vec());
        Ok(reference)
    }

    fn retrieve(&self, reference: &EvidenceReference) -> Result<Vec<u8>, EvidenceError> {
        self.files()?
            .get(reference)
            .cloned()
            .ok_or_else(|| EvidenceError::NotFound(reference.clone()))
    }

    fn delete(&self, reference: &EvidenceReference) -> Result<(), EvidenceError> {
        self.files()?
            .remove(reference)
            .map(|_| ())
            .ok_or_else(|| EvidenceError::NotFound(reference.clone()))
    }
}

/// Disk-backed storage rooted at a directory created on demand.
#[derive(Debug, Clone)]
pub struct FileEvidenceStorage {
    root: PathBuf,
}

impl FileEvidenceStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a reference back onto the root, refusing anything outside the sharded layout.
    fn resolve(&self, reference: &EvidenceReference) -> Result<PathBuf, EvidenceError> {
        let invalid = || EvidenceError::InvalidReference(reference.0.clone());
        let parts: Vec<&str> = reference.0.split('/').collect();
        let [algorithm, shard, hash, name] = parts.as_slice() else {
            return Err(invalid());
        };

        let is_hex = |value: &str| value.chars().all(|c| c.is_ascii_hexdigit());
        if *algorithm != "sha256"
            || shard.len() != 2
            || hash.len() != 64
            || !is_hex(*shard)
            || !is_hex(*hash)
            || !hash.starts_with(*shard)
            || name.is_empty()
            || sanitize_name(name) != *name
        {
            return Err(invalid());
        }

        let relative = Path::new(reference.0.as_str());
        if relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            return Err(invalid());
        }

        Ok(self.root.join(relative))
    }
}

impl EvidenceStorage for FileEvidenceStorage {
    fn store(
        &self,
        bytes: &[u8],
        suggested_name: &str,
    ) -> Result<EvidenceReference, EvidenceError> {
        let hash = hex::encode(Sha256::digest(bytes));
        let reference = EvidenceReference(format!(
            "sha256/{}/{}/{}",
            &hash[..2],
            hash,
            sanitize_name(suggested_name)
        ));
        let path = self.resolve(&reference)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)?;
        Ok(reference)
    }

    fn retrieve(&self, reference: &EvidenceReference) -> Result<Vec<u8>, EvidenceError> {
        let path = self.resolve(reference)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(EvidenceError::NotFound(reference.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn delete(&self, reference: &EvidenceReference) -> Result<(), EvidenceError> {
        let path = self.resolve(reference)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                if let Some(parent) = path.parent() {
                    match fs::remove_dir(parent) {
                        Ok(()) => {}
                        Err(err)
                            if matches!(
                                err.kind(),
                                ErrorKind::DirectoryNotEmpty | ErrorKind::NotFound
                            ) => {}
                        Err(err) => {
                            debug!(path = %parent.display(), %err, "evidence directory kept");
                        }
                    }
                }
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(EvidenceError::NotFound(reference.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn sanitize_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}
