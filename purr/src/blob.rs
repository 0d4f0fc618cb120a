//! Externalized payload storage and tier-transparent resolution
//!
//! Large payloads live as files under one managed root, sharded by the first
//! two identity characters: `<root>/<id[0..2]>/<id>[.enc]`. The `.enc` suffix
//! marks a sealed blob.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::crypto::{CryptoError, EncryptionGate};
use crate::models::{PayloadLocation, StoredItem};

/// Filename suffix of sealed blobs
pub const ENCRYPTED_SUFFIX: &str = ".enc";

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("blob path escapes the storage root: {0}")]
    OutsideRoot(String),
    #[error("blob is {size} bytes, above the {ceiling} byte preview ceiling")]
    TooLarge { size: u64, ceiling: u64 },
    #[error("blob IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Loads a stored blob by storage-relative path, returning decrypted bytes
pub trait BlobStorage: Send + Sync {
    fn load(&self, path: &str) -> Result<Vec<u8>, BlobError>;
}

/// Blob files owned by the vault under a single root directory
#[derive(Debug)]
pub struct ManagedBlobStore {
    root: PathBuf,
    gate: Arc<EncryptionGate>,
}

impl ManagedBlobStore {
    pub fn open(root: impl AsRef<Path>, gate: Arc<EncryptionGate>) -> Result<Self, BlobError> {
        fs::create_dir_all(root.as_ref())?;
        let root = root.as_ref().canonicalize()?;
        Ok(Self { root, gate })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_encrypted_path(relative: &str) -> bool {
        relative.ends_with(ENCRYPTED_SUFFIX)
    }

    /// Absolute path of an existing blob, guaranteed to lie under the root
    pub fn contained_path(&self, relative: &str) -> Result<PathBuf, BlobError> {
        let candidate = Path::new(relative);
        let escapes = candidate.components().any(|c| {
            matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_))
        });
        if escapes {
            return Err(BlobError::OutsideRoot(relative.to_string()));
        }
        let resolved = match self.root.join(candidate).canonicalize() {
            Ok(path) => path,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(BlobError::NotFound(relative.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        // Symlinks may still point outside
        if !resolved.starts_with(&self.root) {
            return Err(BlobError::OutsideRoot(relative.to_string()));
        }
        Ok(resolved)
    }

    /// Write a payload for `identity`, sealed when `sealed` is set.
    /// Returns the storage-relative path; sealed blobs carry the `.enc` suffix.
    pub fn write(&self, identity: &str, plaintext: &[u8], sealed: bool) -> Result<String, BlobError> {
        let shard = identity.get(..2).unwrap_or("00");
        let stored = self.gate.protect(plaintext, sealed)?;
        let suffix = if sealed { ENCRYPTED_SUFFIX } else { "" };
        let relative = format!("{}/{}{}", shard, identity, suffix);

        let dir = self.root.join(shard);
        fs::create_dir_all(&dir)?;
        let final_path = self.root.join(&relative);
        let tmp_path = dir.join(format!(".{}.tmp", identity));
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&stored)?;
            file.sync_all()?;
        }
        if let Err(e) = fs::rename(&tmp_path, &final_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        debug!(path = %relative, bytes = stored.len(), "Wrote blob");
        Ok(relative)
    }

    /// Stored bytes without opening the seal
    pub fn read_raw(&self, relative: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.contained_path(relative)?;
        Ok(fs::read(path)?)
    }

    pub fn size(&self, relative: &str) -> Result<u64, BlobError> {
        let path = self.contained_path(relative)?;
        Ok(fs::metadata(path)?.len())
    }

    /// Remove a blob file. `Ok(false)` when it was already gone.
    pub fn remove(&self, relative: &str) -> Result<bool, BlobError> {
        let path = match self.contained_path(relative) {
            Ok(path) => path,
            Err(BlobError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

impl BlobStorage for ManagedBlobStore {
    fn load(&self, path: &str) -> Result<Vec<u8>, BlobError> {
        let raw = self.read_raw(path)?;
        if Self::is_encrypted_path(path) {
            Ok(self.gate.open_sealed(&raw)?)
        } else {
            Ok(raw)
        }
    }
}

/// Hides whether an item's payload is inline or externalized
pub struct TieredBlobResolver {
    blobs: Arc<ManagedBlobStore>,
    gate: Arc<EncryptionGate>,
    preview_ceiling: u64,
}

impl TieredBlobResolver {
    pub fn new(blobs: Arc<ManagedBlobStore>, gate: Arc<EncryptionGate>, preview_ceiling: u64) -> Self {
        Self { blobs, gate, preview_ceiling }
    }

    pub fn preview_ceiling(&self) -> u64 {
        self.preview_ceiling
    }

    /// Full, decrypted payload bytes. Fails closed on crypto errors.
    pub fn resolve(&self, item: &StoredItem) -> Result<Vec<u8>, BlobError> {
        match item.payload() {
            PayloadLocation::Inline(bytes) => Ok(self.gate.open_payload(bytes, item.is_sealed())?),
            PayloadLocation::External { path } => self.blobs.load(path),
        }
    }

    /// Like [`resolve`](Self::resolve), but refuses objects above the preview
    /// ceiling without reading them
    pub fn resolve_for_preview(&self, item: &StoredItem) -> Result<Vec<u8>, BlobError> {
        let size = match item.payload() {
            PayloadLocation::Inline(bytes) => bytes.len() as u64,
            PayloadLocation::External { path } => self.blobs.size(path)?,
        };
        if size > self.preview_ceiling {
            return Err(BlobError::TooLarge { size, ceiling: self.preview_ceiling });
        }
        self.resolve(item)
    }

    /// On-disk path of an unsealed external payload, for streaming decoders
    pub fn streamable_path(&self, item: &StoredItem) -> Option<PathBuf> {
        match item.payload() {
            PayloadLocation::External { path } if !ManagedBlobStore::is_encrypted_path(path) => {
                self.blobs.contained_path(path).ok()
            }
            _ => None,
        }
    }
}
