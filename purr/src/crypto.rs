//! Encryption at rest
//!
//! `EncryptionGate` seals payloads with AES-256-GCM under a master key held in
//! the platform secret store. Sealed bytes are `MAGIC || nonce || ciphertext`.
//! Metadata strings are sealed to `enc:v1:<base64>` and open fail-open;
//! primary payloads open fail-closed. Whether stored bytes are sealed is
//! recorded by the caller (the row's `isSealed` flag, the `.enc` suffix).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::Engine;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::config::{ConfidentialityMode, VaultConfig};

const SEAL_MAGIC: &[u8; 4] = b"PVS1";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;
const METADATA_PREFIX: &str = "enc:v1:";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("no master key is available")]
    MissingKey,
    #[error("sealed data is malformed")]
    Malformed,
    #[error("sealed data failed authentication")]
    Decrypt,
    #[error("encryption failed")]
    Encrypt,
    #[error("master key has invalid length {0}")]
    InvalidKeyLength(usize),
    #[error("secret store error: {0}")]
    SecretStore(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// SECRET STORE
// ─────────────────────────────────────────────────────────────────────────────

/// Platform secret storage. `get` returns `Ok(None)` when no entry exists.
pub trait SecretStore: Send + Sync {
    fn get(&self, service: &str, account: &str) -> Result<Option<Vec<u8>>, CryptoError>;
    fn set(&self, service: &str, account: &str, secret: &[u8]) -> Result<(), CryptoError>;
}

/// OS keychain / credential manager / secret service
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyringSecretStore;

impl SecretStore for KeyringSecretStore {
    fn get(&self, service: &str, account: &str) -> Result<Option<Vec<u8>>, CryptoError> {
        let entry = keyring::Entry::new(service, account)
            .map_err(|e| CryptoError::SecretStore(format!("failed to access keyring entry: {}", e)))?;
        match entry.get_secret() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(CryptoError::SecretStore(e.to_string())),
        }
    }

    fn set(&self, service: &str, account: &str, secret: &[u8]) -> Result<(), CryptoError> {
        let entry = keyring::Entry::new(service, account)
            .map_err(|e| CryptoError::SecretStore(format!("failed to access keyring entry: {}", e)))?;
        entry
            .set_secret(secret)
            .map_err(|e| CryptoError::SecretStore(e.to_string()))
    }
}

/// Process-local secret store for tests and headless hosts
#[derive(Default)]
pub struct InMemorySecretStore {
    entries: Mutex<HashMap<(String, String), Zeroizing<Vec<u8>>>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for InMemorySecretStore {
    fn get(&self, service: &str, account: &str) -> Result<Option<Vec<u8>>, CryptoError> {
        Ok(self
            .entries
            .lock()
            .get(&(service.to_string(), account.to_string()))
            .map(|secret| secret.to_vec()))
    }

    fn set(&self, service: &str, account: &str, secret: &[u8]) -> Result<(), CryptoError> {
        self.entries.lock().insert(
            (service.to_string(), account.to_string()),
            Zeroizing::new(secret.to_vec()),
        );
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MASTER KEY
// ─────────────────────────────────────────────────────────────────────────────

/// 256-bit master key, zeroized on drop, never printed
pub struct MasterKey(Zeroizing<[u8; KEY_LEN]>);

impl MasterKey {
    fn from_secret(secret: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; KEY_LEN] = secret
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength(secret.len()))?;
        Ok(Self(Zeroizing::new(bytes)))
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0[..]))
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey([redacted])")
    }
}

/// Structural check on bytes already recorded as sealed. Plaintext may carry
/// the same header, so this never decides whether to open.
pub fn is_sealed(data: &[u8]) -> bool {
    data.len() >= SEAL_MAGIC.len() + NONCE_LEN + TAG_LEN && data.starts_with(SEAL_MAGIC)
}

// ─────────────────────────────────────────────────────────────────────────────
// ENCRYPTION GATE
// ─────────────────────────────────────────────────────────────────────────────

pub struct EncryptionGate {
    mode: ConfidentialityMode,
    secrets: Arc<dyn SecretStore>,
    service: String,
    account: String,
    key: OnceCell<Option<MasterKey>>,
}

impl fmt::Debug for EncryptionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionGate")
            .field("mode", &self.mode)
            .field("key_loaded", &self.key.get().map(|k| k.is_some()))
            .finish()
    }
}

impl EncryptionGate {
    pub fn new(
        mode: ConfidentialityMode,
        secrets: Arc<dyn SecretStore>,
        service: impl Into<String>,
        account: impl Into<String>,
    ) -> Self {
        Self {
            mode,
            secrets,
            service: service.into(),
            account: account.into(),
            key: OnceCell::new(),
        }
    }

    pub fn from_config(config: &VaultConfig, secrets: Arc<dyn SecretStore>) -> Self {
        Self::new(
            config.confidentiality,
            secrets,
            config.secret_service.clone(),
            config.secret_account.clone(),
        )
    }

    pub fn mode(&self) -> ConfidentialityMode {
        self.mode
    }

    /// Master key, loaded from the secret store on first use
    fn key(&self) -> Option<&MasterKey> {
        self.key
            .get_or_init(|| match self.secrets.get(&self.service, &self.account) {
                Ok(Some(secret)) => {
                    let secret = Zeroizing::new(secret);
                    match MasterKey::from_secret(&secret) {
                        Ok(key) => {
                            debug!("Loaded master key from secret store");
                            Some(key)
                        }
                        Err(e) => {
                            warn!(error = %e, "Ignoring unusable master key");
                            None
                        }
                    }
                }
                Ok(None) => None,
                Err(e) => {
                    warn!(error = %e, "Secret store unavailable; continuing without a master key");
                    None
                }
            })
            .as_ref()
    }

    /// Whether new writes will be sealed
    pub fn is_sealing(&self) -> bool {
        self.mode == ConfidentialityMode::Enabled && self.key().is_some()
    }

    /// Stored form of `plaintext`. Callers decide `sealed` once per item
    /// (from [`is_sealing`](Self::is_sealing)) and record it next to the bytes.
    pub fn protect(&self, plaintext: &[u8], sealed: bool) -> Result<Vec<u8>, CryptoError> {
        if !sealed {
            return Ok(plaintext.to_vec());
        }
        let key = self.key().ok_or(CryptoError::MissingKey)?;
        seal(key, plaintext)
    }

    /// Inverse of [`protect`](Self::protect). `sealed` is the recorded flag,
    /// not a guess from the bytes. Data sealed earlier stays sealed after
    /// confidentiality is switched off, so the mode is not consulted.
    /// Fails closed.
    pub fn open_payload(&self, data: &[u8], sealed: bool) -> Result<Vec<u8>, CryptoError> {
        if !sealed {
            return Ok(data.to_vec());
        }
        self.open_sealed(data)
    }

    /// Open bytes that must be sealed (e.g. `.enc` blobs)
    pub fn open_sealed(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if !is_sealed(data) {
            return Err(CryptoError::Malformed);
        }
        let key = self.key().ok_or(CryptoError::MissingKey)?;
        open(key, data)
    }

    /// Stored text form of a metadata string
    pub fn protect_metadata(&self, value: &str, sealed: bool) -> Result<String, CryptoError> {
        if !sealed {
            return Ok(value.to_string());
        }
        let key = self.key().ok_or(CryptoError::MissingKey)?;
        Ok(format!(
            "{}{}",
            METADATA_PREFIX,
            base64::engine::general_purpose::STANDARD.encode(seal(key, value.as_bytes())?)
        ))
    }

    /// Open a stored metadata string, reporting failures
    pub fn try_open_metadata(&self, stored: &str, sealed: bool) -> Result<String, CryptoError> {
        if !sealed {
            return Ok(stored.to_string());
        }
        let encoded = stored.strip_prefix(METADATA_PREFIX).ok_or(CryptoError::Malformed)?;
        let sealed_bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| CryptoError::Malformed)?;
        String::from_utf8(self.open_sealed(&sealed_bytes)?).map_err(|_| CryptoError::Malformed)
    }

    /// Open a stored metadata string. Fails open: any failure returns the
    /// stored value unchanged.
    pub fn open_metadata(&self, stored: &str, sealed: bool) -> String {
        self.try_open_metadata(stored, sealed).unwrap_or_else(|e| {
            debug!(error = %e, "Metadata could not be opened; returning stored form");
            stored.to_string()
        })
    }

    /// Generate and store a master key when none exists. Returns whether a
    /// key was created. Call before the first seal/open.
    pub fn provision_master_key(&self) -> Result<bool, CryptoError> {
        if let Some(existing) = self.secrets.get(&self.service, &self.account)? {
            MasterKey::from_secret(&Zeroizing::new(existing))?;
            return Ok(false);
        }
        let generated = Aes256Gcm::generate_key(&mut OsRng);
        self.secrets.set(&self.service, &self.account, generated.as_slice())?;
        let key = MasterKey::from_secret(generated.as_slice())?;
        if self.key.set(Some(key)).is_err() {
            warn!("Master key cell already initialized; new key takes effect on next launch");
        }
        info!(service = %self.service, "Provisioned new master key");
        Ok(true)
    }
}

fn seal(key: &MasterKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = key
        .cipher()
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::Encrypt)?;
    let mut sealed = Vec::with_capacity(SEAL_MAGIC.len() + NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(SEAL_MAGIC);
    sealed.extend_from_slice(nonce.as_slice());
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

fn open(key: &MasterKey, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let body = &sealed[SEAL_MAGIC.len()..];
    let (nonce, ciphertext) = body.split_at(NONCE_LEN);
    key.cipher()
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Decrypt)
}
