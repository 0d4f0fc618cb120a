//! Vault configuration
//!
//! One explicit object handed to every component at construction. Loaded from
//! TOML; every field has a default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Encryption-at-rest switch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidentialityMode {
    #[default]
    Disabled,
    Enabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Directory holding the database, blobs and the bridge socket
    pub storage_root: PathBuf,
    pub database_file: String,
    pub confidentiality: ConfidentialityMode,
    /// Payloads larger than this are written to an external blob
    pub inline_threshold_bytes: u64,
    /// Previews never load objects larger than this into memory
    pub preview_ceiling_bytes: u64,
    pub thumbnail_max_edge: u32,
    pub list_limit_max: u32,
    pub busy_timeout_ms: u64,
    /// Bundle identifier the bridge peer must be signed as
    pub companion_bundle_id: String,
    pub secret_service: String,
    pub secret_account: String,
    /// Defaults to `<storage_root>/bridge.sock`
    pub socket_path: Option<PathBuf>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("purr-vault"),
            database_file: "history.sqlite".to_string(),
            confidentiality: ConfidentialityMode::Disabled,
            inline_threshold_bytes: 256 * 1024,
            preview_ceiling_bytes: 32 * 1024 * 1024,
            thumbnail_max_edge: 256,
            list_limit_max: 50,
            busy_timeout_ms: 5_000,
            companion_bundle_id: "dev.purr.vault.companion".to_string(),
            secret_service: "purr-vault".to_string(),
            secret_account: "master-key".to_string(),
            socket_path: None,
        }
    }
}

impl VaultConfig {
    /// Defaults rooted at `root`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: root.into(),
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: VaultConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_file.trim().is_empty() {
            return Err(ConfigError::Invalid("database_file must not be empty".into()));
        }
        if self.list_limit_max == 0 {
            return Err(ConfigError::Invalid("list_limit_max must be at least 1".into()));
        }
        if self.thumbnail_max_edge < 16 {
            return Err(ConfigError::Invalid("thumbnail_max_edge must be at least 16".into()));
        }
        if self.preview_ceiling_bytes == 0 {
            return Err(ConfigError::Invalid("preview_ceiling_bytes must be positive".into()));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.storage_root.join(&self.database_file)
    }

    pub fn blob_root(&self) -> PathBuf {
        self.storage_root.join("blobs")
    }

    pub fn socket_path(&self) -> PathBuf {
        self.socket_path
            .clone()
            .unwrap_or_else(|| self.storage_root.join("bridge.sock"))
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}
