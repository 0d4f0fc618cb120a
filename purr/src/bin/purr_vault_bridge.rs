//! Headless host for the vault bridge.
//!
//! Opens the vault and serves the companion socket until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use purr_vault::bridge::CodesignVerifier;
use purr_vault::crypto::{EncryptionGate, KeyringSecretStore};
use purr_vault::{ConfidentialityMode, VaultBuilder, VaultConfig};

#[derive(Parser, Debug)]
#[command(name = "purr-vault-bridge", about = "Serve the clipboard vault to its companion process")]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Storage root (overrides the configuration)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Socket path (overrides the configuration)
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Bundle identifier the companion must be signed as
    #[arg(long)]
    companion: Option<String>,

    /// Seal payloads and metadata at rest
    #[arg(long)]
    confidential: bool,

    /// Create a master key in the keychain if none exists, then exit
    #[arg(long)]
    provision_key: bool,
}

impl Args {
    fn vault_config(&self) -> Result<VaultConfig> {
        let mut config = match &self.config {
            Some(path) => VaultConfig::load(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => VaultConfig::default(),
        };
        if let Some(root) = &self.root {
            config.storage_root = root.clone();
        }
        if let Some(socket) = &self.socket {
            config.socket_path = Some(socket.clone());
        }
        if let Some(companion) = &self.companion {
            config.companion_bundle_id = companion.clone();
        }
        if self.confidential {
            config.confidentiality = ConfidentialityMode::Enabled;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = args.vault_config()?;

    if args.provision_key {
        let gate = EncryptionGate::new(
            ConfidentialityMode::Enabled,
            Arc::new(KeyringSecretStore),
            config.secret_service.clone(),
            config.secret_account.clone(),
        );
        let created = gate.provision_master_key().context("Failed to provision master key")?;
        info!(created, "Master key ready");
        return Ok(());
    }

    let core = Arc::new(VaultBuilder::new(config).build()?);
    let bridge = core.spawn_bridge(Arc::new(CodesignVerifier::default()))?;
    info!(socket = %bridge.socket_path().display(), "Bridge ready");

    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    info!("Shutting down");
    bridge.shutdown().await;
    Ok(())
}
