//! purr-vault - local clipboard history engine
//!
//! Captures clipboard payloads, classifies them into semantic types, stores
//! them content-addressed with optional encryption at rest, and serves a
//! trust-gated projection of the store to a companion process.
//!
//! Types are exported via UniFFI proc-macros (#[derive(uniffi::Record/Enum)]).

pub mod analysis;
pub mod blob;
pub mod bridge;
pub mod broadcast;
pub mod classification;
pub mod config;
pub mod crypto;
pub mod database;
pub mod interface;
pub mod models;
pub(crate) mod runtime;
pub mod store;
pub mod system_clipboard;
pub mod thumbnail;

pub use config::{ConfidentialityMode, VaultConfig};
pub use interface::*;
pub use store::{BridgeHandle, ClipboardVault, VaultBuilder, VaultCore};

uniffi::setup_scaffolding!("purr_vault");
