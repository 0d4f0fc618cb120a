//! ClipboardVault - Main API for host interop, designed for UniFFI export.
//!
//! `VaultCore` wires storage, blobs, encryption, thumbnails and analysis
//! together. The exported `ClipboardVault` object and the bridge service both
//! hold it behind `Arc`.
//!
//! Async Cancellation Architecture:
//! When the host cancels an async Task, UniFFI drops the Rust Future. We intercept this
//! via a DropGuard that triggers a CancellationToken. Blocking batch work checks
//! this token between items and stops early.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::analysis::{bounded_sample, should_analyze, ClassificationAnalysisService, DetectedEntities, PatternAnalysis};
use crate::blob::{BlobStorage, ManagedBlobStore, TieredBlobResolver};
use crate::bridge::PeerIdentityVerifier;
use crate::broadcast::{DeletionBroadcast, ItemsDeleted};
use crate::classification::{classify, extract_searchable_text, parse_color_to_rgba, parse_file_paths, semantic_length};
use crate::config::{ConfidentialityMode, VaultConfig};
use crate::crypto::{EncryptionGate, KeyringSecretStore, SecretStore};
use crate::database::Database;
use crate::interface::{
    CaptureOutcome, DeleteFailure, DeleteOutcome, ErrorCode, ItemSummary, PayloadProjection, SemanticType,
    SourceFormat, VaultError,
};
use crate::models::{
    file_display_name, identity_for, is_valid_identity, preview_line, text_preview, ItemRecord, PayloadLocation,
    StoredItem,
};
use crate::runtime::{init_rayon, runtime_handle};
use crate::system_clipboard::{ClipboardRepresentation, NativeClipboard, SystemClipboard};
use crate::thumbnail::{downsample, read_image_size, DocumentRenderer, DocumentThumbnail, ThumbnailCache};

/// Items kept alive in the in-process registry
const REGISTRY_CAPACITY: usize = 1024;

/// Characters shown in a summary title
const TITLE_CHARS: usize = 80;

/// RAII guard that cancels a token when dropped.
/// When the host cancels an async Task, UniFFI drops the Future, which drops this guard,
/// which triggers the cancellation token.
pub(crate) struct DropGuard {
    token: CancellationToken,
}

impl DropGuard {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self { token }
    }
}

impl Drop for DropGuard {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

fn invalid_identity(identity: &str) -> VaultError {
    if identity.is_empty() {
        VaultError::InvalidArgument("identity is empty".into())
    } else {
        VaultError::InvalidArgument("identity must be 64 lowercase hex characters".into())
    }
}

fn not_found(identity: &str) -> VaultError {
    VaultError::NotFound(format!("no item with identity {}", identity))
}

fn io_failure(context: &str, e: std::io::Error) -> VaultError {
    VaultError::IoFailure(format!("{}: {}", context, e))
}

fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let size = bytes as f64;
    if size < KB {
        format!("{} bytes", bytes)
    } else if size < KB * KB {
        format!("{:.1} KB", size / KB)
    } else {
        format!("{:.1} MB", size / (KB * KB))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUILDER
// ═══════════════════════════════════════════════════════════════════════════════

/// Assembles a [`VaultCore`] from configuration plus its collaborators.
/// Unset collaborators fall back to the platform implementations.
pub struct VaultBuilder {
    config: VaultConfig,
    secrets: Option<Arc<dyn SecretStore>>,
    analysis: Option<Arc<dyn ClassificationAnalysisService>>,
    clipboard: Option<Arc<dyn SystemClipboard>>,
    renderer: Option<Arc<dyn DocumentRenderer>>,
    provision_key: bool,
}

impl VaultBuilder {
    pub fn new(config: VaultConfig) -> Self {
        Self {
            config,
            secrets: None,
            analysis: None,
            clipboard: None,
            renderer: None,
            provision_key: false,
        }
    }

    pub fn secret_store(mut self, secrets: Arc<dyn SecretStore>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    pub fn analysis(mut self, analysis: Arc<dyn ClassificationAnalysisService>) -> Self {
        self.analysis = Some(analysis);
        self
    }

    pub fn system_clipboard(mut self, clipboard: Arc<dyn SystemClipboard>) -> Self {
        self.clipboard = Some(clipboard);
        self
    }

    pub fn document_renderer(mut self, renderer: Arc<dyn DocumentRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Create a master key before first use when confidentiality is enabled
    pub fn provision_key(mut self, provision: bool) -> Self {
        self.provision_key = provision;
        self
    }

    pub fn build(self) -> Result<VaultCore, VaultError> {
        self.config.validate()?;
        init_rayon();
        std::fs::create_dir_all(&self.config.storage_root)
            .map_err(|e| io_failure("cannot create storage root", e))?;
        let db = Database::open(self.config.database_path(), self.config.busy_timeout())?;
        self.assemble(db)
    }

    /// Vault with an in-memory database; blobs still go under the storage root
    #[cfg(test)]
    pub(crate) fn build_in_memory(self) -> Result<VaultCore, VaultError> {
        init_rayon();
        let db = Database::open_in_memory()?;
        self.assemble(db)
    }

    fn assemble(self, db: Database) -> Result<VaultCore, VaultError> {
        let secrets = self.secrets.unwrap_or_else(|| Arc::new(KeyringSecretStore));
        let gate = Arc::new(EncryptionGate::from_config(&self.config, secrets));
        if self.provision_key && self.config.confidentiality == ConfidentialityMode::Enabled {
            if gate.provision_master_key()? {
                info!("Provisioned a new master key");
            }
        }

        let blobs = Arc::new(ManagedBlobStore::open(self.config.blob_root(), Arc::clone(&gate))?);
        let resolver = Arc::new(TieredBlobResolver::new(
            Arc::clone(&blobs),
            Arc::clone(&gate),
            self.config.preview_ceiling_bytes,
        ));
        let thumbnails = ThumbnailCache::new(
            Arc::clone(&resolver),
            Arc::clone(&gate),
            self.config.thumbnail_max_edge,
            self.renderer,
        );

        let core = VaultCore {
            db: Arc::new(db),
            blobs,
            gate,
            resolver,
            thumbnails,
            analysis: self.analysis.unwrap_or_else(|| Arc::new(PatternAnalysis)),
            clipboard: self.clipboard.unwrap_or_else(|| Arc::new(NativeClipboard)),
            deletions: DeletionBroadcast::default(),
            items: RwLock::new(HashMap::new()),
            config: self.config,
        };

        let purged = core.purge_ephemeral()?;
        if purged > 0 {
            info!(purged, "Purged ephemeral items");
        }
        info!(
            root = %core.config.storage_root.display(),
            confidentiality = ?core.config.confidentiality,
            "Vault opened"
        );
        Ok(core)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VAULT CORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Thread-safe clipboard vault
///
/// Concurrency Model:
/// - Database uses r2d2 connection pool (concurrent reads, SQLite serializes writers)
/// - Items are shared through a bounded registry so derived caches survive across requests
/// - Summaries are built on the rayon pool
pub struct VaultCore {
    config: VaultConfig,
    db: Arc<Database>,
    blobs: Arc<ManagedBlobStore>,
    gate: Arc<EncryptionGate>,
    resolver: Arc<TieredBlobResolver>,
    thumbnails: ThumbnailCache,
    analysis: Arc<dyn ClassificationAnalysisService>,
    clipboard: Arc<dyn SystemClipboard>,
    deletions: DeletionBroadcast,
    items: RwLock<HashMap<String, Arc<StoredItem>>>,
}

impl VaultCore {
    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn gate(&self) -> &EncryptionGate {
        &self.gate
    }

    pub fn thumbnails(&self) -> &ThumbnailCache {
        &self.thumbnails
    }

    pub fn database_size(&self) -> Result<i64, VaultError> {
        Ok(self.db.database_size()?)
    }

    pub fn count_items(&self) -> Result<u64, VaultError> {
        Ok(self.db.count_items()?)
    }

    pub fn subscribe_deletions(&self) -> broadcast::Receiver<ItemsDeleted> {
        self.deletions.subscribe()
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Registry
    // ─────────────────────────────────────────────────────────────────────────────

    fn register(&self, record: ItemRecord) -> Arc<StoredItem> {
        if let Some(existing) = self.items.read().get(&record.identity) {
            return Arc::clone(existing);
        }
        let mut items = self.items.write();
        if let Some(existing) = items.get(&record.identity) {
            return Arc::clone(existing);
        }
        if items.len() >= REGISTRY_CAPACITY {
            let oldest = items
                .values()
                .min_by_key(|item| item.produced_at())
                .map(|item| item.identity().to_string());
            if let Some(oldest) = oldest {
                items.remove(&oldest);
            }
        }
        let item = Arc::new(StoredItem::from_record(record));
        items.insert(item.identity().to_string(), Arc::clone(&item));
        item
    }

    fn registered(&self, identity: &str) -> Option<Arc<StoredItem>> {
        self.items.read().get(identity).cloned()
    }

    fn evict(&self, identity: &str) {
        self.items.write().remove(identity);
    }

    /// Shared instance of a stored item
    pub fn load_item(&self, identity: &str) -> Result<Arc<StoredItem>, VaultError> {
        if !is_valid_identity(identity) {
            return Err(invalid_identity(identity));
        }
        if let Some(item) = self.registered(identity) {
            return Ok(item);
        }
        let record = self.db.find_by_identity(identity)?.ok_or_else(|| not_found(identity))?;
        Ok(self.register(record))
    }

    /// Most recent items, newest first
    pub fn recent_items(&self, limit: usize) -> Result<Vec<Arc<StoredItem>>, VaultError> {
        let records = self.db.fetch_recent(limit)?;
        Ok(records.into_iter().map(|record| self.register(record)).collect())
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Write Operations
    // ─────────────────────────────────────────────────────────────────────────────

    /// Classify and persist a payload. Re-capturing known bytes refreshes the
    /// existing item's timestamp instead of inserting.
    pub fn capture(
        &self,
        source_format: SourceFormat,
        raw: &[u8],
        origin_app: Option<&str>,
        is_ephemeral: bool,
    ) -> Result<CaptureOutcome, VaultError> {
        let semantic_type =
            classify(&source_format, raw).map_err(|e| VaultError::InvalidArgument(e.to_string()))?;
        let identity = identity_for(raw);

        if self.refresh(&identity)? {
            debug!(identity = %identity, "Duplicate capture refreshed");
            return Ok(CaptureOutcome::Duplicate { identity });
        }

        let searchable = extract_searchable_text(&source_format, raw);
        let length = semantic_length(semantic_type, &searchable, raw.len());
        // Decided once so every stored part of the item agrees
        let sealed = self.gate.is_sealing();
        let preview = self
            .capture_preview(&source_format, semantic_type, raw, &searchable)
            .map(|preview| self.gate.protect(&preview, sealed))
            .transpose()?;
        let image_size = match (semantic_type, &source_format) {
            (SemanticType::Image, SourceFormat::ImageBitmap) => read_image_size(raw),
            _ => None,
        };

        let payload = if raw.len() as u64 > self.config.inline_threshold_bytes {
            PayloadLocation::External {
                path: self.blobs.write(&identity, raw, sealed)?,
            }
        } else {
            PayloadLocation::Inline(self.gate.protect(raw, sealed)?)
        };

        let record = ItemRecord {
            identity: identity.clone(),
            source_format,
            semantic_type,
            payload,
            preview,
            timestamp: Utc::now(),
            origin_app: origin_app
                .map(|app| self.gate.protect_metadata(app, sealed))
                .transpose()?,
            searchable_text: self.gate.protect_metadata(&searchable, sealed)?,
            length,
            tag: None,
            is_ephemeral,
            is_sealed: sealed,
            image_size,
        };

        match self.db.insert_item(&record) {
            Ok(true) => {
                info!(
                    identity = %identity,
                    semantic_type = semantic_type.database_str(),
                    external = record.payload.is_external(),
                    sealed,
                    "Captured item"
                );
                Ok(CaptureOutcome::Inserted { identity })
            }
            // A concurrent capture of the same bytes won the insert
            Ok(false) => {
                self.refresh(&identity)?;
                Ok(CaptureOutcome::Duplicate { identity })
            }
            Err(e) => {
                if let PayloadLocation::External { path } = &record.payload {
                    if let Err(cleanup) = self.blobs.remove(path) {
                        warn!(identity = %identity, error = %cleanup, "Orphaned blob after failed insert");
                    }
                }
                Err(e.into())
            }
        }
    }

    /// Derived snapshot stored next to the payload: leading text for text
    /// types, a downsized PNG for bitmaps
    fn capture_preview(
        &self,
        source_format: &SourceFormat,
        semantic_type: SemanticType,
        raw: &[u8],
        searchable: &str,
    ) -> Option<Vec<u8>> {
        match semantic_type {
            SemanticType::Text
            | SemanticType::RichText
            | SemanticType::Url
            | SemanticType::Color
            | SemanticType::Code => Some(text_preview(searchable).into_bytes()),
            SemanticType::Image if *source_format == SourceFormat::ImageBitmap => {
                match downsample(raw, self.config.thumbnail_max_edge) {
                    Ok(thumbnail) => thumbnail.png_bytes().map(<[u8]>::to_vec),
                    Err(e) => {
                        debug!(error = %e, "Bitmap preview not derivable at capture");
                        None
                    }
                }
            }
            SemanticType::Image | SemanticType::File => None,
        }
    }

    fn refresh(&self, identity: &str) -> Result<bool, VaultError> {
        let now = Utc::now();
        if !self.db.update_timestamp(identity, now)? {
            return Ok(false);
        }
        if let Some(item) = self.registered(identity) {
            item.touch(now);
        }
        Ok(true)
    }

    /// Refresh an item's timestamp so it sorts first
    pub fn touch(&self, identity: &str) -> Result<(), VaultError> {
        if !is_valid_identity(identity) {
            return Err(invalid_identity(identity));
        }
        if !self.refresh(identity)? {
            return Err(not_found(identity));
        }
        Ok(())
    }

    pub fn retag(&self, identity: &str, tag: Option<String>) -> Result<(), VaultError> {
        if !is_valid_identity(identity) {
            return Err(invalid_identity(identity));
        }
        let tag = tag.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
        if !self.db.update_tag(identity, tag.as_deref())? {
            return Err(not_found(identity));
        }
        if let Some(item) = self.registered(identity) {
            item.retag(tag);
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Derived Fields
    // ─────────────────────────────────────────────────────────────────────────────

    /// Decoded text of the payload; rich text yields its extracted plain text
    fn payload_text(&self, item: &StoredItem) -> Result<String, VaultError> {
        let raw = self.resolver.resolve(item)?;
        Ok(match item.source_format() {
            SourceFormat::RichText | SourceFormat::Html => extract_searchable_text(item.source_format(), &raw),
            _ => String::from_utf8_lossy(&raw).into_owned(),
        })
    }

    /// Memoized file list of a file or file-sourced image item
    pub fn file_paths(&self, item: &StoredItem) -> Result<Vec<String>, VaultError> {
        item.derived()
            .file_paths
            .get_or_try_init(|| {
                let raw = self.resolver.resolve(item)?;
                Ok::<_, VaultError>(parse_file_paths(&raw))
            })
            .cloned()
    }

    /// Memoized analysis of the item's searchable text. `None` text (sealed
    /// and not openable) is never analyzed.
    pub fn analysis_for(&self, item: &StoredItem, searchable: Option<&str>) -> Option<DetectedEntities> {
        item.derived()
            .analysis
            .get_or_init(|| {
                let searchable = searchable?;
                if !should_analyze(item.semantic_type(), searchable) {
                    return None;
                }
                Some(self.analysis.analyze(bounded_sample(searchable)))
            })
            .clone()
    }

    fn color_value(&self, item: &StoredItem, text: &str) -> Option<u32> {
        *item
            .derived()
            .color_value
            .get_or_init(|| parse_color_to_rgba(text.trim()))
    }

    /// Start first-page rendering for a document item
    pub fn request_document_thumbnail(&self, identity: &str) -> Result<DocumentThumbnail, VaultError> {
        let item = self.load_item(identity)?;
        let runtime = runtime_handle();
        let _enter = runtime.enter();
        Ok(self.thumbnails.request_document_thumbnail(&item))
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Projections
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn summarize(&self, item: &StoredItem) -> ItemSummary {
        let opened = self
            .gate
            .try_open_metadata(item.searchable_text(), item.is_sealed())
            .map_err(|e| debug!(identity = %item.identity(), error = %e, "Searchable text stays sealed"))
            .ok();
        let searchable = opened.clone().unwrap_or_else(|| item.searchable_text().to_string());
        let (title, subtitle) = self.describe(item, &searchable);

        let preview_text = if item.semantic_type().is_text_like() {
            item.preview_payload()
                .and_then(|stored| self.gate.open_payload(stored, item.is_sealed()).ok())
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        } else {
            None
        };

        let preview_image = match item.semantic_type() {
            SemanticType::Image => self.thumbnails.thumbnail(item),
            SemanticType::File => item.derived().document_thumbnail.get().cloned().flatten(),
            _ => None,
        }
        .and_then(|thumbnail| thumbnail.png_bytes().map(<[u8]>::to_vec));

        ItemSummary {
            identity: item.identity().to_string(),
            semantic_type: item.semantic_type(),
            title,
            subtitle,
            preview_text,
            preview_image,
            timestamp_unix: item.produced_at().timestamp(),
            origin_app: item
                .origin_app()
                .map(|app| self.gate.open_metadata(app, item.is_sealed())),
            length: item.length(),
            tag: item.tag(),
            content_hints: self
                .analysis_for(item, opened.as_deref())
                .map(|entities| entities.hints())
                .unwrap_or_default(),
        }
    }

    fn describe(&self, item: &StoredItem, searchable: &str) -> (String, String) {
        match item.semantic_type() {
            SemanticType::Text | SemanticType::RichText | SemanticType::Code => (
                preview_line(searchable, TITLE_CHARS),
                format!("{} characters", item.length()),
            ),
            SemanticType::Url => {
                let trimmed = searchable.trim();
                let host = url::Url::parse(trimmed)
                    .ok()
                    .and_then(|url| url.host_str().map(str::to_string))
                    .unwrap_or_else(|| preview_line(trimmed, TITLE_CHARS));
                (host, preview_line(trimmed, TITLE_CHARS))
            }
            SemanticType::Color => {
                let subtitle = match self.color_value(item, searchable) {
                    Some(rgba) => format!("#{:08X}", rgba),
                    None => "Color".to_string(),
                };
                (searchable.trim().to_string(), subtitle)
            }
            SemanticType::Image => {
                let title = match self.thumbnails.image_size(item) {
                    Some((width, height)) => format!("Image, {}x{}", width, height),
                    None => "Image".to_string(),
                };
                let subtitle = if item.is_file_sourced() {
                    file_display_name(&self.file_paths(item).unwrap_or_default())
                } else {
                    format_bytes(item.length())
                };
                (title, subtitle)
            }
            SemanticType::File => {
                let paths = self.file_paths(item).unwrap_or_default();
                let location = paths
                    .first()
                    .and_then(|first| Path::new(first).parent())
                    .map(|parent| parent.display().to_string())
                    .unwrap_or_default();
                (file_display_name(&paths), location)
            }
        }
    }

    /// Summaries of the most recent items, newest first
    pub fn recent_summaries(&self, limit: usize) -> Result<Vec<ItemSummary>, VaultError> {
        let items = self.recent_items(limit)?;
        // into_par_iter() on Vec<T> is indexed, so collect preserves recency order
        use rayon::prelude::*;
        Ok(items.into_par_iter().map(|item| self.summarize(&item)).collect())
    }

    pub fn summary(&self, identity: &str) -> Result<ItemSummary, VaultError> {
        let item = self.load_item(identity)?;
        Ok(self.summarize(&item))
    }

    /// Type-appropriate view of the payload with exactly one field populated
    pub fn project_payload(&self, identity: &str) -> Result<PayloadProjection, VaultError> {
        let item = self.load_item(identity)?;
        let mut projection = PayloadProjection::empty(item.identity(), item.semantic_type());
        match item.semantic_type() {
            SemanticType::Text | SemanticType::RichText | SemanticType::Code | SemanticType::Color => {
                projection.text = Some(self.payload_text(&item)?);
            }
            SemanticType::Url => {
                projection.url_string = Some(self.payload_text(&item)?.trim().to_string());
            }
            SemanticType::File => {
                projection.file_paths = Some(self.file_paths(&item)?);
            }
            SemanticType::Image if item.is_file_sourced() => {
                projection.file_paths = Some(self.file_paths(&item)?);
            }
            SemanticType::Image => {
                projection.image_data = Some(self.resolver.resolve(&item)?);
            }
        }
        Ok(projection)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Delete
    // ─────────────────────────────────────────────────────────────────────────────

    /// Remove the blob (if any) and the row of one item. When only one of the
    /// two goes away the error says so.
    pub fn delete_one(&self, identity: &str) -> Result<(), VaultError> {
        if !is_valid_identity(identity) {
            return Err(invalid_identity(identity));
        }
        let record = self.db.find_by_identity(identity)?.ok_or_else(|| not_found(identity))?;

        let blob_removal = match &record.payload {
            PayloadLocation::External { path } => {
                if let Err(e) = self.blobs.load(path) {
                    debug!(identity = %identity, error = %e, "Blob unreadable before delete");
                }
                Some(self.blobs.remove(path))
            }
            PayloadLocation::Inline(_) => None,
        };
        let row_removal = self.db.delete_item(identity);
        self.evict(identity);

        match (blob_removal, row_removal) {
            (Some(Ok(false)), Ok(true)) => {
                warn!(identity = %identity, "Deleted row whose blob was already missing");
                Ok(())
            }
            (_, Ok(false)) => Err(not_found(identity)),
            (Some(Err(blob)), Ok(true)) => {
                error!(identity = %identity, error = %blob, "Row deleted but blob removal failed");
                Err(VaultError::StorageCorrupt(format!(
                    "row deleted but blob removal failed: {}",
                    blob
                )))
            }
            (Some(Ok(true)), Err(row)) => {
                error!(identity = %identity, error = %row, "Blob removed but row deletion failed");
                Err(VaultError::StorageCorrupt(format!(
                    "blob removed but row deletion failed: {}",
                    row
                )))
            }
            (_, Err(row)) => Err(row.into()),
            (_, Ok(true)) => Ok(()),
        }
    }

    /// Delete identities one by one. Not transactional; once `token` is
    /// cancelled the remaining identities are reported as failed.
    pub fn delete_batch(&self, identities: &[String], token: &CancellationToken) -> DeleteOutcome {
        let mut outcome = DeleteOutcome::default();
        for identity in identities {
            if token.is_cancelled() {
                outcome.failed.push(DeleteFailure {
                    identity: identity.clone(),
                    code: ErrorCode::IoFailure,
                    message: "cancelled before deletion".to_string(),
                });
                continue;
            }
            match self.delete_one(identity) {
                Ok(()) => outcome.deleted.push(identity.clone()),
                Err(e) => {
                    debug!(identity = %identity, code = ?e.code(), "Delete failed");
                    outcome.failed.push(DeleteFailure {
                        identity: identity.clone(),
                        code: e.code(),
                        message: e.message().to_string(),
                    });
                }
            }
        }
        self.deletions.announce(outcome.deleted.clone());
        outcome
    }

    fn purge_ephemeral(&self) -> Result<usize, VaultError> {
        let mut purged = 0;
        for record in self.db.fetch_ephemeral()? {
            match self.delete_one(&record.identity) {
                Ok(()) => purged += 1,
                Err(e) => warn!(identity = %record.identity, error = %e, "Failed to purge ephemeral item"),
            }
        }
        Ok(purged)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // System Clipboard
    // ─────────────────────────────────────────────────────────────────────────────

    fn clipboard_representations(&self, item: &StoredItem) -> Result<Vec<ClipboardRepresentation>, VaultError> {
        Ok(match item.semantic_type() {
            SemanticType::Text
            | SemanticType::RichText
            | SemanticType::Url
            | SemanticType::Color
            | SemanticType::Code => vec![ClipboardRepresentation::Text(self.payload_text(item)?)],
            SemanticType::Image if !item.is_file_sourced() => {
                vec![ClipboardRepresentation::Image(self.resolver.resolve(item)?)]
            }
            SemanticType::Image | SemanticType::File => {
                let paths = self.file_paths(item)?;
                let joined = paths.join("\n");
                vec![ClipboardRepresentation::Files(paths), ClipboardRepresentation::Text(joined)]
            }
        })
    }

    /// Put an item back on the system clipboard, then refresh its timestamp
    pub fn copy_to_system_clipboard(&self, identity: &str) -> Result<(), VaultError> {
        let item = self.load_item(identity)?;
        let mut last_error = None;
        for representation in self.clipboard_representations(&item)? {
            match self.clipboard.write(&representation) {
                Ok(()) => {
                    self.touch(identity)?;
                    info!(identity = %identity, kind = representation.kind(), "Copied item to system clipboard");
                    return Ok(());
                }
                Err(e) => {
                    debug!(identity = %identity, kind = representation.kind(), error = %e, "Clipboard representation refused");
                    last_error = Some(e);
                }
            }
        }
        Err(VaultError::IoFailure(match last_error {
            Some(e) => format!("no clipboard representation was accepted: {}", e),
            None => "item has no clipboard representation".to_string(),
        }))
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Bridge
    // ─────────────────────────────────────────────────────────────────────────────

    /// Bind the bridge socket and serve it on the vault runtime
    #[cfg(unix)]
    pub fn spawn_bridge(self: &Arc<Self>, verifier: Arc<dyn PeerIdentityVerifier>) -> Result<BridgeHandle, VaultError> {
        use crate::bridge::{BridgeProjectionService, BridgeServer, BridgeTrustGate};

        let runtime = runtime_handle();
        let _enter = runtime.enter();
        let gate = Arc::new(BridgeTrustGate::new(verifier, self.config.companion_bundle_id.clone()));
        let server = Arc::new(BridgeServer::new(
            gate,
            BridgeProjectionService::new(Arc::clone(self)),
            self.config.socket_path(),
        ));
        let listener = server
            .bind()
            .map_err(|e| io_failure("cannot bind bridge socket", e))?;

        let token = CancellationToken::new();
        let socket_path = server.socket_path().to_path_buf();
        let task = runtime.spawn(Arc::clone(&server).serve(listener, token.clone()));
        Ok(BridgeHandle {
            token,
            task: Some(task),
            socket_path,
        })
    }

    #[cfg(not(unix))]
    pub fn spawn_bridge(self: &Arc<Self>, _verifier: Arc<dyn PeerIdentityVerifier>) -> Result<BridgeHandle, VaultError> {
        Err(VaultError::IoFailure("the bridge requires Unix-domain sockets".into()))
    }
}

/// Running bridge server. Dropping the handle stops it.
pub struct BridgeHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
    socket_path: PathBuf,
}

impl BridgeHandle {
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Stop accepting and wait for the listener to exit
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FFI OBJECT
// ═══════════════════════════════════════════════════════════════════════════════

/// Host-facing vault handle
#[derive(uniffi::Object)]
pub struct ClipboardVault {
    core: Arc<VaultCore>,
    bridge: Mutex<Option<BridgeHandle>>,
}

// Internal implementation (not exported via FFI)
impl ClipboardVault {
    pub fn from_core(core: VaultCore) -> Self {
        Self {
            core: Arc::new(core),
            bridge: Mutex::new(None),
        }
    }

    pub fn core(&self) -> &Arc<VaultCore> {
        &self.core
    }

    pub fn subscribe_deletions(&self) -> broadcast::Receiver<ItemsDeleted> {
        self.core.subscribe_deletions()
    }

    /// Start the bridge with a caller-chosen peer verifier
    pub fn start_bridge_with(&self, verifier: Arc<dyn PeerIdentityVerifier>) -> Result<String, VaultError> {
        let mut slot = self.bridge.lock();
        if let Some(running) = slot.as_ref() {
            return Ok(running.socket_path().display().to_string());
        }
        let handle = self.core.spawn_bridge(verifier)?;
        let path = handle.socket_path().display().to_string();
        *slot = Some(handle);
        Ok(path)
    }
}

// FFI-exported constructors (must be in standalone impl block)
#[uniffi::export]
impl ClipboardVault {
    /// Open (or create) a vault under `storage_root` with platform collaborators
    #[uniffi::constructor]
    pub fn new(storage_root: String, confidential: bool) -> Result<Self, VaultError> {
        let mut config = VaultConfig::with_root(storage_root);
        if confidential {
            config.confidentiality = ConfidentialityMode::Enabled;
        }
        let core = VaultBuilder::new(config).provision_key(confidential).build()?;
        Ok(Self::from_core(core))
    }

    /// Open a vault described by a TOML configuration file
    #[uniffi::constructor]
    pub fn open_with_config(config_path: String) -> Result<Self, VaultError> {
        let config = VaultConfig::load(Path::new(&config_path))?;
        let provision = config.confidentiality == ConfidentialityMode::Enabled;
        let core = VaultBuilder::new(config).provision_key(provision).build()?;
        Ok(Self::from_core(core))
    }
}

#[uniffi::export]
impl ClipboardVault {
    // ─────────────────────────────────────────────────────────────────────────────
    // Write Operations
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn capture(
        &self,
        source_format: SourceFormat,
        raw: Vec<u8>,
        origin_app: Option<String>,
        is_ephemeral: bool,
    ) -> Result<CaptureOutcome, VaultError> {
        self.core.capture(source_format, &raw, origin_app.as_deref(), is_ephemeral)
    }

    pub fn touch(&self, identity: String) -> Result<(), VaultError> {
        self.core.touch(&identity)
    }

    pub fn retag(&self, identity: String, tag: Option<String>) -> Result<(), VaultError> {
        self.core.retag(&identity, tag)
    }

    /// Delete items. Cancelling the call stops before the next identity.
    pub async fn delete(&self, identities: Vec<String>) -> DeleteOutcome {
        let token = CancellationToken::new();
        let _guard = DropGuard::new(token.clone());

        // runtime.spawn_blocking() because UniFFI doesn't provide a tokio runtime context
        let runtime = runtime_handle();
        let core = Arc::clone(&self.core);
        let requested = identities.clone();
        let token_clone = token.clone();
        let handle = runtime.spawn_blocking(move || core.delete_batch(&identities, &token_clone));

        match handle.await {
            Ok(outcome) => outcome,
            Err(_join_error) => DeleteOutcome {
                deleted: Vec::new(),
                failed: requested
                    .into_iter()
                    .map(|identity| DeleteFailure {
                        identity,
                        code: ErrorCode::IoFailure,
                        message: "delete worker failed".to_string(),
                    })
                    .collect(),
            },
        }
    }

    pub fn copy_to_system_clipboard(&self, identity: String) -> Result<(), VaultError> {
        self.core.copy_to_system_clipboard(&identity)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Read Operations
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn item(&self, identity: String) -> Result<ItemSummary, VaultError> {
        self.core.summary(&identity)
    }

    pub async fn recent_items(&self, limit: u32) -> Result<Vec<ItemSummary>, VaultError> {
        let core = Arc::clone(&self.core);
        runtime_handle()
            .spawn_blocking(move || core.recent_summaries(limit as usize))
            .await
            .map_err(|e| VaultError::IoFailure(format!("worker task failed: {}", e)))?
    }

    pub fn fetch_payload(&self, identity: String) -> Result<PayloadProjection, VaultError> {
        self.core.project_payload(&identity)
    }

    /// Get the database size in bytes
    pub fn database_size(&self) -> i64 {
        self.core.database_size().unwrap_or(0)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Bridge
    // ─────────────────────────────────────────────────────────────────────────────

    /// Start serving the companion over the bridge socket. Returns the socket path.
    pub fn start_bridge(&self) -> Result<String, VaultError> {
        self.start_bridge_with(Arc::new(crate::bridge::CodesignVerifier::default()))
    }

    pub fn stop_bridge(&self) {
        if self.bridge.lock().take().is_some() {
            info!("Bridge stop requested");
        }
    }
}

/// Map a pasteboard UTI or MIME type to a source format
#[uniffi::export]
pub fn source_format_for_tag(tag: String) -> SourceFormat {
    SourceFormat::from_tag(&tag)
}
