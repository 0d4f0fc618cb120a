//! Core data models for purr-vault
//!
//! `StoredItem` is the in-process, content-addressed record. It is shared
//! behind `Arc` so its lazily derived artifacts survive across requests.

use std::path::Path;

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use crate::analysis::DetectedEntities;
use crate::interface::{SemanticType, SourceFormat};
use crate::thumbnail::Thumbnail;

/// Text previews keep this many characters
pub const PREVIEW_TEXT_CHARS: usize = 200;

/// Length of a hex-encoded SHA-256 identity
pub const IDENTITY_HEX_LEN: usize = 64;

/// Content address of a raw payload: lowercase hex SHA-256
pub fn identity_for(raw: &[u8]) -> String {
    hex::encode(Sha256::digest(raw))
}

/// Whether a string is a well-formed identity (64 lowercase hex characters)
pub fn is_valid_identity(identity: &str) -> bool {
    identity.len() == IDENTITY_HEX_LEN
        && identity
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Where the canonical payload bytes live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadLocation {
    /// Bytes stored in the row, possibly sealed
    Inline(Vec<u8>),
    /// Storage-root-relative path of an externalized blob
    External { path: String },
}

impl PayloadLocation {
    pub fn is_external(&self) -> bool {
        matches!(self, PayloadLocation::External { .. })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ROW RECORD (storage shape)
// ─────────────────────────────────────────────────────────────────────────────

/// Persisted shape of an item, as read from and written to the `items` table.
/// Metadata fields hold their stored (possibly sealed) form.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemRecord {
    pub identity: String,
    pub source_format: SourceFormat,
    pub semantic_type: SemanticType,
    pub payload: PayloadLocation,
    pub preview: Option<Vec<u8>>,
    pub timestamp: DateTime<Utc>,
    pub origin_app: Option<String>,
    pub searchable_text: String,
    pub length: u64,
    pub tag: Option<String>,
    pub is_ephemeral: bool,
    /// Payload, preview and metadata were sealed at capture
    pub is_sealed: bool,
    /// Pixel dimensions of a bitmap image, read from its header at capture
    pub image_size: Option<(u32, u32)>,
}

// ─────────────────────────────────────────────────────────────────────────────
// DERIVED CACHE
// ─────────────────────────────────────────────────────────────────────────────

/// Kinds of lazily derived artifacts an item can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DerivedField {
    Thumbnail,
    ImageSize,
    FilePaths,
    ColorValue,
    Analysis,
    DocumentThumbnail,
}

/// Per-item one-time cells. Each field is computed at most once per item
/// instance; concurrent callers block on the first computation.
#[derive(Debug, Default)]
pub struct DerivedCache {
    pub(crate) thumbnail: OnceCell<Thumbnail>,
    pub(crate) image_size: OnceCell<Option<(u32, u32)>>,
    pub(crate) file_paths: OnceCell<Vec<String>>,
    pub(crate) color_value: OnceCell<Option<u32>>,
    pub(crate) analysis: OnceCell<Option<DetectedEntities>>,
    pub(crate) document_thumbnail: tokio::sync::OnceCell<Option<Thumbnail>>,
}

impl DerivedCache {
    pub fn is_computed(&self, field: DerivedField) -> bool {
        match field {
            DerivedField::Thumbnail => self.thumbnail.get().is_some(),
            DerivedField::ImageSize => self.image_size.get().is_some(),
            DerivedField::FilePaths => self.file_paths.get().is_some(),
            DerivedField::ColorValue => self.color_value.get().is_some(),
            DerivedField::Analysis => self.analysis.get().is_some(),
            DerivedField::DocumentThumbnail => self.document_thumbnail.initialized(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// STORED ITEM
// ─────────────────────────────────────────────────────────────────────────────

/// Content-addressed clipboard item.
///
/// Identity, formats and payload location are fixed at construction. Only the
/// timestamp (`touch`) and the tag (`retag`) change afterwards.
#[derive(Debug)]
pub struct StoredItem {
    identity: String,
    source_format: SourceFormat,
    semantic_type: SemanticType,
    payload: PayloadLocation,
    preview_payload: Option<Vec<u8>>,
    produced_at: RwLock<DateTime<Utc>>,
    origin_app: Option<String>,
    searchable_text: String,
    length: u64,
    tag: RwLock<Option<String>>,
    is_ephemeral: bool,
    is_sealed: bool,
    image_size: Option<(u32, u32)>,
    derived: DerivedCache,
}

impl StoredItem {
    pub fn from_record(record: ItemRecord) -> Self {
        Self {
            identity: record.identity,
            source_format: record.source_format,
            semantic_type: record.semantic_type,
            payload: record.payload,
            preview_payload: record.preview,
            produced_at: RwLock::new(record.timestamp),
            origin_app: record.origin_app,
            searchable_text: record.searchable_text,
            length: record.length,
            tag: RwLock::new(record.tag),
            is_ephemeral: record.is_ephemeral,
            is_sealed: record.is_sealed,
            image_size: record.image_size,
            derived: DerivedCache::default(),
        }
    }

    pub fn to_record(&self) -> ItemRecord {
        ItemRecord {
            identity: self.identity.clone(),
            source_format: self.source_format.clone(),
            semantic_type: self.semantic_type,
            payload: self.payload.clone(),
            preview: self.preview_payload.clone(),
            timestamp: self.produced_at(),
            origin_app: self.origin_app.clone(),
            searchable_text: self.searchable_text.clone(),
            length: self.length,
            tag: self.tag(),
            is_ephemeral: self.is_ephemeral,
            is_sealed: self.is_sealed,
            image_size: self.image_size,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn source_format(&self) -> &SourceFormat {
        &self.source_format
    }

    pub fn semantic_type(&self) -> SemanticType {
        self.semantic_type
    }

    pub fn payload(&self) -> &PayloadLocation {
        &self.payload
    }

    /// Stored preview bytes (possibly sealed)
    pub fn preview_payload(&self) -> Option<&[u8]> {
        self.preview_payload.as_deref()
    }

    pub fn produced_at(&self) -> DateTime<Utc> {
        *self.produced_at.read()
    }

    /// Stored origin app (possibly sealed)
    pub fn origin_app(&self) -> Option<&str> {
        self.origin_app.as_deref()
    }

    /// Stored searchable text (possibly sealed)
    pub fn searchable_text(&self) -> &str {
        &self.searchable_text
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn tag(&self) -> Option<String> {
        self.tag.read().clone()
    }

    pub fn is_ephemeral(&self) -> bool {
        self.is_ephemeral
    }

    /// Whether the stored payload, preview and metadata are sealed
    pub fn is_sealed(&self) -> bool {
        self.is_sealed
    }

    /// Bitmap dimensions recorded at capture
    pub fn recorded_image_size(&self) -> Option<(u32, u32)> {
        self.image_size
    }

    /// Whether this image item points at files rather than bitmap bytes
    pub fn is_file_sourced(&self) -> bool {
        self.source_format == SourceFormat::FilePathList
    }

    pub fn derived(&self) -> &DerivedCache {
        &self.derived
    }

    /// Refresh the capture timestamp
    pub fn touch(&self, at: DateTime<Utc>) {
        *self.produced_at.write() = at;
    }

    pub fn retag(&self, tag: Option<String>) {
        *self.tag.write() = tag;
    }
}

/// Collapse whitespace and cut to `max_chars` characters for one-line display
pub fn preview_line(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}…", &collapsed[..end]),
        None => collapsed,
    }
}

/// First [`PREVIEW_TEXT_CHARS`] characters of a text payload
pub fn text_preview(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_TEXT_CHARS) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}

/// Display name for a file list: "File: a", "2 Files: a, b", "N Files: a and N-1 more"
pub fn file_display_name(paths: &[String]) -> String {
    let names: Vec<&str> = paths
        .iter()
        .map(|p| {
            Path::new(p.trim_end_matches('/'))
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(p.as_str())
        })
        .collect();
    match names.len() {
        0 => "Files".to_string(),
        1 => format!("File: {}", names[0]),
        2 => format!("2 Files: {}, {}", names[0], names[1]),
        n => format!("{} Files: {} and {} more", n, names[0], n - 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(identity: &str) -> ItemRecord {
        ItemRecord {
            identity: identity.to_string(),
            source_format: SourceFormat::PlainText,
            semantic_type: SemanticType::Text,
            payload: PayloadLocation::Inline(b"hello".to_vec()),
            preview: Some(b"hello".to_vec()),
            timestamp: Utc::now(),
            origin_app: Some("com.example.editor".to_string()),
            searchable_text: "hello".to_string(),
            length: 5,
            tag: None,
            is_ephemeral: false,
            is_sealed: false,
            image_size: None,
        }
    }

    #[test]
    fn test_identity_is_deterministic() {
        let a = identity_for(b"same bytes");
        let b = identity_for(b"same bytes");
        assert_eq!(a, b);
        assert_eq!(a.len(), IDENTITY_HEX_LEN);
        assert_ne!(a, identity_for(b"other bytes"));
        assert!(is_valid_identity(&a));
    }

    #[test]
    fn test_identity_validation() {
        assert!(!is_valid_identity(""));
        assert!(!is_valid_identity("abc"));
        assert!(!is_valid_identity(&"G".repeat(IDENTITY_HEX_LEN)));
        assert!(!is_valid_identity(&"A".repeat(IDENTITY_HEX_LEN)));
        assert!(is_valid_identity(&"0a".repeat(IDENTITY_HEX_LEN / 2)));
    }

    #[test]
    fn test_touch_and_retag_are_the_only_mutations() {
        let item = StoredItem::from_record(record(&identity_for(b"hello")));
        let later = item.produced_at() + chrono::Duration::seconds(10);
        item.touch(later);
        item.retag(Some("work".to_string()));
        assert_eq!(item.produced_at(), later);
        assert_eq!(item.tag().as_deref(), Some("work"));
        assert_eq!(item.to_record().tag.as_deref(), Some("work"));
    }

    #[test]
    fn test_derived_cache_computes_once() {
        let item = StoredItem::from_record(record(&identity_for(b"hello")));
        assert!(!item.derived().is_computed(DerivedField::ColorValue));
        let mut calls = 0;
        let first = *item.derived().color_value.get_or_init(|| {
            calls += 1;
            Some(0xFF0000FF)
        });
        let second = *item.derived().color_value.get_or_init(|| {
            calls += 1;
            None
        });
        assert_eq!(first, second);
        assert_eq!(calls, 1);
        assert!(item.derived().is_computed(DerivedField::ColorValue));
    }

    #[test]
    fn test_file_display_name() {
        assert_eq!(file_display_name(&["/tmp/a.txt".into()]), "File: a.txt");
        assert_eq!(
            file_display_name(&["/tmp/a.txt".into(), "/tmp/b.txt".into()]),
            "2 Files: a.txt, b.txt"
        );
        assert_eq!(
            file_display_name(&["/a".into(), "/b".into(), "/c/".into()]),
            "3 Files: a and 2 more"
        );
    }

    #[test]
    fn test_preview_line_collapses_and_truncates() {
        assert_eq!(preview_line("  hello \n\t world ", 80), "hello world");
        assert_eq!(preview_line("abcdef", 3), "abc…");
    }

    #[test]
    fn test_text_preview_is_bounded() {
        let long = "x".repeat(PREVIEW_TEXT_CHARS * 2);
        assert_eq!(text_preview(&long).chars().count(), PREVIEW_TEXT_CHARS);
    }
}
