//! purr-vault FFI Interface Definition
//!
//! This file defines the public types shared with the host app via UniFFI and
//! with the bridge peer via the JSON wire protocol. It acts as the source of
//! truth for shared types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// ENUMS
// ═══════════════════════════════════════════════════════════════════════════════

/// Semantic content type, derived once at capture time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, uniffi::Enum)]
#[serde(rename_all = "camelCase")]
pub enum SemanticType {
    Text,
    RichText,
    Image,
    File,
    Url,
    Color,
    Code,
}

impl SemanticType {
    /// Storage tag for the `semanticType` column
    pub fn database_str(&self) -> &'static str {
        match self {
            SemanticType::Text => "text",
            SemanticType::RichText => "richText",
            SemanticType::Image => "image",
            SemanticType::File => "file",
            SemanticType::Url => "url",
            SemanticType::Color => "color",
            SemanticType::Code => "code",
        }
    }

    pub fn from_database_str(value: &str) -> Option<Self> {
        match value {
            "text" => Some(SemanticType::Text),
            "richText" => Some(SemanticType::RichText),
            "image" => Some(SemanticType::Image),
            "file" => Some(SemanticType::File),
            "url" => Some(SemanticType::Url),
            "color" => Some(SemanticType::Color),
            "code" => Some(SemanticType::Code),
            _ => None,
        }
    }

    /// Text-like types measure their length in characters, the rest in bytes
    pub fn is_text_like(&self) -> bool {
        match self {
            SemanticType::Text
            | SemanticType::RichText
            | SemanticType::Url
            | SemanticType::Color
            | SemanticType::Code => true,
            SemanticType::Image | SemanticType::File => false,
        }
    }
}

/// Format tag reported by the producing application
#[derive(Debug, Clone, PartialEq, Eq, Hash, uniffi::Enum)]
pub enum SourceFormat {
    PlainText,
    RichText,
    Html,
    ImageBitmap,
    FilePathList,
    Other { tag: String },
}

impl SourceFormat {
    /// Map a pasteboard UTI or MIME type to a source format
    pub fn from_tag(tag: &str) -> Self {
        let lower = tag.trim().to_ascii_lowercase();
        match lower.as_str() {
            "public.utf8-plain-text" | "public.plain-text" | "public.text" | "text/plain"
            | "text/plain;charset=utf-8" | "nsstringpboardtype" | "utf8_string" | "string" => {
                SourceFormat::PlainText
            }
            "public.rtf" | "public.rtfd" | "com.apple.flat-rtfd" | "text/rtf" | "application/rtf" => {
                SourceFormat::RichText
            }
            "public.html" | "text/html" => SourceFormat::Html,
            "public.file-url" | "public.url-name" | "nsfilenamespboardtype" | "text/uri-list"
            | "file/uri-list" => SourceFormat::FilePathList,
            "public.png" | "public.tiff" | "public.jpeg" | "public.image" | "com.compuserve.gif"
            | "org.webmproject.webp" | "com.microsoft.bmp" => SourceFormat::ImageBitmap,
            other if other.starts_with("image/") => SourceFormat::ImageBitmap,
            _ => SourceFormat::Other { tag: tag.trim().to_string() },
        }
    }

    /// Storage tag for the `sourceFormat` column
    pub fn database_str(&self) -> String {
        match self {
            SourceFormat::PlainText => "plainText".to_string(),
            SourceFormat::RichText => "richText".to_string(),
            SourceFormat::Html => "html".to_string(),
            SourceFormat::ImageBitmap => "imageBitmap".to_string(),
            SourceFormat::FilePathList => "filePathList".to_string(),
            SourceFormat::Other { tag } => format!("other:{}", tag),
        }
    }

    pub fn from_database_str(value: &str) -> Self {
        match value {
            "plainText" => SourceFormat::PlainText,
            "richText" => SourceFormat::RichText,
            "html" => SourceFormat::Html,
            "imageBitmap" => SourceFormat::ImageBitmap,
            "filePathList" => SourceFormat::FilePathList,
            other => SourceFormat::Other {
                tag: other.strip_prefix("other:").unwrap_or(other).to_string(),
            },
        }
    }
}

/// Result of a capture: a new row, or a re-copy of an existing identity
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Enum)]
pub enum CaptureOutcome {
    Inserted { identity: String },
    Duplicate { identity: String },
}

impl CaptureOutcome {
    pub fn identity(&self) -> &str {
        match self {
            CaptureOutcome::Inserted { identity } | CaptureOutcome::Duplicate { identity } => identity,
        }
    }
}

/// Failure codes reported to the bridge peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, uniffi::Enum)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    InvalidArgument,
    NotFound,
    Unauthorized,
    StorageBusy,
    StorageCorrupt,
    CryptoFailure,
    IoFailure,
}

// ═══════════════════════════════════════════════════════════════════════════════
// RECORDS (Structs)
// ═══════════════════════════════════════════════════════════════════════════════

/// Lightweight item projection for list display.
/// Never carries raw file contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, uniffi::Record)]
#[serde(rename_all = "camelCase")]
pub struct ItemSummary {
    pub identity: String,
    pub semantic_type: SemanticType,
    pub title: String,
    pub subtitle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_text: Option<String>,
    /// PNG thumbnail bytes (base64 on the wire)
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64_opt")]
    pub preview_image: Option<Vec<u8>>,
    pub timestamp_unix: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_app: Option<String>,
    pub length: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Kinds of entities detected by analysis ("email", "markdown", ...), never values
    #[serde(default)]
    pub content_hints: Vec<String>,
}

/// Full payload projection. Exactly one of the payload fields is populated,
/// chosen by the item's semantic type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, uniffi::Record)]
#[serde(rename_all = "camelCase")]
pub struct PayloadProjection {
    pub identity: String,
    pub semantic_type: SemanticType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_paths: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64_opt")]
    pub image_data: Option<Vec<u8>>,
}

impl PayloadProjection {
    pub(crate) fn empty(identity: &str, semantic_type: SemanticType) -> Self {
        Self {
            identity: identity.to_string(),
            semantic_type,
            text: None,
            url_string: None,
            file_paths: None,
            image_data: None,
        }
    }

    /// Number of populated payload fields (always 1 for a well-formed projection)
    pub fn populated_fields(&self) -> usize {
        [
            self.text.is_some(),
            self.url_string.is_some(),
            self.file_paths.is_some(),
            self.image_data.is_some(),
        ]
        .iter()
        .filter(|populated| **populated)
        .count()
    }
}

/// A single identity that could not be deleted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, uniffi::Record)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFailure {
    pub identity: String,
    pub code: ErrorCode,
    pub message: String,
}

/// Aggregate result of a batch delete. Not transactional: `deleted` stays
/// deleted even when `failed` is non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, uniffi::Record)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    pub deleted: Vec<String>,
    pub failed: Vec<DeleteFailure>,
}

impl DeleteOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Liveness probe result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, uniffi::Record)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub ok: bool,
    pub version: String,
}

/// Error type for purr-vault operations
#[derive(Debug, Clone, PartialEq, Eq, Error, uniffi::Error)]
pub enum VaultError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Storage busy: {0}")]
    StorageBusy(String),
    #[error("Storage corrupt: {0}")]
    StorageCorrupt(String),
    #[error("Crypto failure: {0}")]
    CryptoFailure(String),
    #[error("IO failure: {0}")]
    IoFailure(String),
}

impl VaultError {
    pub fn code(&self) -> ErrorCode {
        match self {
            VaultError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            VaultError::NotFound(_) => ErrorCode::NotFound,
            VaultError::Unauthorized(_) => ErrorCode::Unauthorized,
            VaultError::StorageBusy(_) => ErrorCode::StorageBusy,
            VaultError::StorageCorrupt(_) => ErrorCode::StorageCorrupt,
            VaultError::CryptoFailure(_) => ErrorCode::CryptoFailure,
            VaultError::IoFailure(_) => ErrorCode::IoFailure,
        }
    }

    /// Message without the code prefix, as sent across the bridge
    pub fn message(&self) -> &str {
        match self {
            VaultError::InvalidArgument(m)
            | VaultError::NotFound(m)
            | VaultError::Unauthorized(m)
            | VaultError::StorageBusy(m)
            | VaultError::StorageCorrupt(m)
            | VaultError::CryptoFailure(m)
            | VaultError::IoFailure(m) => m,
        }
    }
}

impl From<crate::database::DatabaseError> for VaultError {
    fn from(e: crate::database::DatabaseError) -> Self {
        use crate::database::DatabaseError;
        match e {
            DatabaseError::Busy(message) => VaultError::StorageBusy(message),
            DatabaseError::Corrupt(message) => VaultError::StorageCorrupt(message),
            other => VaultError::IoFailure(other.to_string()),
        }
    }
}

impl From<crate::blob::BlobError> for VaultError {
    fn from(e: crate::blob::BlobError) -> Self {
        use crate::blob::BlobError;
        match e {
            BlobError::NotFound(path) => VaultError::NotFound(format!("blob {} is missing", path)),
            BlobError::OutsideRoot(path) => {
                VaultError::StorageCorrupt(format!("blob path {} escapes the storage root", path))
            }
            BlobError::Crypto(inner) => inner.into(),
            other => VaultError::IoFailure(other.to_string()),
        }
    }
}

impl From<crate::crypto::CryptoError> for VaultError {
    fn from(e: crate::crypto::CryptoError) -> Self {
        VaultError::CryptoFailure(e.to_string())
    }
}

impl From<crate::config::ConfigError> for VaultError {
    fn from(e: crate::config::ConfigError) -> Self {
        VaultError::InvalidArgument(e.to_string())
    }
}

/// Optional byte fields travel as base64 strings in JSON
mod base64_opt {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_some(&base64::engine::general_purpose::STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| {
                base64::engine::general_purpose::STANDARD
                    .decode(s)
                    .map_err(serde::de::Error::custom)
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_format_from_tag() {
        assert_eq!(SourceFormat::from_tag("public.utf8-plain-text"), SourceFormat::PlainText);
        assert_eq!(SourceFormat::from_tag("text/html"), SourceFormat::Html);
        assert_eq!(SourceFormat::from_tag("public.rtf"), SourceFormat::RichText);
        assert_eq!(SourceFormat::from_tag("image/png"), SourceFormat::ImageBitmap);
        assert_eq!(SourceFormat::from_tag("public.file-url"), SourceFormat::FilePathList);
        assert_eq!(
            SourceFormat::from_tag("com.example.custom"),
            SourceFormat::Other { tag: "com.example.custom".to_string() }
        );
    }

    #[test]
    fn test_source_format_database_tag_roundtrip_for_other() {
        let format = SourceFormat::Other { tag: "com.example.custom".to_string() };
        assert_eq!(SourceFormat::from_database_str(&format.database_str()), format);
    }

    #[test]
    fn test_projection_serializes_url_string_only() {
        let mut projection = PayloadProjection::empty("abc", SemanticType::Url);
        projection.url_string = Some("https://example.com".to_string());
        let json = serde_json::to_value(&projection).unwrap();
        assert_eq!(json["urlString"], "https://example.com");
        assert!(json.get("text").is_none());
        assert_eq!(projection.populated_fields(), 1);
    }

    #[test]
    fn test_image_data_travels_as_base64() {
        let mut projection = PayloadProjection::empty("abc", SemanticType::Image);
        projection.image_data = Some(vec![0x89, 0x50, 0x4E, 0x47]);
        let json = serde_json::to_string(&projection).unwrap();
        assert!(json.contains("\"imageData\":\"iVBORw==\""));
        let decoded: PayloadProjection = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, projection);
    }

    #[test]
    fn test_error_code_and_message() {
        let err = VaultError::NotFound("no item".to_string());
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert_eq!(err.message(), "no item");
        assert_eq!(err.to_string(), "Not found: no item");
    }
}
