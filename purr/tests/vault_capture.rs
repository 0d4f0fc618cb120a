//! Capture, storage tiers and projections through the vault API.

use std::io::Cursor;
use std::sync::Arc;

use image::{DynamicImage, ImageFormat, RgbImage};
use purr_vault::crypto::{is_sealed, InMemorySecretStore};
use purr_vault::database::Database;
use purr_vault::models::PayloadLocation;
use purr_vault::system_clipboard::{ClipboardRepresentation, MemoryClipboard};
use purr_vault::{
    CaptureOutcome, ConfidentialityMode, SemanticType, SourceFormat, VaultBuilder, VaultConfig, VaultCore, VaultError,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

// ============================================================
// Fixtures
// ============================================================

struct Fixture {
    dir: TempDir,
    vault: VaultCore,
    clipboard: Arc<MemoryClipboard>,
}

fn open(dir: TempDir, config: VaultConfig, clipboard: Arc<MemoryClipboard>) -> Fixture {
    let vault = VaultBuilder::new(config)
        .secret_store(Arc::new(InMemorySecretStore::new()))
        .system_clipboard(clipboard.clone())
        .build()
        .unwrap();
    Fixture { dir, vault, clipboard }
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let config = VaultConfig::with_root(dir.path());
    open(dir, config, Arc::new(MemoryClipboard::new()))
}

fn fixture_with(configure: impl FnOnce(&mut VaultConfig)) -> Fixture {
    let dir = TempDir::new().unwrap();
    let mut config = VaultConfig::with_root(dir.path());
    configure(&mut config);
    open(dir, config, Arc::new(MemoryClipboard::new()))
}

fn capture(vault: &VaultCore, format: SourceFormat, raw: &[u8]) -> String {
    vault.capture(format, raw, Some("com.example.editor"), false).unwrap().identity().to_string()
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, image::Rgb([200, 40, 90])))
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

// ============================================================
// Classification at capture
// ============================================================

#[test]
fn url_projects_url_string_only() {
    let f = fixture();
    let identity = capture(&f.vault, SourceFormat::PlainText, b"https://example.com");

    let projection = f.vault.project_payload(&identity).unwrap();
    assert_eq!(projection.semantic_type, SemanticType::Url);
    assert_eq!(projection.url_string.as_deref(), Some("https://example.com"));
    assert_eq!(projection.populated_fields(), 1);

    let summary = f.vault.summary(&identity).unwrap();
    assert_eq!(summary.title, "example.com");
    assert_eq!(summary.origin_app.as_deref(), Some("com.example.editor"));
}

#[test]
fn file_lists_split_into_image_and_file() {
    let f = fixture();
    let images = capture(&f.vault, SourceFormat::FilePathList, b"/tmp/a.png\n/tmp/b.jpg");
    let mixed = capture(&f.vault, SourceFormat::FilePathList, b"/tmp/a.png\n/tmp/b.txt");

    let images = f.vault.project_payload(&images).unwrap();
    assert_eq!(images.semantic_type, SemanticType::Image);
    assert_eq!(images.file_paths, Some(vec!["/tmp/a.png".to_string(), "/tmp/b.jpg".to_string()]));
    assert!(images.image_data.is_none());

    let mixed_summary = f.vault.summary(&mixed).unwrap();
    assert_eq!(mixed_summary.semantic_type, SemanticType::File);
    assert_eq!(mixed_summary.title, "2 Files: a.png, b.txt");
    assert_eq!(mixed_summary.subtitle, "/tmp");
}

#[test]
fn whitespace_only_capture_is_rejected_without_row() {
    let f = fixture();
    let err = f
        .vault
        .capture(SourceFormat::PlainText, b"   \n  ", None, false)
        .unwrap_err();
    assert!(matches!(err, VaultError::InvalidArgument(_)));
    assert_eq!(f.vault.count_items().unwrap(), 0);
}

#[test]
fn rich_text_projects_extracted_text() {
    let f = fixture();
    let identity = capture(&f.vault, SourceFormat::Html, b"<p>Hello <b>there</b></p>");
    let projection = f.vault.project_payload(&identity).unwrap();
    assert_eq!(projection.semantic_type, SemanticType::RichText);
    assert_eq!(projection.text.as_deref(), Some("Hello there"));
}

#[test]
fn color_summary_shows_rgba() {
    let f = fixture();
    let identity = capture(&f.vault, SourceFormat::PlainText, b"#ff8000");
    let summary = f.vault.summary(&identity).unwrap();
    assert_eq!(summary.semantic_type, SemanticType::Color);
    assert_eq!(summary.subtitle, "#FF8000FF");
    assert_eq!(f.vault.project_payload(&identity).unwrap().text.as_deref(), Some("#ff8000"));
}

// ============================================================
// Identity and dedup
// ============================================================

#[test]
fn recapture_is_duplicate_and_moves_to_front() {
    let f = fixture();
    let first = capture(&f.vault, SourceFormat::PlainText, b"first");
    capture(&f.vault, SourceFormat::PlainText, b"second");

    let again = f.vault.capture(SourceFormat::PlainText, b"first", None, false).unwrap();
    assert_eq!(again, CaptureOutcome::Duplicate { identity: first.clone() });
    assert_eq!(f.vault.count_items().unwrap(), 2);

    let recent = f.vault.recent_summaries(10).unwrap();
    assert_eq!(recent[0].identity, first);
}

#[test]
fn identity_ignores_source_format() {
    let f = fixture();
    let plain = capture(&f.vault, SourceFormat::PlainText, b"same bytes");
    let other = f
        .vault
        .capture(SourceFormat::Other { tag: "public.data".into() }, b"same bytes", None, false)
        .unwrap();
    assert_eq!(other.identity(), plain);
    assert!(matches!(other, CaptureOutcome::Duplicate { .. }));
}

// ============================================================
// Storage tiers
// ============================================================

#[test]
fn inline_and_external_resolve_identically() {
    let f = fixture_with(|config| config.inline_threshold_bytes = 64);
    let short = "short text";
    let long = "a fairly long line of text ".repeat(20);

    let short_id = capture(&f.vault, SourceFormat::PlainText, short.as_bytes());
    let long_id = capture(&f.vault, SourceFormat::PlainText, long.as_bytes());

    assert_eq!(f.vault.project_payload(&short_id).unwrap().text.as_deref(), Some(short));
    assert_eq!(f.vault.project_payload(&long_id).unwrap().text.as_deref(), Some(long.as_str()));

    let blob = f.dir.path().join("blobs").join(&long_id[..2]).join(&long_id);
    assert!(blob.exists());
    assert!(!f.dir.path().join("blobs").join(&short_id[..2]).join(&short_id).exists());
}

#[test]
fn thumbnail_uses_preview_without_full_payload() {
    let f = fixture_with(|config| config.inline_threshold_bytes = 16);
    let identity = capture(&f.vault, SourceFormat::ImageBitmap, &png(600, 300));

    // The full payload is gone; only the stored preview remains usable
    std::fs::remove_file(f.dir.path().join("blobs").join(&identity[..2]).join(&identity)).unwrap();

    let item = f.vault.load_item(&identity).unwrap();
    let thumbnail = f.vault.thumbnails().thumbnail(&item).unwrap();
    assert!(!thumbnail.is_placeholder());

    let summary = f.vault.summarize(&item);
    assert!(summary.preview_image.is_some());
}

#[test]
fn recent_summaries_use_recorded_size_and_preview_only() {
    let dir = TempDir::new().unwrap();
    let mut config = VaultConfig::with_root(dir.path());
    config.inline_threshold_bytes = 16;
    let f = open(dir, config.clone(), Arc::new(MemoryClipboard::new()));
    let identity = capture(&f.vault, SourceFormat::ImageBitmap, &png(600, 300));

    // Fresh instance so nothing derived is cached, and no payload to read
    let reopened = VaultBuilder::new(config)
        .secret_store(Arc::new(InMemorySecretStore::new()))
        .system_clipboard(Arc::new(MemoryClipboard::new()))
        .build()
        .unwrap();
    std::fs::remove_file(f.dir.path().join("blobs").join(&identity[..2]).join(&identity)).unwrap();

    let summaries = reopened.recent_summaries(10).unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].title, "Image, 600x300");
    assert!(summaries[0].preview_image.is_some());
    assert!(matches!(reopened.project_payload(&identity), Err(VaultError::NotFound(_))));
}

#[test]
fn bitmap_projects_image_data() {
    let f = fixture();
    let bytes = png(20, 10);
    let identity = capture(&f.vault, SourceFormat::ImageBitmap, &bytes);

    let projection = f.vault.project_payload(&identity).unwrap();
    assert_eq!(projection.image_data, Some(bytes));
    assert_eq!(projection.populated_fields(), 1);

    let summary = f.vault.summary(&identity).unwrap();
    assert_eq!(summary.title, "Image, 20x10");
}

// ============================================================
// Confidentiality
// ============================================================

#[test]
fn plaintext_with_seal_header_roundtrips_in_both_tiers() {
    let text = "PVS1 is the name of our new release branch, ship it";
    for threshold in [256 * 1024, 16] {
        let f = fixture_with(|config| config.inline_threshold_bytes = threshold);
        let identity = capture(&f.vault, SourceFormat::PlainText, text.as_bytes());

        let projection = f.vault.project_payload(&identity).unwrap();
        assert_eq!(projection.text.as_deref(), Some(text), "threshold {}", threshold);
        let summary = f.vault.summary(&identity).unwrap();
        assert_eq!(summary.preview_text.as_deref(), Some(text));

        let shard = f.dir.path().join("blobs").join(&identity[..2]);
        assert!(!shard.join(format!("{}.enc", identity)).exists());
        assert_eq!(shard.join(&identity).exists(), threshold == 16);
    }
}

#[test]
fn confidential_vault_seals_at_rest() {
    let dir = TempDir::new().unwrap();
    let mut config = VaultConfig::with_root(dir.path());
    config.confidentiality = ConfidentialityMode::Enabled;
    let secrets = Arc::new(InMemorySecretStore::new());
    let vault = VaultBuilder::new(config.clone())
        .secret_store(secrets.clone())
        .system_clipboard(Arc::new(MemoryClipboard::new()))
        .provision_key(true)
        .build()
        .unwrap();

    let identity = capture(&vault, SourceFormat::PlainText, b"my bank pin is 4321");
    assert_eq!(
        vault.project_payload(&identity).unwrap().text.as_deref(),
        Some("my bank pin is 4321")
    );

    let db = Database::open(config.database_path(), config.busy_timeout()).unwrap();
    let record = db.find_by_identity(&identity).unwrap().unwrap();
    match &record.payload {
        PayloadLocation::Inline(bytes) => assert!(is_sealed(bytes)),
        other => panic!("expected inline payload, got {:?}", other),
    }
    assert!(record.is_sealed);
    assert!(record.searchable_text.starts_with("enc:v1:"));
    assert!(!record.origin_app.unwrap().contains("editor"));
    drop(vault);

    // Same storage, no key: payloads fail closed, metadata fails open
    let keyless = VaultBuilder::new(config)
        .secret_store(Arc::new(InMemorySecretStore::new()))
        .system_clipboard(Arc::new(MemoryClipboard::new()))
        .build()
        .unwrap();
    assert!(matches!(
        keyless.project_payload(&identity),
        Err(VaultError::CryptoFailure(_))
    ));
    let summary = keyless.summary(&identity).unwrap();
    assert!(summary.origin_app.unwrap().starts_with("enc:v1:"));
    assert!(summary.content_hints.is_empty());
}

#[test]
fn confidential_external_blob_is_sealed() {
    let dir = TempDir::new().unwrap();
    let mut config = VaultConfig::with_root(dir.path());
    config.confidentiality = ConfidentialityMode::Enabled;
    config.inline_threshold_bytes = 32;
    let vault = VaultBuilder::new(config)
        .secret_store(Arc::new(InMemorySecretStore::new()))
        .system_clipboard(Arc::new(MemoryClipboard::new()))
        .provision_key(true)
        .build()
        .unwrap();

    let text = "confidential paragraph ".repeat(10);
    let identity = capture(&vault, SourceFormat::PlainText, text.as_bytes());
    let sealed = dir
        .path()
        .join("blobs")
        .join(&identity[..2])
        .join(format!("{}.enc", identity));
    let on_disk = std::fs::read(sealed).unwrap();
    assert!(is_sealed(&on_disk));
    assert_eq!(vault.project_payload(&identity).unwrap().text, Some(text));
}

// ============================================================
// Lifecycle
// ============================================================

#[test]
fn ephemeral_items_are_purged_on_reopen() {
    let dir = TempDir::new().unwrap();
    let config = VaultConfig::with_root(dir.path());
    let f = open(dir, config.clone(), Arc::new(MemoryClipboard::new()));
    let kept = capture(&f.vault, SourceFormat::PlainText, b"keep me");
    let transient = f
        .vault
        .capture(SourceFormat::PlainText, b"one-time code 123456", None, true)
        .unwrap()
        .identity()
        .to_string();
    assert_eq!(f.vault.count_items().unwrap(), 2);

    let Fixture { dir, vault, .. } = f;
    drop(vault);
    let reopened = open(dir, config, Arc::new(MemoryClipboard::new()));
    assert_eq!(reopened.vault.count_items().unwrap(), 1);
    assert!(reopened.vault.load_item(&kept).is_ok());
    assert!(matches!(reopened.vault.load_item(&transient), Err(VaultError::NotFound(_))));
}

#[tokio::test]
async fn delete_removes_row_and_blob_and_broadcasts() {
    let f = fixture_with(|config| config.inline_threshold_bytes = 16);
    let identity = capture(&f.vault, SourceFormat::PlainText, b"this payload goes to a blob file");
    let blob = f.dir.path().join("blobs").join(&identity[..2]).join(&identity);
    assert!(blob.exists());

    let mut deletions = f.vault.subscribe_deletions();
    let unknown = "f".repeat(64);
    let outcome = f.vault.delete_batch(
        &[identity.clone(), unknown.clone(), "nope".to_string()],
        &CancellationToken::new(),
    );

    assert_eq!(outcome.deleted, vec![identity.clone()]);
    assert_eq!(outcome.failed.len(), 2);
    assert_eq!(outcome.failed[0].identity, unknown);
    assert!(!blob.exists());
    assert_eq!(f.vault.count_items().unwrap(), 0);
    assert_eq!(deletions.recv().await.unwrap().identities, vec![identity]);
}

#[test]
fn cancelled_batch_reports_remaining_as_failed() {
    let f = fixture();
    let a = capture(&f.vault, SourceFormat::PlainText, b"a item");
    let b = capture(&f.vault, SourceFormat::PlainText, b"b item");
    let token = CancellationToken::new();
    token.cancel();

    let outcome = f.vault.delete_batch(&[a, b], &token);
    assert!(outcome.deleted.is_empty());
    assert_eq!(outcome.failed.len(), 2);
    assert_eq!(f.vault.count_items().unwrap(), 2);
}

// ============================================================
// System clipboard
// ============================================================

#[test]
fn copy_back_writes_text_and_touches() {
    let f = fixture();
    let old = capture(&f.vault, SourceFormat::PlainText, b"copy me back");
    capture(&f.vault, SourceFormat::PlainText, b"newer");

    f.vault.copy_to_system_clipboard(&old).unwrap();
    assert_eq!(f.clipboard.last(), Some(ClipboardRepresentation::Text("copy me back".into())));
    assert_eq!(f.vault.recent_summaries(1).unwrap()[0].identity, old);
}

#[test]
fn copy_back_falls_back_to_joined_paths() {
    let dir = TempDir::new().unwrap();
    let config = VaultConfig::with_root(dir.path());
    let f = open(dir, config, Arc::new(MemoryClipboard::refusing(&["files"])));
    let identity = capture(&f.vault, SourceFormat::FilePathList, b"/tmp/report.pdf\n/tmp/notes.txt");

    f.vault.copy_to_system_clipboard(&identity).unwrap();
    assert_eq!(
        f.clipboard.writes(),
        vec![ClipboardRepresentation::Text("/tmp/report.pdf\n/tmp/notes.txt".into())]
    );
}

#[test]
fn copy_back_fails_when_every_representation_is_refused() {
    let dir = TempDir::new().unwrap();
    let config = VaultConfig::with_root(dir.path());
    let f = open(dir, config, Arc::new(MemoryClipboard::refusing(&["text", "image", "files"])));
    let identity = capture(&f.vault, SourceFormat::PlainText, b"nowhere to go");

    let err = f.vault.copy_to_system_clipboard(&identity).unwrap_err();
    assert!(matches!(err, VaultError::IoFailure(_)));
    assert!(f.clipboard.writes().is_empty());
}
