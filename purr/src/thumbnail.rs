//! Bounded preview image derivation
//!
//! Thumbnails are memoized per item. The preview payload is tried first, then
//! the full payload under the preview ceiling, then a streaming decode from
//! disk. Anything that fails ends in a placeholder.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use image::{imageops::FilterType, DynamicImage, GenericImageView, ImageFormat, ImageReader, Limits};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::blob::{BlobError, TieredBlobResolver};
use crate::classification::{is_image_path, parse_file_paths};
use crate::crypto::EncryptionGate;
use crate::interface::SemanticType;
use crate::models::StoredItem;

/// Allocation ceiling for the streaming decode path
const STREAM_DECODE_MAX_ALLOC: u64 = 256 * 1024 * 1024;

/// Extensions of documents whose first page can be rendered
const PAGINATED_EXTENSIONS: &[&str] = &[
    "pdf", "key", "pages", "numbers", "doc", "docx", "ppt", "pptx", "xls", "xlsx", "odt", "odp",
    "epub",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderKind {
    Image,
    Document,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Thumbnail {
    Image { png: Vec<u8>, width: u32, height: u32 },
    Placeholder { kind: PlaceholderKind },
}

impl Thumbnail {
    pub fn png_bytes(&self) -> Option<&[u8]> {
        match self {
            Thumbnail::Image { png, .. } => Some(png),
            Thumbnail::Placeholder { .. } => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Thumbnail::Placeholder { .. })
    }
}

fn calculate_target_size(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    if width <= max_edge && height <= max_edge {
        return (width, height);
    }

    if width >= height {
        let scaled_height = ((height as f64) * (max_edge as f64) / (width as f64)).round() as u32;
        (max_edge, scaled_height.max(1))
    } else {
        let scaled_width = ((width as f64) * (max_edge as f64) / (height as f64)).round() as u32;
        (scaled_width.max(1), max_edge)
    }
}

/// Downsample a decoded image to `max_edge` and encode it as PNG
fn render(decoded: DynamicImage, max_edge: u32) -> image::ImageResult<Thumbnail> {
    let (original_width, original_height) = decoded.dimensions();
    let (target_width, target_height) = calculate_target_size(original_width, original_height, max_edge);

    let resized = if target_width == original_width && target_height == original_height {
        decoded
    } else {
        DynamicImage::ImageRgba8(image::imageops::resize(
            &decoded,
            target_width,
            target_height,
            FilterType::Triangle,
        ))
    };

    let (width, height) = resized.dimensions();
    let mut png = Vec::new();
    resized.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(Thumbnail::Image { png, width, height })
}

/// Decode in-memory image bytes into a bounded PNG thumbnail
pub fn downsample(bytes: &[u8], max_edge: u32) -> image::ImageResult<Thumbnail> {
    render(image::load_from_memory(bytes)?, max_edge)
}

/// Dimensions from an encoded image's header, without decoding pixels
pub fn read_image_size(bytes: &[u8]) -> Option<(u32, u32)> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

/// Decode straight from a file reader with allocation limits
fn stream_decode(path: &Path, max_edge: u32) -> image::ImageResult<Thumbnail> {
    let mut reader = ImageReader::open(path)?.with_guessed_format()?;
    let mut limits = Limits::default();
    limits.max_alloc = Some(STREAM_DECODE_MAX_ALLOC);
    reader.limits(limits);
    render(reader.decode()?, max_edge)
}

fn is_paginated_document(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| PAGINATED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Renders the first page of a paginated document (PDF, Keynote, ...)
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    /// Encoded image bytes of the first page, or `None` if it cannot be rendered
    async fn render_first_page(&self, path: &Path, max_edge: u32) -> Option<Vec<u8>>;
}

/// Handle to an asynchronously generated document thumbnail.
///
/// Dropping a pending handle does not stop generation; the result still lands
/// in the item's cache.
#[derive(Debug)]
pub enum DocumentThumbnail {
    NotApplicable,
    Ready(Option<Thumbnail>),
    Pending(JoinHandle<Option<Thumbnail>>),
}

impl DocumentThumbnail {
    pub async fn wait(self) -> Option<Thumbnail> {
        match self {
            DocumentThumbnail::NotApplicable => None,
            DocumentThumbnail::Ready(thumbnail) => thumbnail,
            DocumentThumbnail::Pending(handle) => handle.await.ok().flatten(),
        }
    }
}

pub struct ThumbnailCache {
    resolver: Arc<TieredBlobResolver>,
    gate: Arc<EncryptionGate>,
    max_edge: u32,
    renderer: Option<Arc<dyn DocumentRenderer>>,
}

impl ThumbnailCache {
    pub fn new(
        resolver: Arc<TieredBlobResolver>,
        gate: Arc<EncryptionGate>,
        max_edge: u32,
        renderer: Option<Arc<dyn DocumentRenderer>>,
    ) -> Self {
        Self { resolver, gate, max_edge, renderer }
    }

    pub fn max_edge(&self) -> u32 {
        self.max_edge
    }

    /// Memoized thumbnail. `None` for items that are not images.
    pub fn thumbnail(&self, item: &StoredItem) -> Option<Thumbnail> {
        if item.semantic_type() != SemanticType::Image {
            return None;
        }
        Some(item.derived().thumbnail.get_or_init(|| self.compute(item)).clone())
    }

    fn compute(&self, item: &StoredItem) -> Thumbnail {
        let placeholder = Thumbnail::Placeholder { kind: PlaceholderKind::Image };

        // A stored preview is authoritative; the full payload is never loaded
        if let Some(stored) = item.preview_payload() {
            return self
                .gate
                .open_payload(stored, item.is_sealed())
                .map_err(|e| e.to_string())
                .and_then(|bytes| downsample(&bytes, self.max_edge).map_err(|e| e.to_string()))
                .unwrap_or_else(|e| {
                    debug!(identity = %item.identity(), error = %e, "Preview payload unusable");
                    placeholder
                });
        }

        if let Some(path) = self.first_image_file(item) {
            return stream_decode(&path, self.max_edge).unwrap_or_else(|e| {
                debug!(identity = %item.identity(), error = %e, "Streaming decode of image file failed");
                placeholder
            });
        }

        match self.resolver.resolve_for_preview(item) {
            Ok(bytes) => downsample(&bytes, self.max_edge).unwrap_or_else(|e| {
                debug!(identity = %item.identity(), error = %e, "Image decode failed");
                placeholder
            }),
            Err(BlobError::TooLarge { size, .. }) => match self.resolver.streamable_path(item) {
                Some(path) => stream_decode(&path, self.max_edge).unwrap_or_else(|e| {
                    debug!(identity = %item.identity(), size, error = %e, "Streaming decode failed");
                    placeholder
                }),
                None => placeholder,
            },
            Err(e) => {
                debug!(identity = %item.identity(), error = %e, "Payload unavailable for thumbnail");
                placeholder
            }
        }
    }

    /// First image file referenced by a file-sourced image item
    fn first_image_file(&self, item: &StoredItem) -> Option<PathBuf> {
        if !item.is_file_sourced() {
            return None;
        }
        let bytes = self.resolver.resolve(item).ok()?;
        parse_file_paths(&bytes)
            .into_iter()
            .find(|path| is_image_path(path))
            .map(PathBuf::from)
    }

    /// Pixel dimensions of an image item. Bitmaps use the size recorded at
    /// capture; file-sourced images read the first file's header. The stored
    /// payload is never decoded here.
    pub fn image_size(&self, item: &StoredItem) -> Option<(u32, u32)> {
        if item.semantic_type() != SemanticType::Image {
            return None;
        }
        if let Some(size) = item.recorded_image_size() {
            return Some(size);
        }
        *item.derived().image_size.get_or_init(|| {
            let path = self.first_image_file(item)?;
            ImageReader::open(path).ok()?.with_guessed_format().ok()?.into_dimensions().ok()
        })
    }

    /// Start (or join) first-page rendering for a paginated document item.
    /// Must be called within a tokio runtime context.
    pub fn request_document_thumbnail(&self, item: &Arc<StoredItem>) -> DocumentThumbnail {
        let Some(renderer) = self.renderer.clone() else {
            return DocumentThumbnail::NotApplicable;
        };
        if item.semantic_type() != SemanticType::File {
            return DocumentThumbnail::NotApplicable;
        }
        if let Some(done) = item.derived().document_thumbnail.get() {
            return DocumentThumbnail::Ready(done.clone());
        }
        let document = match self.resolver.resolve(item) {
            Ok(bytes) => parse_file_paths(&bytes).into_iter().find(|p| is_paginated_document(p)),
            Err(e) => {
                debug!(identity = %item.identity(), error = %e, "Cannot resolve file list");
                None
            }
        };
        let Some(document) = document else {
            return DocumentThumbnail::NotApplicable;
        };

        let item = Arc::clone(item);
        let max_edge = self.max_edge;
        DocumentThumbnail::Pending(tokio::spawn(async move {
            item.derived()
                .document_thumbnail
                .get_or_init(|| async {
                    let rendered = renderer.render_first_page(Path::new(&document), max_edge).await?;
                    match downsample(&rendered, max_edge) {
                        Ok(thumbnail) => Some(thumbnail),
                        Err(e) => {
                            debug!(error = %e, "Rendered document page could not be decoded");
                            Some(Thumbnail::Placeholder { kind: PlaceholderKind::Document })
                        }
                    }
                })
                .await
                .clone()
        }))
    }
}
