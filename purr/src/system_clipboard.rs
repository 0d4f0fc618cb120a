//! Write-back to the system clipboard
//!
//! Copy-back tries an ordered list of representations and stops at the first
//! one the platform accepts.

use clipboard_rs::{common::RustImage, Clipboard, ClipboardContext, RustImageData};
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClipboardWriteError {
    #[error("clipboard unavailable: {0}")]
    Unavailable(String),
    #[error("clipboard rejected {kind}: {message}")]
    Rejected { kind: &'static str, message: String },
}

/// One candidate representation of an item on the system clipboard
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipboardRepresentation {
    Text(String),
    Image(Vec<u8>),
    Files(Vec<String>),
}

impl ClipboardRepresentation {
    pub fn kind(&self) -> &'static str {
        match self {
            ClipboardRepresentation::Text(_) => "text",
            ClipboardRepresentation::Image(_) => "image",
            ClipboardRepresentation::Files(_) => "files",
        }
    }
}

pub trait SystemClipboard: Send + Sync {
    fn write_text(&self, text: &str) -> Result<(), ClipboardWriteError>;
    fn write_image(&self, bytes: &[u8]) -> Result<(), ClipboardWriteError>;
    fn write_files(&self, paths: &[String]) -> Result<(), ClipboardWriteError>;

    fn write(&self, representation: &ClipboardRepresentation) -> Result<(), ClipboardWriteError> {
        match representation {
            ClipboardRepresentation::Text(text) => self.write_text(text),
            ClipboardRepresentation::Image(bytes) => self.write_image(bytes),
            ClipboardRepresentation::Files(paths) => self.write_files(paths),
        }
    }
}

fn rejected(kind: &'static str) -> impl Fn(Box<dyn std::error::Error + Send + Sync>) -> ClipboardWriteError {
    move |e| ClipboardWriteError::Rejected { kind, message: e.to_string() }
}

/// Platform clipboard via clipboard-rs. A context is opened per write since
/// contexts are not shareable across threads on every platform.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeClipboard;

impl NativeClipboard {
    fn context() -> Result<ClipboardContext, ClipboardWriteError> {
        ClipboardContext::new().map_err(|e| ClipboardWriteError::Unavailable(e.to_string()))
    }
}

impl SystemClipboard for NativeClipboard {
    fn write_text(&self, text: &str) -> Result<(), ClipboardWriteError> {
        Self::context()?.set_text(text.to_string()).map_err(rejected("text"))
    }

    fn write_image(&self, bytes: &[u8]) -> Result<(), ClipboardWriteError> {
        let image = RustImageData::from_bytes(bytes).map_err(rejected("image"))?;
        Self::context()?.set_image(image).map_err(rejected("image"))
    }

    fn write_files(&self, paths: &[String]) -> Result<(), ClipboardWriteError> {
        Self::context()?.set_files(paths.to_vec()).map_err(rejected("files"))
    }
}

/// Records writes instead of touching the platform clipboard. Kinds listed in
/// `refuse` fail, which lets callers exercise representation fallback.
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    writes: Mutex<Vec<ClipboardRepresentation>>,
    refuse: Vec<&'static str>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing(kinds: &[&'static str]) -> Self {
        Self { writes: Mutex::new(Vec::new()), refuse: kinds.to_vec() }
    }

    pub fn writes(&self) -> Vec<ClipboardRepresentation> {
        self.writes.lock().clone()
    }

    pub fn last(&self) -> Option<ClipboardRepresentation> {
        self.writes.lock().last().cloned()
    }

    fn record(&self, representation: ClipboardRepresentation) -> Result<(), ClipboardWriteError> {
        let kind = representation.kind();
        if self.refuse.contains(&kind) {
            return Err(ClipboardWriteError::Rejected { kind, message: "refused".to_string() });
        }
        self.writes.lock().push(representation);
        Ok(())
    }
}

impl SystemClipboard for MemoryClipboard {
    fn write_text(&self, text: &str) -> Result<(), ClipboardWriteError> {
        self.record(ClipboardRepresentation::Text(text.to_string()))
    }

    fn write_image(&self, bytes: &[u8]) -> Result<(), ClipboardWriteError> {
        self.record(ClipboardRepresentation::Image(bytes.to_vec()))
    }

    fn write_files(&self, paths: &[String]) -> Result<(), ClipboardWriteError> {
        self.record(ClipboardRepresentation::Files(paths.to_vec()))
    }
}
