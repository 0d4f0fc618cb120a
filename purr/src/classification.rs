//! Content classification for clipboard captures
//!
//! Maps a source format plus raw bytes to a semantic type. Pure functions,
//! no I/O: the same input always yields the same type.

use crate::interface::{SemanticType, SourceFormat};
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::path::Path;
use thiserror::Error;

/// Why a capture was refused before any row was written
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureRejection {
    #[error("payload is empty")]
    EmptyPayload,
    #[error("payload contains only whitespace")]
    WhitespaceOnly,
    #[error("file path list is empty")]
    EmptyPathList,
}

/// Common protocols accepted as links. Exotic schemes like javascript:,
/// data:, or custom-app:// are rejected to avoid misclassifying non-web
/// content as clickable links.
const LINK_PROTOCOLS: &[&str] = &["http://", "https://", "ftp://", "ftps://"];

const MAX_URL_CHARS: usize = 2000;

static HEX_COLOR_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^#(?:[0-9a-fA-F]{3}|[0-9a-fA-F]{4}|[0-9a-fA-F]{6}|[0-9a-fA-F]{8})$").unwrap()
});

const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "bmp", "tif", "tiff", "heic", "heif", "ico", "svg",
];

/// Keywords that start a line of code in common languages
const CODE_KEYWORDS: &[&str] = &[
    "fn", "let", "const", "var", "def", "class", "import", "from", "return", "if", "else",
    "elif", "for", "while", "pub", "use", "mod", "function", "struct", "enum", "impl", "trait",
    "package", "func", "public", "private", "protected", "static", "async", "await", "try",
    "catch", "match", "switch", "case", "interface", "type", "export", "module", "namespace",
    "template", "lambda", "val", "guard", "#include", "#import", "#define", "SELECT", "INSERT",
    "UPDATE", "DELETE", "CREATE", "ALTER", "DROP",
];

const CODE_SYMBOLS: &[char] = &['{', '}', '[', ']', '(', ')', ';', '=', '<', '>'];
const CODE_OPERATORS: &[&str] = &["=>", "->", "::", "==", "!=", "&&", "||", ":=", "+=", "-="];

const CODE_LINE_RATIO: f64 = 0.5;
const CODE_SYMBOL_DENSITY: f64 = 0.03;
const MIN_CODE_CHARS: usize = 8;

static RTF_DESTINATION_GROUP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\\(?:\*|fonttbl|colortbl|stylesheet|info|expandedcolortbl)[^{}]*(?:\{[^{}]*\}[^{}]*)*\}")
        .unwrap()
});
static RTF_PARAGRAPH: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\(?:par|line)\b ?").unwrap());
static RTF_HEX_ESCAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\'[0-9a-fA-F]{2}").unwrap());
static RTF_CONTROL_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\[a-zA-Z]+-?\d* ?").unwrap());

static HTML_SCRIPT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<script[^>]*>.*?</script>").unwrap());
static HTML_STYLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<style[^>]*>.*?</style>").unwrap());
static HTML_BLOCK_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<(?:br\s*/?|/p|/div|/li|/h[1-6]|/tr)>").unwrap());
static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());

/// Classify a captured payload. First matching rule wins.
pub fn classify(source_format: &SourceFormat, raw: &[u8]) -> Result<SemanticType, CaptureRejection> {
    match source_format {
        SourceFormat::ImageBitmap => {
            if raw.is_empty() {
                return Err(CaptureRejection::EmptyPayload);
            }
            Ok(SemanticType::Image)
        }
        SourceFormat::FilePathList => {
            let paths = parse_file_paths(raw);
            if paths.is_empty() {
                return Err(CaptureRejection::EmptyPathList);
            }
            if paths.iter().all(|path| is_image_path(path)) {
                Ok(SemanticType::Image)
            } else {
                Ok(SemanticType::File)
            }
        }
        SourceFormat::RichText | SourceFormat::Html => {
            let text = decode_text(raw)?;
            reject_blank(&extract_rich_text(source_format, &text))?;
            Ok(SemanticType::RichText)
        }
        SourceFormat::PlainText => {
            let text = decode_text(raw)?;
            reject_blank(&text)?;
            // Bytes that are not UTF-8 are kept as text without refinement
            if std::str::from_utf8(raw).is_err() {
                return Ok(SemanticType::Text);
            }
            Ok(classify_plain_text(&text))
        }
        SourceFormat::Other { .. } => {
            let text = decode_text(raw)?;
            reject_blank(&text)?;
            Ok(SemanticType::Text)
        }
    }
}

fn decode_text(raw: &[u8]) -> Result<Cow<'_, str>, CaptureRejection> {
    if raw.is_empty() {
        return Err(CaptureRejection::EmptyPayload);
    }
    Ok(String::from_utf8_lossy(raw))
}

fn reject_blank(text: &str) -> Result<(), CaptureRejection> {
    if text.trim().is_empty() {
        return Err(CaptureRejection::WhitespaceOnly);
    }
    Ok(())
}

fn classify_plain_text(text: &str) -> SemanticType {
    let trimmed = text.trim();
    if is_color(trimmed) {
        SemanticType::Color
    } else if is_valid_url(trimmed) {
        SemanticType::Url
    } else if looks_like_code(text) {
        SemanticType::Code
    } else {
        SemanticType::Text
    }
}

/// Check if a string looks like a URL with a common protocol
pub fn is_valid_url(text: &str) -> bool {
    let trimmed = text.trim();

    // validator doesn't check for newlines/length limits
    if trimmed.chars().count() > MAX_URL_CHARS || trimmed.contains('\n') {
        return false;
    }

    let lower = trimmed.to_lowercase();
    if !LINK_PROTOCOLS.iter().any(|p| lower.starts_with(p)) {
        return false;
    }

    validator::validate_url(trimmed)
}

/// Check if a string is a color value.
/// Supports hex (#RGB, #RGBA, #RRGGBB, #RRGGBBAA), rgb(), rgba(), hsl(), hsla()
pub fn is_color(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.starts_with('#') {
        return HEX_COLOR_REGEX.is_match(trimmed);
    }
    let lower = trimmed.to_lowercase();
    // Named colors like "red" stay text
    if lower.starts_with("rgb") || lower.starts_with("hsl") {
        csscolorparser::parse(trimmed).is_ok()
    } else {
        false
    }
}

/// Parse a color string to RGBA u32 (0xRRGGBBAA format)
/// Returns None if the string is not a valid color
pub fn parse_color_to_rgba(text: &str) -> Option<u32> {
    if !is_color(text) {
        return None;
    }
    let color = csscolorparser::parse(text.trim()).ok()?;
    let [r, g, b, a] = color.to_rgba8();
    Some(((r as u32) << 24) | ((g as u32) << 16) | ((b as u32) << 8) | (a as u32))
}

/// Split a file-path list payload into paths.
///
/// Entries are newline separated. `file://` URLs are converted to local paths
/// (percent-decoded); `#` lines from text/uri-list are skipped.
pub fn parse_file_paths(raw: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(raw)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            if line.get(..7).is_some_and(|scheme| scheme.eq_ignore_ascii_case("file://")) {
                url::Url::parse(line)
                    .ok()
                    .and_then(|url| url.to_file_path().ok())
                    .map(|path| path.to_string_lossy().into_owned())
            } else {
                Some(line.to_string())
            }
        })
        .collect()
}

/// Whether a path carries a recognized image extension (case-insensitive)
pub fn is_image_path(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

fn starts_with_keyword(line: &str) -> bool {
    let first = line
        .split(|c: char| c.is_whitespace() || c == '(' || c == '{' || c == ':' || c == '<')
        .next()
        .unwrap_or("");
    CODE_KEYWORDS.contains(&first)
}

fn is_structural_line(line: &str) -> bool {
    line.ends_with(';')
        || line.ends_with('{')
        || line.starts_with('}')
        || line.starts_with("//")
        || line.starts_with("/*")
        || line.starts_with("#!")
        || line.starts_with("<?")
        || CODE_OPERATORS.iter().any(|op| line.contains(op))
}

/// Line-based code heuristic: most non-empty lines must be keyword-led or
/// structural, and the text must be dense in code punctuation.
pub fn looks_like_code(text: &str) -> bool {
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if lines.is_empty() {
        return false;
    }

    let significant = text.chars().filter(|c| !c.is_whitespace()).count();
    if significant < MIN_CODE_CHARS {
        return false;
    }
    let symbols = text.chars().filter(|c| CODE_SYMBOLS.contains(c)).count();
    let density = symbols as f64 / significant as f64;

    let keyword_lines = lines.iter().filter(|l| starts_with_keyword(l)).count();
    let structural_lines = lines.iter().filter(|l| is_structural_line(l)).count();
    let signal_lines = lines
        .iter()
        .filter(|l| starts_with_keyword(l) || is_structural_line(l))
        .count();
    let ratio = signal_lines as f64 / lines.len() as f64;

    ratio >= CODE_LINE_RATIO
        && density >= CODE_SYMBOL_DENSITY
        && (keyword_lines > 0 || structural_lines >= 2)
}

/// Normalized text extracted at capture time for display and analysis
pub fn extract_searchable_text(source_format: &SourceFormat, raw: &[u8]) -> String {
    match source_format {
        SourceFormat::ImageBitmap => String::new(),
        SourceFormat::FilePathList => parse_file_paths(raw).join("\n"),
        SourceFormat::RichText | SourceFormat::Html => {
            extract_rich_text(source_format, &String::from_utf8_lossy(raw))
        }
        SourceFormat::PlainText | SourceFormat::Other { .. } => {
            String::from_utf8_lossy(raw).replace("\r\n", "\n")
        }
    }
}

fn extract_rich_text(source_format: &SourceFormat, text: &str) -> String {
    match source_format {
        SourceFormat::RichText => strip_rtf(text),
        SourceFormat::Html => strip_html(text),
        _ => text.to_string(),
    }
}

fn strip_rtf(rtf: &str) -> String {
    let text = RTF_DESTINATION_GROUP.replace_all(rtf, "");
    let text = RTF_PARAGRAPH.replace_all(&text, "\n");
    let text = RTF_HEX_ESCAPE.replace_all(&text, "");
    let text = text
        .replace("\\{", "\u{0}LBRACE")
        .replace("\\}", "\u{0}RBRACE")
        .replace("\\\\", "\u{0}BSLASH");
    let text = RTF_CONTROL_WORD.replace_all(&text, "");
    let text: String = text.chars().filter(|c| *c != '{' && *c != '}').collect();
    let text = text
        .replace("\u{0}LBRACE", "{")
        .replace("\u{0}RBRACE", "}")
        .replace("\u{0}BSLASH", "\\");
    tidy_lines(&text)
}

fn strip_html(html: &str) -> String {
    let text = HTML_SCRIPT.replace_all(html, "");
    let text = HTML_STYLE.replace_all(&text, "");
    let text = HTML_BLOCK_BREAK.replace_all(&text, "\n");
    let text = HTML_TAG.replace_all(&text, "");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    tidy_lines(&text)
}

fn tidy_lines(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Character count for text-like types, byte count otherwise
pub fn semantic_length(semantic_type: SemanticType, searchable_text: &str, raw_len: usize) -> u64 {
    if semantic_type.is_text_like() {
        searchable_text.chars().count() as u64
    } else {
        raw_len as u64
    }
}
