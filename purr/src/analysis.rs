//! Content analysis gating and the default pattern-based analyzer
//!
//! The vault decides *whether* an item is analyzed and caches the result on
//! the item; the analyzer itself is a collaborator behind
//! [`ClassificationAnalysisService`].

use crate::interface::SemanticType;
use once_cell::sync::Lazy;
use regex::Regex;

/// Analysis only looks at the first characters of an item
pub const ANALYSIS_SAMPLE_CHARS: usize = 4096;
/// Items with more searchable text than this are never analyzed
pub const ANALYSIS_MAX_CHARS: usize = 200_000;

const MAX_ENTITIES_PER_KIND: usize = 20;

/// Entities detected in an item's text sample
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectedEntities {
    pub emails: Vec<String>,
    pub phone_numbers: Vec<String>,
    pub code_language: Option<String>,
    pub is_markdown: bool,
    pub calculable_expression: Option<String>,
}

impl DetectedEntities {
    /// Entity kinds present, for projection. Values stay inside the vault.
    pub fn hints(&self) -> Vec<String> {
        let mut hints = Vec::new();
        if !self.emails.is_empty() {
            hints.push("email".to_string());
        }
        if !self.phone_numbers.is_empty() {
            hints.push("phoneNumber".to_string());
        }
        if let Some(language) = &self.code_language {
            hints.push(format!("language:{}", language));
        }
        if self.is_markdown {
            hints.push("markdown".to_string());
        }
        if self.calculable_expression.is_some() {
            hints.push("calculation".to_string());
        }
        hints
    }
}

/// Analyzer contract. Implementations must be pure with respect to the sample.
pub trait ClassificationAnalysisService: Send + Sync {
    fn analyze(&self, sample: &str) -> DetectedEntities;
}

/// Whether an item qualifies for analysis at all
pub fn should_analyze(semantic_type: SemanticType, searchable_text: &str) -> bool {
    let eligible = matches!(
        semantic_type,
        SemanticType::Text | SemanticType::RichText | SemanticType::Code
    );
    if !eligible || searchable_text.trim().is_empty() {
        return false;
    }
    // Cheap byte check first; chars <= bytes
    searchable_text.len() <= ANALYSIS_MAX_CHARS
        || searchable_text.chars().count() <= ANALYSIS_MAX_CHARS
}

/// First [`ANALYSIS_SAMPLE_CHARS`] characters, cut on a char boundary
pub fn bounded_sample(text: &str) -> &str {
    match text.char_indices().nth(ANALYSIS_SAMPLE_CHARS) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

static PHONE_CANDIDATE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\+?\d[\d\s\-().]{5,18}\d").unwrap());

static MARKDOWN_LINE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:#{1,6}\s|[-*+]\s|\d+\.\s|>\s|```|\|.*\|)").unwrap());

static MARKDOWN_INLINE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[^\]]+\]\([^)]+\)|\*\*[^*]+\*\*|`[^`]+`").unwrap());

static ARITHMETIC_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\d\s.+\-*/()%^]+$").unwrap());

static ARITHMETIC_OPERATOR_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d\s*[+\-*/%^]\s*[\d(]").unwrap());

/// (language, markers) in priority order for ties
const LANGUAGE_MARKERS: &[(&str, &[&str])] = &[
    ("rust", &["fn ", "let mut ", "impl ", "pub fn", "::", "-> ", "&self"]),
    ("python", &["def ", "elif ", "self.", "import ", "print(", "None"]),
    ("swift", &["func ", "guard ", "let ", "var ", "import Foundation", "?? "]),
    ("javascript", &["function ", "const ", "=> ", "console.", "===", "require("]),
    ("sql", &["SELECT ", "FROM ", "WHERE ", "INSERT INTO", "CREATE TABLE", "JOIN "]),
    ("shell", &["#!/bin", "echo ", "export ", "fi\n", "$(", "sudo "]),
];

const MIN_LANGUAGE_MARKERS: usize = 2;
const MIN_MARKDOWN_SIGNALS: usize = 2;

/// Default analyzer built on regexes and validator
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternAnalysis;

impl PatternAnalysis {
    fn emails(sample: &str) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        for token in sample.split(|c: char| c.is_whitespace() || ",;<>()[]\"'".contains(c)) {
            let candidate = token.trim_end_matches('.');
            let candidate = candidate.strip_prefix("mailto:").unwrap_or(candidate);
            if candidate.contains('@')
                && validator::validate_email(candidate)
                && !found.iter().any(|f| f == candidate)
            {
                found.push(candidate.to_string());
                if found.len() == MAX_ENTITIES_PER_KIND {
                    break;
                }
            }
        }
        found
    }

    fn phone_numbers(sample: &str) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        for candidate in PHONE_CANDIDATE_REGEX.find_iter(sample) {
            let number = candidate.as_str().trim();
            let digits = number.chars().filter(|c| c.is_ascii_digit()).count();
            if !(7..=15).contains(&digits) {
                continue;
            }
            if !found.iter().any(|f| f == number) {
                found.push(number.to_string());
                if found.len() == MAX_ENTITIES_PER_KIND {
                    break;
                }
            }
        }
        found
    }

    fn is_markdown(sample: &str) -> bool {
        let line_signals = sample
            .lines()
            .filter(|line| MARKDOWN_LINE_REGEX.is_match(line.trim_start()))
            .count();
        let inline_signals = MARKDOWN_INLINE_REGEX.find_iter(sample).count();
        line_signals + inline_signals >= MIN_MARKDOWN_SIGNALS
    }

    fn calculable_expression(sample: &str) -> Option<String> {
        let trimmed = sample.trim();
        if trimmed.contains('\n') || !ARITHMETIC_REGEX.is_match(trimmed) {
            return None;
        }
        ARITHMETIC_OPERATOR_REGEX
            .is_match(trimmed)
            .then(|| trimmed.to_string())
    }

    fn code_language(sample: &str) -> Option<String> {
        let mut best: Option<(&str, usize)> = None;
        for (language, markers) in LANGUAGE_MARKERS {
            let score = markers.iter().filter(|m| sample.contains(*m)).count();
            if score >= MIN_LANGUAGE_MARKERS && best.map_or(true, |(_, s)| score > s) {
                best = Some((*language, score));
            }
        }
        best.map(|(language, _)| language.to_string())
    }
}

impl ClassificationAnalysisService for PatternAnalysis {
    fn analyze(&self, sample: &str) -> DetectedEntities {
        DetectedEntities {
            emails: Self::emails(sample),
            phone_numbers: Self::phone_numbers(sample),
            code_language: Self::code_language(sample),
            is_markdown: Self::is_markdown(sample),
            calculable_expression: Self::calculable_expression(sample),
        }
    }
}
