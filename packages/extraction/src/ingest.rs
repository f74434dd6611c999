//! Document intake: format registry, text extraction seam, and FDS section
//! splitting.
//!
//! Format-specific parsing (PDF, Word, HTML) lives behind the
//! [`TextExtractor`] trait; this crate ships only [`PlainTextExtractor`].
//! Applications plug richer extractors in through the same trait.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use crate::error::{ProcessResult, ValidationError};

/// Extension (lower-cased, with dot) to human-readable type tag.
pub const SUPPORTED_FORMATS: &[(&str, &str)] = &[
    (".pdf", "PDF"),
    (".docx", "Word"),
    (".md", "Markdown"),
    (".markdown", "Markdown"),
    (".html", "HTML"),
    (".htm", "HTML"),
    (".txt", "Text"),
];

/// Look up the type tag for a path, if its extension is supported.
pub fn file_type_tag(path: &Path) -> Option<&'static str> {
    let ext = format!(
        ".{}",
        path.extension()?.to_str()?.to_ascii_lowercase()
    );
    SUPPORTED_FORMATS
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, tag)| *tag)
}

/// Sorted list of supported files directly inside a folder.
pub fn list_supported_files(folder: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(folder)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && file_type_tag(path).is_some())
        .collect();
    files.sort_by_key(|path| {
        path.file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    });
    Ok(files)
}

/// Extracted document text, with section boundaries when they were found.
#[derive(Debug, Clone, Default)]
pub struct DocumentText {
    pub text: String,

    /// FDS section number (1..=16) to section body.
    pub sections: Option<BTreeMap<u8, String>>,
}

impl DocumentText {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let sections = split_sections(&text);
        Self {
            text,
            sections: if sections.is_empty() {
                None
            } else {
                Some(sections)
            },
        }
    }
}

/// Narrow seam over format-specific text extraction.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Whether this extractor understands the file.
    fn can_handle(&self, path: &Path) -> bool;

    /// Read and extract the document text.
    async fn extract(&self, path: &Path) -> ProcessResult<DocumentText>;
}

/// Plain-text extractor for `.txt` and Markdown files.
#[derive(Debug, Default)]
pub struct PlainTextExtractor;

impl PlainTextExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    fn can_handle(&self, path: &Path) -> bool {
        matches!(
            path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()),
            Some(ref ext) if ext == "txt" || ext == "md" || ext == "markdown"
        )
    }

    async fn extract(&self, path: &Path) -> ProcessResult<DocumentText> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            ValidationError::Unreadable {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
        })?;
        Ok(DocumentText::new(text))
    }
}

fn section_heading_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(?:SECAO|SE\u{00C7}\u{00C3}O|Se\u{00E7}\u{00E3}o)\s+(\d{1,2})[\s\-:]+")
            .expect("section heading pattern is valid")
    })
}

/// Split raw text into numbered FDS sections.
///
/// Each heading like `SEÇÃO 14 - Informações sobre transporte` starts a
/// section that runs until the next heading. Returns an empty map when no
/// headings are present.
pub fn split_sections(text: &str) -> BTreeMap<u8, String> {
    let pattern = section_heading_pattern();
    let matches: Vec<_> = pattern.captures_iter(text).collect();
    let mut sections = BTreeMap::new();

    for (i, caps) in matches.iter().enumerate() {
        let number: u8 = match caps[1].parse() {
            Ok(n) if (1..=16).contains(&n) => n,
            _ => continue,
        };
        let whole = caps.get(0).expect("capture 0 always present");
        let start = whole.start();
        let end = matches
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(text.len());
        let body = text[start..end].trim();
        if !body.is_empty() {
            sections.insert(number, body.to_string());
        }
    }

    sections
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "SEÇÃO 1 - Identificação do produto\n\
        Nome do produto: Acetona\n\
        SEÇÃO 2 - Identificação de perigos\n\
        Líquido inflamável.\n\
        SEÇÃO 14 - Informações sobre transporte\n\
        Número ONU: 1090\n";

    #[test]
    fn splits_numbered_sections() {
        let sections = split_sections(SAMPLE);
        assert_eq!(sections.len(), 3);
        assert!(sections[&1].contains("Acetona"));
        assert!(sections[&14].contains("1090"));
    }

    #[test]
    fn accepts_unaccented_headings() {
        let sections = split_sections("SECAO 3: Composicao\ningredientes aqui\n");
        assert!(sections[&3].contains("ingredientes"));
    }

    #[test]
    fn no_headings_yields_empty_map() {
        assert!(split_sections("free-form text with no headings").is_empty());
    }

    #[test]
    fn document_text_detects_sections() {
        let doc = DocumentText::new(SAMPLE);
        assert!(doc.sections.is_some());
        let doc = DocumentText::new("plain body");
        assert!(doc.sections.is_none());
    }

    #[test]
    fn file_type_tags() {
        assert_eq!(file_type_tag(Path::new("a/fds.PDF")), Some("PDF"));
        assert_eq!(file_type_tag(Path::new("notes.txt")), Some("Text"));
        assert_eq!(file_type_tag(Path::new("image.png")), None);
    }

    #[tokio::test]
    async fn plain_text_extractor_handles_markdown() {
        let extractor = PlainTextExtractor::new();
        assert!(extractor.can_handle(Path::new("fds.md")));
        assert!(extractor.can_handle(Path::new("fds.txt")));
        assert!(!extractor.can_handle(Path::new("fds.pdf")));
    }
}
