//! Plain-text extraction from uploaded document bytes

use crate::error::{ExtractError, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::Read;
use tracing::{debug, warn};

/// Structural hints reported alongside extracted text
#[derive(Debug, Clone, Default)]
pub struct ExtractMetadata {
    /// Markdown-style headings were detected
    pub has_headings: bool,
    /// Source is code in this language
    pub code_language: Option<String>,
    /// Page count for paginated formats
    pub page_count: Option<usize>,
}

/// Extracted plain text plus structural hints
#[derive(Debug, Clone)]
pub struct Extraction {
    pub content: String,
    pub metadata: ExtractMetadata,
}

/// Document format resolved from filename extension or mime type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Markdown,
    PlainText,
    Code { language: String },
}

impl DocumentFormat {
    /// Resolve a format from the filename extension, falling back to mime type
    pub fn detect(filename: &str, mime_type: &str) -> Result<Self> {
        let extension = filename
            .rsplit('.')
            .next()
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let format = match extension.as_str() {
            "pdf" => Self::Pdf,
            "docx" => Self::Docx,
            "md" | "markdown" => Self::Markdown,
            "txt" | "text" | "log" => Self::PlainText,
            "rs" => Self::code("rust"),
            "py" => Self::code("python"),
            "js" => Self::code("javascript"),
            "ts" => Self::code("typescript"),
            "go" => Self::code("go"),
            "java" => Self::code("java"),
            "rb" => Self::code("ruby"),
            "c" | "h" => Self::code("c"),
            "cpp" | "cc" | "hpp" => Self::code("cpp"),
            "sh" => Self::code("shell"),
            "sql" => Self::code("sql"),
            "json" | "yaml" | "yml" | "toml" => Self::code(extension.as_str()),
            _ => match mime_type {
                "application/pdf" => Self::Pdf,
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                    Self::Docx
                }
                "text/markdown" => Self::Markdown,
                m if m.starts_with("text/") => Self::PlainText,
                other => {
                    return Err(ExtractError::UnsupportedFormat(format!(
                        "{} ({})",
                        filename, other
                    ))
                    .into())
                }
            },
        };
        Ok(format)
    }

    fn code(language: &str) -> Self {
        Self::Code {
            language: language.to_string(),
        }
    }
}

/// Extracts plain text from uploaded files, dispatching on detected format
pub struct TextExtractor;

impl TextExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract text and structural hints from raw file bytes
    pub fn extract(&self, filename: &str, mime_type: &str, bytes: &[u8]) -> Result<Extraction> {
        let format = DocumentFormat::detect(filename, mime_type)?;
        debug!(filename, ?format, size = bytes.len(), "extracting document");

        let extraction = match format {
            DocumentFormat::Pdf => self.extract_pdf(bytes)?,
            DocumentFormat::Docx => self.extract_docx(bytes)?,
            DocumentFormat::Markdown => self.extract_markdown(bytes)?,
            DocumentFormat::PlainText => self.extract_plaintext(bytes)?,
            DocumentFormat::Code { language } => self.extract_code(bytes, language)?,
        };

        if extraction.content.trim().is_empty() {
            return Err(ExtractError::EmptyExtract.into());
        }
        Ok(extraction)
    }

    fn extract_pdf(&self, bytes: &[u8]) -> Result<Extraction> {
        let content = pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| ExtractError::Failed(format!("pdf: {}", e)))?;

        // Form-feed separators approximate the page count
        let page_count = content.matches('\u{c}').count() + 1;

        Ok(Extraction {
            content,
            metadata: ExtractMetadata {
                page_count: Some(page_count),
                ..Default::default()
            },
        })
    }

    fn extract_docx(&self, bytes: &[u8]) -> Result<Extraction> {
        let cursor = std::io::Cursor::new(bytes);
        let mut archive = zip::ZipArchive::new(cursor)
            .map_err(|e| ExtractError::Failed(format!("docx archive: {}", e)))?;

        let mut xml = String::new();
        archive
            .by_name("word/document.xml")
            .map_err(|e| ExtractError::Failed(format!("docx document.xml: {}", e)))?
            .read_to_string(&mut xml)
            .map_err(|e| ExtractError::Failed(format!("docx read: {}", e)))?;

        let mut reader = Reader::from_str(&xml);
        let mut content = String::new();
        let mut in_text = false;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let name = e.name();
                    let local = name.as_ref();
                    if local == b"w:t" {
                        in_text = true;
                    }
                }
                Ok(Event::End(e)) => {
                    let name = e.name();
                    let local = name.as_ref();
                    if local == b"w:t" {
                        in_text = false;
                    } else if local == b"w:p" {
                        content.push('\n');
                    }
                }
                Ok(Event::Text(t)) if in_text => {
                    let text = t
                        .unescape()
                        .map_err(|e| ExtractError::Failed(format!("docx text: {}", e)))?;
                    content.push_str(&text);
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    warn!("docx xml parse stopped early: {}", e);
                    break;
                }
                _ => {}
            }
        }

        Ok(Extraction {
            content,
            metadata: ExtractMetadata::default(),
        })
    }

    fn extract_markdown(&self, bytes: &[u8]) -> Result<Extraction> {
        let content = decode_utf8(bytes)?;
        let has_headings = content.lines().any(|l| l.trim_start().starts_with('#'));
        Ok(Extraction {
            content,
            metadata: ExtractMetadata {
                has_headings,
                ..Default::default()
            },
        })
    }

    fn extract_plaintext(&self, bytes: &[u8]) -> Result<Extraction> {
        Ok(Extraction {
            content: decode_utf8(bytes)?,
            metadata: ExtractMetadata::default(),
        })
    }

    fn extract_code(&self, bytes: &[u8], language: String) -> Result<Extraction> {
        Ok(Extraction {
            content: decode_utf8(bytes)?,
            metadata: ExtractMetadata {
                code_language: Some(language),
                ..Default::default()
            },
        })
    }
}

impl Default for TextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| ExtractError::Failed(format!("invalid utf-8: {}", e)).into())
}
