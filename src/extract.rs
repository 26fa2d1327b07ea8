//! Text extraction for providers that accept text parts only.
//!
//! The Gemini provider receives PDFs as binary parts and never calls this
//! module. The OpenAI-compatible provider cannot, so each binary document is
//! turned into UTF-8 text here and wrapped with a synthetic header.

use crate::corpus::{text_with_header, MIME_PDF, MIME_TEXT};
use crate::models::{DocumentContent, SourceDocument};

/// Extraction error. The caller decides whether a failure is fatal.
#[derive(Debug)]
pub enum ExtractError {
    UnsupportedContentType(String),
    Pdf(String),
    Utf8(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::UnsupportedContentType(ct) => {
                write!(f, "unsupported content-type: {}", ct)
            }
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Utf8(e) => write!(f, "text is not valid UTF-8: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extracts plain text from binary content.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    match content_type {
        MIME_PDF => extract_pdf(bytes),
        MIME_TEXT => String::from_utf8(bytes.to_vec()).map_err(|e| ExtractError::Utf8(e.to_string())),
        _ => Err(ExtractError::UnsupportedContentType(
            content_type.to_string(),
        )),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

/// Header-wrapped text for any document, extracting binaries first.
pub fn document_as_text(doc: &SourceDocument) -> Result<String, ExtractError> {
    match &doc.content {
        DocumentContent::Text { text, origin } => Ok(text_with_header(&doc.name, origin, text)),
        DocumentContent::Binary { bytes, mime } => {
            let text = extract_text(bytes, mime)?;
            Ok(text_with_header(
                &doc.name,
                &format!("{} converted to text; page boundaries may be lost", mime),
                &text,
            ))
        }
    }
}
