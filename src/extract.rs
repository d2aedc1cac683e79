//! Document loading: file path in, ordered page texts out.
//!
//! The ingestion pipeline only talks to the [`DocumentLoader`] trait, so a
//! test (or a future format) can supply pages without a real PDF.

use std::path::Path;

use crate::error::{StudyError, StudyResult};

/// Turns a document on disk into one string per page.
pub trait DocumentLoader: Send + Sync {
    /// Whether this loader understands files with the given extension
    /// (without the dot, any case).
    fn supports(&self, extension: &str) -> bool;

    /// Load all pages, in document order.
    fn load(&self, path: &Path) -> StudyResult<Vec<String>>;
}

/// Page-wise PDF text extraction via `pdf-extract`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfLoader;

impl DocumentLoader for PdfLoader {
    fn supports(&self, extension: &str) -> bool {
        extension.eq_ignore_ascii_case("pdf")
    }

    fn load(&self, path: &Path) -> StudyResult<Vec<String>> {
        let bytes = std::fs::read(path).map_err(|e| StudyError::Extract(e.to_string()))?;
        extract_pdf_pages(&bytes)
    }
}

/// Extract page texts from in-memory PDF bytes.
pub fn extract_pdf_pages(bytes: &[u8]) -> StudyResult<Vec<String>> {
    pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| StudyError::Extract(format!("PDF extraction failed: {}", e)))
}

/// Lowercased extension of `path`, if any.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}
