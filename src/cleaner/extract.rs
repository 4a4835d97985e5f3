//! PDF text extraction and OCR collaborators.
//!
//! The binary encoding details are the collaborator's problem: the
//! production implementations shell out to `pdftotext` (poppler) and
//! `tesseract`, discovered on the system at startup. Mocks cover tests
//! and installations without the tools.

use std::io::Write;
use std::path::PathBuf;
use std::process::Command;

use super::CleanError;

/// `pdf_to_text(bytes) -> string`.
pub trait PdfExtractor: Send + Sync {
    fn pdf_to_text(&self, bytes: &[u8]) -> Result<String, CleanError>;
}

/// `ocr_image(bytes) -> string`.
pub trait OcrEngine: Send + Sync {
    fn ocr_image(&self, bytes: &[u8]) -> Result<String, CleanError>;
}

// ---------------------------------------------------------------------------
// Production: CLI tools
// ---------------------------------------------------------------------------

/// Poppler's `pdftotext` with layout preservation.
pub struct PdftotextCli {
    binary: PathBuf,
}

impl PdftotextCli {
    /// Locate `pdftotext` on common paths.
    pub fn discover() -> Result<Self, CleanError> {
        discover_binary("pdftotext").map(|binary| Self { binary })
    }
}

impl PdfExtractor for PdftotextCli {
    fn pdf_to_text(&self, bytes: &[u8]) -> Result<String, CleanError> {
        let mut input = tempfile::NamedTempFile::new()?;
        input.write_all(bytes)?;

        let output = Command::new(&self.binary)
            .arg("-layout")
            .arg(input.path())
            .arg("-")
            .output()
            .map_err(|e| CleanError::Pdf(format!("pdftotext spawn: {e}")))?;

        if !output.status.success() {
            return Err(CleanError::Pdf(format!(
                "pdftotext exited {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Tesseract CLI, German + English traineddata.
pub struct TesseractCli {
    binary: PathBuf,
}

impl TesseractCli {
    pub fn discover() -> Result<Self, CleanError> {
        discover_binary("tesseract").map(|binary| Self { binary })
    }
}

impl OcrEngine for TesseractCli {
    fn ocr_image(&self, bytes: &[u8]) -> Result<String, CleanError> {
        let mut input = tempfile::NamedTempFile::new()?;
        input.write_all(bytes)?;

        let output = Command::new(&self.binary)
            .arg(input.path())
            .arg("stdout")
            .args(["-l", "deu+eng"])
            .output()
            .map_err(|e| CleanError::Ocr(format!("tesseract spawn: {e}")))?;

        if !output.status.success() {
            return Err(CleanError::Ocr(format!(
                "tesseract exited {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn discover_binary(name: &str) -> Result<PathBuf, CleanError> {
    if let Ok(path) = std::env::var(format!("{}_PATH", name.to_uppercase())) {
        let p = PathBuf::from(&path);
        if p.exists() {
            return Ok(p);
        }
    }

    let candidates = [
        format!("/usr/bin/{name}"),
        format!("/usr/local/bin/{name}"),
        format!("/opt/homebrew/bin/{name}"),
    ];
    for candidate in &candidates {
        let p = PathBuf::from(candidate);
        if p.exists() {
            return Ok(p);
        }
    }

    // Fall back to PATH resolution at spawn time.
    if Command::new(name).arg("--version").output().is_ok() {
        return Ok(PathBuf::from(name));
    }

    Err(CleanError::ToolMissing(format!(
        "{name} not found. Install it or set {}_PATH",
        name.to_uppercase()
    )))
}

// ---------------------------------------------------------------------------
// Mocks
// ---------------------------------------------------------------------------

/// Mock PDF extractor returning a fixed text (empty to exercise the OCR
/// fallback).
pub struct MockPdfExtractor {
    text: String,
}

impl MockPdfExtractor {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }

    pub fn empty() -> Self {
        Self::new("")
    }
}

impl PdfExtractor for MockPdfExtractor {
    fn pdf_to_text(&self, _bytes: &[u8]) -> Result<String, CleanError> {
        Ok(self.text.clone())
    }
}

/// Mock OCR engine returning a fixed text.
pub struct MockOcrEngine {
    text: String,
}

impl MockOcrEngine {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }
}

impl OcrEngine for MockOcrEngine {
    fn ocr_image(&self, _bytes: &[u8]) -> Result<String, CleanError> {
        Ok(self.text.clone())
    }
}

/// OCR engine that always fails, for degraded-path tests.
pub struct FailingOcrEngine;

impl OcrEngine for FailingOcrEngine {
    fn ocr_image(&self, _bytes: &[u8]) -> Result<String, CleanError> {
        Err(CleanError::Ocr("no OCR available".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_pdf_returns_configured_text() {
        let pdf = MockPdfExtractor::new("order line");
        assert_eq!(pdf.pdf_to_text(b"%PDF").unwrap(), "order line");
    }

    #[test]
    fn empty_mock_simulates_scanned_pdf() {
        let pdf = MockPdfExtractor::empty();
        assert!(pdf.pdf_to_text(b"%PDF").unwrap().is_empty());
    }

    #[test]
    fn failing_ocr_errors() {
        assert!(FailingOcrEngine.ocr_image(b"png").is_err());
    }
}
