//! Text extraction for corpus source documents.
//!
//! Rule manuals are usually published as PDFs; the corpus store accepts them
//! directly and this module turns them into plain UTF-8 text. Plain-text and
//! markdown files are read as-is (lossily, so stray bytes from earlier
//! conversions do not make a whole manual unreadable).

use std::path::Path;
use thiserror::Error;

/// Extraction error. The corpus store logs it and skips the file.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
}

/// Read a corpus document, dispatching on its extension.
pub fn read_document(path: &Path) -> Result<String, ExtractError> {
    let bytes = std::fs::read(path)?;
    if is_pdf(path) {
        extract_pdf(&bytes)
    } else {
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

pub fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_pdf(b"not a pdf").unwrap_err();
        assert!(err.to_string().contains("PDF"));
    }

    #[test]
    fn reads_text_lossily() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("Washington.txt");
        std::fs::write(&path, b"Speed limit \xff 25 mph").unwrap();
        let text = read_document(&path).unwrap();
        assert!(text.starts_with("Speed limit"));
        assert!(text.ends_with("25 mph"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = read_document(Path::new("/nonexistent/Florida.txt")).unwrap_err();
        assert!(matches!(err, ExtractError::Io(_)));
    }

    #[test]
    fn error_messages_name_the_stage() {
        let io: ExtractError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(io.to_string(), "read failed: gone");
        assert!(std::error::Error::source(&io).is_some());

        let pdf = ExtractError::Pdf("bad xref".to_string());
        assert_eq!(pdf.to_string(), "PDF extraction failed: bad xref");
    }

    #[test]
    fn pdf_extension_is_case_insensitive() {
        assert!(is_pdf(Path::new("NJ.PDF")));
        assert!(!is_pdf(Path::new("NJ.txt")));
    }
}
