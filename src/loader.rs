//! Document loading: turns a file on disk into a single plain-text string.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{RagError, RagResult};

/// Formats the loader knows how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    /// `.txt` / `.text`
    PlainText,
    /// `.md` / `.markdown`, read verbatim.
    Markdown,
    /// `.pdf`, text extracted page by page.
    Pdf,
}

impl DocumentFormat {
    /// Detects the format from a path extension.
    pub fn from_path(path: &Path) -> RagResult<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "txt" | "text" => Ok(Self::PlainText),
            "md" | "markdown" => Ok(Self::Markdown),
            "pdf" => Ok(Self::Pdf),
            _ => Err(RagError::UnsupportedFormat {
                path: path.to_path_buf(),
                extension,
            }),
        }
    }
}

/// Extracted document text plus the identifiers downstream stages need.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    /// Document identifier (the file name).
    pub source: String,
    /// Path the document was read from.
    pub path: PathBuf,
    /// Detected format.
    pub format: DocumentFormat,
    /// Normalized plain text.
    pub text: String,
}

/// Reads and extracts the text of a single document.
pub fn load_document(path: &Path) -> RagResult<LoadedDocument> {
    let format = DocumentFormat::from_path(path)?;
    let bytes = fs::read(path).map_err(|source| RagError::ReadFailure {
        path: path.to_path_buf(),
        source,
    })?;

    let raw = match format {
        DocumentFormat::PlainText | DocumentFormat::Markdown => decode_text(path, bytes),
        DocumentFormat::Pdf => {
            pdf_extract::extract_text_from_mem(&bytes).map_err(|err| RagError::Extraction {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?
        }
    };
    let text = normalize_text(&raw);
    debug!(path = %path.display(), ?format, chars = text.chars().count(), "loaded document");

    Ok(LoadedDocument {
        source: source_name(path),
        path: path.to_path_buf(),
        format,
        text,
    })
}

/// Lists loadable documents directly inside `dir`, sorted by path.
pub fn discover_documents(dir: &Path) -> RagResult<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|source| RagError::ReadFailure {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| RagError::ReadFailure {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_file() && DocumentFormat::from_path(&path).is_ok() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn source_name(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| path.display().to_string())
}

fn decode_text(path: &Path, bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            warn!(path = %path.display(), "document is not valid UTF-8; decoding lossily");
            String::from_utf8_lossy(err.as_bytes()).into_owned()
        }
    }
}

fn normalize_text(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");
    unified.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn detects_formats_case_insensitively() {
        assert_eq!(
            DocumentFormat::from_path(Path::new("Resume.PDF")).unwrap(),
            DocumentFormat::Pdf
        );
        assert_eq!(
            DocumentFormat::from_path(Path::new("notes.md")).unwrap(),
            DocumentFormat::Markdown
        );
        assert_eq!(
            DocumentFormat::from_path(Path::new("bio.txt")).unwrap(),
            DocumentFormat::PlainText
        );
    }

    #[test]
    fn rejects_unknown_extension() {
        let err = load_document(Path::new("slides.pptx")).unwrap_err();
        match err {
            RagError::UnsupportedFormat { extension, .. } => assert_eq!(extension, "pptx"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_file_is_read_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_document(&dir.path().join("absent.txt")).unwrap_err();
        assert!(matches!(err, RagError::ReadFailure { .. }));
    }

    #[test]
    fn loads_and_normalizes_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bio.txt");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(b"  Hello\r\nworld\r\n\r\n").unwrap();

        let doc = load_document(&path).unwrap();
        assert_eq!(doc.source, "bio.txt");
        assert_eq!(doc.format, DocumentFormat::PlainText);
        assert_eq!(doc.text, "Hello\nworld");
    }

    #[test]
    fn invalid_pdf_is_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        fs::write(&path, b"not a pdf").unwrap();
        let err = load_document(&path).unwrap_err();
        assert!(matches!(err, RagError::Extraction { .. }));
    }

    #[test]
    fn discovers_only_known_formats() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.md"), "b").unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::write(dir.path().join("c.png"), "c").unwrap();
        fs::create_dir(dir.path().join("nested.txt")).unwrap();

        let found = discover_documents(dir.path()).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.md"]);
    }
}
