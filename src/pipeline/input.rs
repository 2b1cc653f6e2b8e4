//! Upload validation: decide what kind of document a client sent.
//!
//! ## Why sniff magic bytes?
//!
//! Browsers report whatever extension the user's file happens to have, so a
//! renamed `.doc` or a PDF saved as `.docx` is common. Checking the first
//! bytes (`%PDF`, `PK\x03\x04`, `<`) before handing the file to pdfium or
//! the DOCX parser gives the client a 400 with a useful message instead of
//! a parser failure deep inside the worker.
//!
//! ## Why stage to a temp file?
//!
//! pdfium and the DOCX zip reader both open a file-system path. Writing the
//! upload into a `TempDir` gives them one while ensuring cleanup happens automatically
//! when [`StagedUpload`] is dropped, even if the worker panics.

use crate::error::BeautifyError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// How far into the file `%PDF` may appear (some producers prepend junk).
const PDF_MAGIC_WINDOW: usize = 1024;

const PDF_MAGIC: &[u8] = b"%PDF";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
/// OLE2 compound document, used by legacy `.doc`.
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Document formats the pipeline can convert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Docx,
    Html,
}

impl DocumentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Docx => "docx",
            DocumentKind::Html => "html",
        }
    }

    fn file_extension(self) -> &'static str {
        self.as_str()
    }
}

/// A file received from a client, held in memory.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    /// File name without directory components or extension.
    pub fn stem(&self) -> String {
        Path::new(&self.file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("document")
            .to_string()
    }

    fn extension(&self) -> Option<String> {
        Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }
}

fn is_pdf(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(PDF_MAGIC_WINDOW)];
    window.windows(PDF_MAGIC.len()).any(|w| w == PDF_MAGIC)
}

fn looks_like_html(bytes: &[u8]) -> bool {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    bytes
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|&b| b == b'<')
}

/// Classify an upload, rejecting anything the pipeline cannot convert.
///
/// Checks, in order: emptiness, size limit, legacy Word, then content
/// sniffing cross-checked against the extension.
pub fn classify(upload: &Upload, max_bytes: usize) -> Result<DocumentKind, BeautifyError> {
    let name = upload.file_name.clone();
    let bytes = &upload.bytes;
    let unsupported = |reason: &str| BeautifyError::UnsupportedFormat {
        name: name.clone(),
        reason: reason.to_string(),
    };

    if bytes.is_empty() {
        return Err(unsupported("file is empty"));
    }
    if bytes.len() > max_bytes {
        return Err(BeautifyError::UploadTooLarge {
            name: name.clone(),
            size: bytes.len(),
            limit: max_bytes,
        });
    }

    let ext = upload.extension();
    if ext.as_deref() == Some("doc") || bytes.starts_with(OLE_MAGIC) {
        return Err(unsupported(
            "legacy Word 97-2003 (.doc) files are not supported; save the document as .docx",
        ));
    }

    let kind = if is_pdf(bytes) {
        DocumentKind::Pdf
    } else if bytes.starts_with(ZIP_MAGIC) {
        DocumentKind::Docx
    } else if looks_like_html(bytes) {
        DocumentKind::Html
    } else {
        return Err(unsupported("only .docx, .pdf and .html documents are supported"));
    };

    // A known extension must agree with the content.
    let expected = match ext.as_deref() {
        Some("pdf") => Some(DocumentKind::Pdf),
        Some("docx") => Some(DocumentKind::Docx),
        Some("html") | Some("htm") => Some(DocumentKind::Html),
        _ => None,
    };
    if let Some(expected) = expected {
        if expected != kind {
            return Err(unsupported(&format!(
                "file extension says {} but the content is {}",
                expected.as_str(),
                kind.as_str()
            )));
        }
    }

    debug!("Classified '{}' as {} ({} bytes)", upload.file_name, kind.as_str(), bytes.len());
    Ok(kind)
}

/// An upload written to a private temporary directory.
///
/// The directory is removed when this value is dropped.
pub struct StagedUpload {
    path: PathBuf,
    _temp_dir: TempDir,
}

impl StagedUpload {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Write the upload to a temp file with an extension matching its kind.
pub async fn stage(upload: &Upload, kind: DocumentKind) -> Result<StagedUpload, BeautifyError> {
    let temp_dir = TempDir::new().map_err(|e| BeautifyError::Internal(e.to_string()))?;
    let path = temp_dir
        .path()
        .join(format!("upload.{}", kind.file_extension()));

    tokio::fs::write(&path, &upload.bytes)
        .await
        .map_err(|e| BeautifyError::Internal(format!("Failed to write temp file: {}", e)))?;

    debug!("Staged upload at {}", path.display());
    Ok(StagedUpload {
        path,
        _temp_dir: temp_dir,
    })
}
