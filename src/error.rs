//! Error types for the docbeautify library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`BeautifyError`] (**fatal**): the request or task cannot proceed at all
//!   (bad upload, unknown task, upstream service down, provider not
//!   configured). Returned as `Err(BeautifyError)` and, at the HTTP edge,
//!   turned into a `{ "success": false, "error": … }` body.
//!
//! * [`ChunkError`] (**non-fatal**): a single HTML chunk failed its LLM call
//!   after all retries. Stored inside [`crate::pipeline::llm::ChunkResult`]
//!   so the rest of the document is still beautified and the failed chunk
//!   keeps its original markup.

use axum::http::StatusCode;
use thiserror::Error;

/// All fatal errors returned by the docbeautify library.
#[derive(Debug, Error)]
pub enum BeautifyError {
    // ── Request errors ────────────────────────────────────────────────────
    /// A required task id was not supplied.
    #[error("Missing task id")]
    MissingTaskId,

    /// No task with this id exists in the store.
    #[error("Task not found: {id}")]
    TaskNotFound { id: String },

    /// The task exists but is not in a state that allows the operation.
    #[error("Task {id} is {status}, not completed")]
    TaskNotReady { id: String, status: String },

    /// The request body or a field in it is invalid.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The upload is not a format we can convert.
    #[error("Unsupported document format '{name}': {reason}")]
    UnsupportedFormat { name: String, reason: String },

    /// The upload exceeds the configured size limit.
    #[error("Upload '{name}' is {size} bytes, limit is {limit} bytes")]
    UploadTooLarge { name: String, size: usize, limit: usize },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// PDF could not be parsed.
    #[error("PDF '{name}' could not be read: {detail}")]
    CorruptPdf { name: String, detail: String },

    /// PDF requires a password; encrypted uploads are not supported.
    #[error("PDF '{name}' is encrypted and cannot be converted")]
    EncryptedPdf { name: String },

    /// DOCX archive or XML could not be parsed.
    #[error("Word document '{name}' could not be read: {detail}")]
    CorruptDocx { name: String, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or place the library next to the binary."
    )]
    PdfiumBindingFailed(String),

    // ── Upstream errors ───────────────────────────────────────────────────
    /// A required upstream service is not configured (missing key etc.).
    #[error("{service} is not configured: {hint}")]
    NotConfigured { service: String, hint: String },

    /// DeepSeek returned a non-success response or an unreadable body.
    #[error("DeepSeek API error{}: {message}", status_suffix(*.status))]
    LlmApi { status: Option<u16>, message: String },

    /// Every chunk failed after all retries; nothing was beautified.
    #[error("All {total} chunks failed after {retries} retries each.\nFirst error: {first_error}")]
    AllChunksFailed {
        total: usize,
        retries: u32,
        first_error: String,
    },

    /// The task database rejected a request or was unreachable.
    #[error("Task store error{}: {message}", status_suffix(*.status))]
    Store { status: Option<u16>, message: String },

    /// Object storage upload failed.
    #[error("Storage upload of '{path}' failed: {message}")]
    Storage { path: String, message: String },

    /// The colorization service returned an error.
    #[error("Colorize API error{}: {message}", status_suffix(*.status))]
    Colorize { status: Option<u16>, message: String },

    /// An image could not be decoded or re-encoded.
    #[error("Image error: {0}")]
    Image(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn status_suffix(status: Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl BeautifyError {
    /// HTTP status the API layer answers with for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            BeautifyError::MissingTaskId
            | BeautifyError::InvalidRequest(_)
            | BeautifyError::UnsupportedFormat { .. }
            | BeautifyError::UploadTooLarge { .. }
            | BeautifyError::CorruptPdf { .. }
            | BeautifyError::EncryptedPdf { .. }
            | BeautifyError::CorruptDocx { .. }
            | BeautifyError::Image(_) => StatusCode::BAD_REQUEST,
            BeautifyError::TaskNotFound { .. } => StatusCode::NOT_FOUND,
            BeautifyError::TaskNotReady { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn store(err: reqwest::Error) -> Self {
        BeautifyError::Store {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

/// A non-fatal error for a single HTML chunk.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ChunkError {
    /// LLM call failed after retries.
    #[error("Chunk {chunk}: LLM call failed after {retries} retries: {detail}")]
    LlmFailed {
        chunk: usize,
        retries: u32,
        detail: String,
    },

    /// The model answered with nothing usable once post-processed.
    #[error("Chunk {chunk}: model returned no HTML")]
    EmptyOutput { chunk: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_errors_are_client_errors() {
        assert_eq!(BeautifyError::MissingTaskId.status_code(), StatusCode::BAD_REQUEST);
        let e = BeautifyError::UnsupportedFormat {
            name: "a.doc".into(),
            reason: "legacy Word".into(),
        };
        assert_eq!(e.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn unknown_task_is_not_found() {
        let e = BeautifyError::TaskNotFound { id: "abc".into() };
        assert_eq!(e.status_code(), StatusCode::NOT_FOUND);
        assert!(e.to_string().contains("abc"));
    }

    #[test]
    fn upstream_errors_are_server_errors() {
        let e = BeautifyError::LlmApi {
            status: Some(401),
            message: "invalid key".into(),
        };
        assert_eq!(e.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        let msg = e.to_string();
        assert!(msg.contains("HTTP 401"), "got: {msg}");
        assert!(msg.contains("invalid key"));
    }

    #[test]
    fn status_suffix_omitted_without_status() {
        let e = BeautifyError::Store {
            status: None,
            message: "connection refused".into(),
        };
        assert_eq!(e.to_string(), "Task store error: connection refused");
    }

    #[test]
    fn chunk_error_display() {
        let e = ChunkError::LlmFailed {
            chunk: 3,
            retries: 2,
            detail: "timeout".into(),
        };
        assert!(e.to_string().contains("Chunk 3"));
        assert!(e.to_string().contains("timeout"));
    }
}
