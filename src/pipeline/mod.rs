//! Pipeline stages for document-to-HTML beautification.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap implementations (e.g. another DOCX parser) without touching the
//! other stages.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ html ──▶ llm ──▶ postprocess ──▶ html
//! (sniff)   (pdfium/    (blocks   (DeepSeek) (cleanup)    (restore images,
//!            docx)       → chunks)                          wrap document)
//! ```
//!
//! 1. [`input`]: classify and stage an upload; rejects unsupported files
//! 2. [`extract`]: pull text, tables and images out of PDF/DOCX; runs in
//!    `spawn_blocking` because pdfium and XML parsing are CPU-bound
//! 3. [`html`]: assemble HTML, stash images, split into chunks
//! 4. [`llm`]: drive DeepSeek with retry/backoff; the only stage with
//!    network I/O
//! 5. [`postprocess`]: deterministic cleanup of model quirks (fences,
//!    chatty prose, document wrappers, placeholder images)
//! 6. [`encode`]: image decoding and PNG re-encoding for colorization

pub mod docx;
pub mod encode;
pub mod extract;
pub mod html;
pub mod input;
pub mod llm;
pub mod postprocess;
