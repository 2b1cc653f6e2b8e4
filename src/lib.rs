//! # docbeautify
//!
//! Turn Word and PDF documents into styled HTML with DeepSeek.
//!
//! ## Why this crate?
//!
//! Converting a document to HTML is easy; making the result look good is not.
//! This crate converts `.docx` and `.pdf` uploads into plain semantic HTML and
//! then asks a chat model to restyle it according to a template or free-text
//! instructions, without touching the text. Work runs as asynchronous tasks
//! stored in Supabase (or in memory) so browsers can poll for the result.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload
//!  │
//!  ├─ 1. Input    sniff format, enforce size limit
//!  ├─ 2. Extract  text, tables and images (pdfium / zip, spawn_blocking)
//!  ├─ 3. HTML     assemble body, stash images, split into top-level chunks
//!  ├─ 4. LLM      concurrent DeepSeek calls with retry and backoff
//!  ├─ 5. Polish   strip fences, prose, document wrappers and placeholders
//!  └─ 6. Store    restore images, wrap document, complete the task
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docbeautify::{create_app, AppState, Beautifier, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // SUPABASE_URL, DEEPSEEK_API_KEY, BAIDU_API_KEY … are all optional.
//!     let beautifier = Beautifier::new(ServiceConfig::from_env())?;
//!     let app = create_app(AppState::new(beautifier));
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docbeautify` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when embedding the service to avoid CLI-only deps:
//! ```toml
//! docbeautify = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod api;
pub mod beautify;
pub mod colorize;
pub mod config;
pub mod deepseek;
pub mod error;
pub mod pipeline;
pub mod poll;
pub mod progress;
pub mod prompts;
pub mod store;
pub mod task;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use api::{create_app, create_router, start_server, AppState, ServerConfig};
pub use beautify::{Beautifier, BeautifyRequest, ColorizeOutcome, ColorizeRequest};
pub use colorize::ColorizeClient;
pub use config::{ServiceConfig, ServiceConfigBuilder};
pub use deepseek::{DeepSeekClient, PingOutcome};
pub use error::{BeautifyError, ChunkError};
pub use poll::{PollConfig, PollError, TaskPoller};
pub use progress::{NoopProgressCallback, PollProgressCallback, ProgressCallback};
pub use store::{MemoryStore, SupabaseClient, TaskStore};
pub use task::{BeautifyResult, TaskRecord, TaskReport, TaskStatus};
