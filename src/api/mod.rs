//! HTTP API: the axum router, handlers and server lifecycle.
//!
//! ```text
//! request ─▶ CORS ─▶ timeout ─▶ request_logger ─▶ router ─▶ handler ─▶ Beautifier
//! ```
//!
//! Handlers are thin: they validate input, call [`crate::Beautifier`] or the
//! task store, and reshape the result into JSON. Every error leaves as
//! `{ "success": false, "error": … }` with the status from
//! [`crate::BeautifyError::status_code`].

pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;
pub mod state;
pub mod validation;

pub use models::*;
pub use routes::create_router;
pub use server::*;
pub use state::*;
