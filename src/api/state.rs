//! Shared handler state.

use crate::beautify::Beautifier;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// State shared by every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub beautifier: Beautifier,
    /// Directory served for non-API paths, if any.
    pub static_dir: Option<Arc<PathBuf>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(beautifier: Beautifier) -> Self {
        Self {
            beautifier,
            static_dir: None,
            started_at: Instant::now(),
        }
    }

    pub fn with_static_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.static_dir = Some(Arc::new(dir.into()));
        self
    }

    pub fn uptime_seconds(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }
}
