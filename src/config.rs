//! Configuration for the beautification service.
//!
//! Every knob lives in [`ServiceConfig`], built either from the process
//! environment ([`ServiceConfig::from_env`]) or through
//! [`ServiceConfigBuilder`]. Keeping it in one cloneable struct lets the
//! HTTP handlers, the task worker and the DeepSeek/Supabase/Baidu clients
//! share a single snapshot without re-reading the environment.

use crate::error::BeautifyError;
use std::fmt;
use tracing::warn;

/// Default DeepSeek REST endpoint.
pub const DEFAULT_DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
/// Default DeepSeek chat model.
pub const DEFAULT_DEEPSEEK_MODEL: &str = "deepseek-chat";
/// Default Baidu AI platform endpoint.
pub const DEFAULT_BAIDU_BASE_URL: &str = "https://aip.baidubce.com";
/// Largest upload limit accepted from `DOCBEAUTIFY_MAX_UPLOAD_MB`.
pub const MAX_UPLOAD_MB: usize = 1024;
/// Upper bound on retries per chunk.
pub const MAX_RETRIES: u32 = 10;

/// Configuration for the whole service.
///
/// # Example
/// ```rust
/// use docbeautify::ServiceConfig;
///
/// let config = ServiceConfig::builder()
///     .deepseek_api_key("sk-test")
///     .concurrency(2)
///     .build()
///     .unwrap();
/// assert!(config.deepseek_configured());
/// ```
#[derive(Clone)]
pub struct ServiceConfig {
    /// Supabase project URL, e.g. `https://xyz.supabase.co`.
    /// When unset, tasks are kept in an in-process store.
    pub supabase_url: Option<String>,

    /// Supabase service-role (or anon) key sent as `apikey` and bearer token.
    pub supabase_key: Option<String>,

    /// PostgREST table holding task records. Default: `tasks`.
    pub task_table: String,

    /// Storage bucket receiving finished HTML. Default: `documents`.
    pub storage_bucket: String,

    /// Upload finished HTML to Supabase storage. Default: true.
    ///
    /// Ignored when Supabase is not configured.
    pub upload_results: bool,

    /// DeepSeek API key. Without it, tasks run convert-only.
    pub deepseek_api_key: Option<String>,

    /// DeepSeek base URL (no trailing `/chat/completions`).
    pub deepseek_base_url: String,

    /// DeepSeek model id. Default: `deepseek-chat`.
    pub model: String,

    /// Sampling temperature. Default: 0.3.
    ///
    /// Restyling needs a little freedom to pick headings and emphasis but
    /// must not rewrite the text itself.
    pub temperature: f32,

    /// Maximum tokens the model may generate per chunk. Default: 8000.
    pub max_tokens: usize,

    /// Retries per chunk on a failed LLM call. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Timeout for a single upstream HTTP call in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Concurrent LLM calls per task. Default: 4.
    pub concurrency: usize,

    /// Tasks allowed to run at the same time. Default: 8.
    pub max_tasks: usize,

    /// Target size of one HTML chunk sent to the model, in characters. Default: 12 000.
    ///
    /// Chunks are cut at block boundaries, so a single oversized paragraph
    /// may exceed this.
    pub chunk_chars: usize,

    /// Largest accepted upload in bytes. Default: 20 MiB.
    pub max_upload_bytes: usize,

    /// Baidu AI platform API key (colorization).
    pub baidu_api_key: Option<String>,

    /// Baidu AI platform secret key (colorization).
    pub baidu_secret_key: Option<String>,

    /// Baidu endpoint base URL.
    pub baidu_base_url: String,

    /// How long the in-memory store keeps finished tasks, in seconds. Default: 3600.
    pub memory_task_ttl_secs: u64,

    /// Most tasks the in-memory store holds at once. Default: 10 000.
    ///
    /// When full, the oldest finished tasks are evicted first.
    pub memory_task_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            supabase_url: None,
            supabase_key: None,
            task_table: "tasks".to_string(),
            storage_bucket: "documents".to_string(),
            upload_results: true,
            deepseek_api_key: None,
            deepseek_base_url: DEFAULT_DEEPSEEK_BASE_URL.to_string(),
            model: DEFAULT_DEEPSEEK_MODEL.to_string(),
            temperature: 0.3,
            max_tokens: 8000,
            max_retries: 2,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            concurrency: 4,
            max_tasks: 8,
            chunk_chars: 12_000,
            max_upload_bytes: 20 * 1024 * 1024,
            baidu_api_key: None,
            baidu_secret_key: None,
            baidu_base_url: DEFAULT_BAIDU_BASE_URL.to_string(),
            memory_task_ttl_secs: 3600,
            memory_task_capacity: 10_000,
        }
    }
}

fn redact(v: &Option<String>) -> &'static str {
    if v.is_some() {
        "<redacted>"
    } else {
        "<unset>"
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("supabase_url", &self.supabase_url)
            .field("supabase_key", &redact(&self.supabase_key))
            .field("task_table", &self.task_table)
            .field("storage_bucket", &self.storage_bucket)
            .field("upload_results", &self.upload_results)
            .field("deepseek_api_key", &redact(&self.deepseek_api_key))
            .field("deepseek_base_url", &self.deepseek_base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("concurrency", &self.concurrency)
            .field("max_tasks", &self.max_tasks)
            .field("chunk_chars", &self.chunk_chars)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("baidu_api_key", &redact(&self.baidu_api_key))
            .field("baidu_base_url", &self.baidu_base_url)
            .field("memory_task_ttl_secs", &self.memory_task_ttl_secs)
            .field("memory_task_capacity", &self.memory_task_capacity)
            .finish()
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// Read the configuration from environment variables.
    ///
    /// Unparseable numeric values fall back to their defaults with a warning
    /// rather than refusing to start.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServiceConfig::from_env`] with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |keys: &[&str]| -> Option<String> {
            keys.iter()
                .filter_map(|k| lookup(k))
                .map(|v| v.trim().to_string())
                .find(|v| !v.is_empty())
        };

        let mut c = Self::default();
        c.supabase_url = get(&["SUPABASE_URL", "NEXT_PUBLIC_SUPABASE_URL"])
            .map(|u| u.trim_end_matches('/').to_string());
        c.supabase_key = get(&[
            "SUPABASE_SERVICE_KEY",
            "SUPABASE_KEY",
            "NEXT_PUBLIC_SUPABASE_ANON_KEY",
        ]);
        if let Some(t) = get(&["SUPABASE_TABLE"]) {
            c.task_table = t;
        }
        if let Some(b) = get(&["SUPABASE_BUCKET"]) {
            c.storage_bucket = b;
        }
        c.deepseek_api_key = get(&["DEEPSEEK_API_KEY"]);
        if let Some(u) = get(&["DEEPSEEK_BASE_URL"]) {
            c.deepseek_base_url = u.trim_end_matches('/').to_string();
        }
        if let Some(m) = get(&["DEEPSEEK_MODEL"]) {
            c.model = m;
        }
        c.baidu_api_key = get(&["BAIDU_API_KEY"]);
        c.baidu_secret_key = get(&["BAIDU_SECRET_KEY"]);
        if let Some(u) = get(&["BAIDU_BASE_URL"]) {
            c.baidu_base_url = u.trim_end_matches('/').to_string();
        }

        if let Some(mb) = parse_or_warn::<usize>("DOCBEAUTIFY_MAX_UPLOAD_MB", get(&["DOCBEAUTIFY_MAX_UPLOAD_MB"])) {
            if mb > MAX_UPLOAD_MB {
                warn!("DOCBEAUTIFY_MAX_UPLOAD_MB={} exceeds {}; capping", mb, MAX_UPLOAD_MB);
            }
            c.max_upload_bytes = mb.clamp(1, MAX_UPLOAD_MB) * 1024 * 1024;
        }
        if let Some(n) = parse_or_warn::<usize>("DOCBEAUTIFY_CONCURRENCY", get(&["DOCBEAUTIFY_CONCURRENCY"])) {
            c.concurrency = n.max(1);
        }
        if let Some(n) = parse_or_warn::<usize>("DOCBEAUTIFY_MAX_TASKS", get(&["DOCBEAUTIFY_MAX_TASKS"])) {
            c.max_tasks = n.max(1);
        }
        if let Some(secs) = parse_or_warn::<u64>("DOCBEAUTIFY_TASK_TTL_SECS", get(&["DOCBEAUTIFY_TASK_TTL_SECS"])) {
            c.memory_task_ttl_secs = secs;
        }
        if let Some(n) = parse_or_warn::<usize>("DOCBEAUTIFY_MEMORY_TASKS", get(&["DOCBEAUTIFY_MEMORY_TASKS"])) {
            c.memory_task_capacity = n.max(1);
        }
        c
    }

    /// True when both Supabase URL and key are present.
    pub fn supabase_configured(&self) -> bool {
        self.supabase_url.is_some() && self.supabase_key.is_some()
    }

    /// True when a DeepSeek API key is present.
    pub fn deepseek_configured(&self) -> bool {
        self.deepseek_api_key.is_some()
    }

    /// True when both Baidu credentials are present.
    pub fn colorize_configured(&self) -> bool {
        self.baidu_api_key.is_some() && self.baidu_secret_key.is_some()
    }
}

fn parse_or_warn<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Option<T> {
    let raw = raw?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a valid number", key, raw);
            None
        }
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn supabase(mut self, url: impl Into<String>, key: impl Into<String>) -> Self {
        self.config.supabase_url = Some(url.into().trim_end_matches('/').to_string());
        self.config.supabase_key = Some(key.into());
        self
    }

    pub fn task_table(mut self, table: impl Into<String>) -> Self {
        self.config.task_table = table.into();
        self
    }

    pub fn storage_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.config.storage_bucket = bucket.into();
        self
    }

    pub fn upload_results(mut self, v: bool) -> Self {
        self.config.upload_results = v;
        self
    }

    pub fn deepseek_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.deepseek_api_key = Some(key.into());
        self
    }

    pub fn deepseek_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.deepseek_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n.min(MAX_RETRIES);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn max_tasks(mut self, n: usize) -> Self {
        self.config.max_tasks = n.max(1);
        self
    }

    pub fn chunk_chars(mut self, n: usize) -> Self {
        self.config.chunk_chars = n;
        self
    }

    pub fn max_upload_bytes(mut self, n: usize) -> Self {
        self.config.max_upload_bytes = n;
        self
    }

    pub fn memory_task_ttl_secs(mut self, secs: u64) -> Self {
        self.config.memory_task_ttl_secs = secs;
        self
    }

    pub fn memory_task_capacity(mut self, n: usize) -> Self {
        self.config.memory_task_capacity = n.max(1);
        self
    }

    pub fn baidu(mut self, api_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        self.config.baidu_api_key = Some(api_key.into());
        self.config.baidu_secret_key = Some(secret_key.into());
        self
    }

    pub fn baidu_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.baidu_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, BeautifyError> {
        let c = &self.config;
        if c.chunk_chars < 1000 {
            return Err(BeautifyError::InvalidRequest(format!(
                "chunk size must be at least 1000 characters, got {}",
                c.chunk_chars
            )));
        }
        if c.max_upload_bytes == 0 {
            return Err(BeautifyError::InvalidRequest(
                "upload limit must be greater than zero".into(),
            ));
        }
        if c.model.trim().is_empty() {
            return Err(BeautifyError::InvalidRequest("model must not be empty".into()));
        }
        Ok(self.config)
    }
}
