//! Task orchestration: submit documents, run the beautify worker, colorize.
//!
//! ## Why a background worker?
//!
//! A 40-page PDF can take minutes of DeepSeek time. The HTTP request that
//! submits it returns immediately with a pending task id; the work runs in
//! its own `tokio::spawn` and records its outcome in the [`TaskStore`],
//! where clients poll for it. A [`Semaphore`] caps how many tasks run at
//! once, so a burst of uploads queues up as `pending` instead of exhausting
//! the DeepSeek rate limit.
//!
//! ## Why `buffered`, not `buffer_unordered`?
//!
//! Chunks are concatenated back into one document, so their order matters.
//! `buffered(concurrency)` keeps up to `concurrency` calls in flight while
//! yielding results in submission order.

use crate::colorize::ColorizeClient;
use crate::config::ServiceConfig;
use crate::deepseek::DeepSeekClient;
use crate::error::BeautifyError;
use crate::pipeline::input::{self, DocumentKind, Upload};
use crate::pipeline::llm::{self, ChunkResult};
use crate::pipeline::{encode, extract, html, postprocess};
use crate::prompts::compose_instructions;
use crate::store::TaskStore;
use crate::task::{BeautifyResult, TaskRecord};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Styling options sent with a document or HTML submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeautifyRequest {
    /// Built-in template id (see [`crate::prompts::TEMPLATES`]) or a free name.
    #[serde(default)]
    pub template: Option<String>,
    /// Free-text styling instructions.
    #[serde(default)]
    pub instructions: Option<String>,
    /// Document title override.
    #[serde(default)]
    pub title: Option<String>,
}

/// A colorize action: one image, or images inside an HTML document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ColorizeRequest {
    /// A `data:` URI or bare base64 image.
    #[serde(default)]
    pub image: Option<String>,
    /// An HTML document whose `data:` images should be colorized.
    #[serde(default)]
    pub html: Option<String>,
    /// Only colorize the `index`-th `<img>` of `html`.
    #[serde(default)]
    pub index: Option<usize>,
}

/// Result of a colorize action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColorizeOutcome {
    /// Colorized image as a `data:` URI, for single-image requests.
    pub image: Option<String>,
    /// Updated document, for HTML requests.
    pub html: Option<String>,
    /// Number of images replaced.
    pub colorized: usize,
    /// `<img>` indices that could not be colorized.
    pub failed: Vec<usize>,
}

/// What a spawned worker has to process.
enum Job {
    Document { upload: Upload, kind: DocumentKind },
    Html { html: String },
}

/// The service core shared by every HTTP handler. Cheap to clone.
#[derive(Clone)]
pub struct Beautifier {
    config: Arc<ServiceConfig>,
    store: TaskStore,
    deepseek: Option<DeepSeekClient>,
    colorizer: Option<ColorizeClient>,
    permits: Arc<Semaphore>,
}

impl Beautifier {
    /// Build every client from configuration.
    pub fn new(config: ServiceConfig) -> Result<Self, BeautifyError> {
        let store = TaskStore::from_config(&config)?;
        Self::with_store(config, store)
    }

    /// Build with an explicit task store (tests, embedding).
    pub fn with_store(config: ServiceConfig, store: TaskStore) -> Result<Self, BeautifyError> {
        let deepseek = DeepSeekClient::from_config(&config)?;
        if deepseek.is_none() {
            warn!("DEEPSEEK_API_KEY not set; documents will be converted without beautification");
        }
        let colorizer = ColorizeClient::from_config(&config)?;
        let permits = Arc::new(Semaphore::new(config.max_tasks));
        Ok(Self {
            config: Arc::new(config),
            store,
            deepseek,
            colorizer,
            permits,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn deepseek(&self) -> Option<&DeepSeekClient> {
        self.deepseek.as_ref()
    }

    pub fn colorize_configured(&self) -> bool {
        self.colorizer.is_some()
    }

    /// Validate an upload, create a pending task and start the worker.
    ///
    /// Invalid uploads are rejected here, before any task exists.
    pub async fn submit_document(
        &self,
        upload: Upload,
        request: BeautifyRequest,
    ) -> Result<TaskRecord, BeautifyError> {
        let kind = input::classify(&upload, self.config.max_upload_bytes)?;
        info!(
            "Accepted '{}' ({}, {} bytes)",
            upload.file_name,
            kind.as_str(),
            upload.bytes.len()
        );
        self.spawn_task(Job::Document { upload, kind }, request).await
    }

    /// Create a pending task that restyles an existing HTML document.
    pub async fn submit_html(
        &self,
        html: String,
        request: BeautifyRequest,
    ) -> Result<TaskRecord, BeautifyError> {
        if html.trim().is_empty() {
            return Err(BeautifyError::InvalidRequest("html must not be empty".into()));
        }
        if html.len() > self.config.max_upload_bytes {
            return Err(BeautifyError::UploadTooLarge {
                name: "html".into(),
                size: html.len(),
                limit: self.config.max_upload_bytes,
            });
        }
        self.spawn_task(Job::Html { html }, request).await
    }

    async fn spawn_task(&self, job: Job, request: BeautifyRequest) -> Result<TaskRecord, BeautifyError> {
        let task = TaskRecord::new_pending();
        self.store.create(&task).await?;
        info!("Created task {}", task.id);

        let this = self.clone();
        let id = task.id.clone();
        tokio::spawn(async move {
            let _permit = match this.permits.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => {
                    this.record_failure(&id, "service is shutting down").await;
                    return;
                }
            };

            let outcome = AssertUnwindSafe(this.run(&id, job, request))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("Task {} failed: {}", id, e);
                    this.record_failure(&id, &e.to_string()).await;
                }
                Err(_) => {
                    error!("Task {} panicked", id);
                    this.record_failure(&id, "internal error while processing the document").await;
                }
            }
        });

        Ok(task)
    }

    async fn record_failure(&self, id: &str, message: &str) {
        if let Err(e) = self.store.fail(id, message).await {
            error!("Task {}: could not record failure: {}", id, e);
        }
    }

    /// The worker body: extract, beautify, store.
    async fn run(&self, id: &str, job: Job, request: BeautifyRequest) -> Result<(), BeautifyError> {
        let start = Instant::now();
        self.store.mark_processing(id).await?;

        // ── Step 1: Document → HTML body ─────────────────────────────────
        let (body, extracted_title, source, fallback_title) = match job {
            Job::Document { upload, kind } => match kind {
                DocumentKind::Html => {
                    let raw = String::from_utf8_lossy(&upload.bytes);
                    (postprocess::sanitize_input(&raw), None, kind, Some(upload.stem()))
                }
                _ => {
                    let staged = input::stage(&upload, kind).await?;
                    let doc = extract::extract(staged.path(), &upload.file_name, kind).await?;
                    debug!(
                        "Task {}: extracted {} blocks, {} images",
                        id,
                        doc.blocks.len(),
                        doc.images.len()
                    );
                    (html::render_body(&doc), doc.title, kind, Some(upload.stem()))
                }
            },
            Job::Html { html } => (postprocess::sanitize_input(&html), None, DocumentKind::Html, None),
        };
        let title = request
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or(extracted_title)
            .or(fallback_title);

        // ── Step 2: Beautify chunks ──────────────────────────────────────
        let instructions =
            compose_instructions(request.template.as_deref(), request.instructions.as_deref());

        let (body, chunks, failed_chunks, input_tokens, output_tokens) =
            match (&self.deepseek, instructions) {
                (Some(client), Some(instructions)) => {
                    self.beautify_body(id, client, &body, &instructions).await?
                }
                _ => {
                    info!("Task {}: convert-only", id);
                    (body, 0, 0, 0, 0)
                }
            };

        // ── Step 3: Assemble & upload ────────────────────────────────────
        let document = html::wrap_document(title.as_deref(), &body);
        let download_url = if self.config.upload_results {
            match self
                .store
                .upload_result(&format!("results/{id}.html"), &document)
                .await
            {
                Ok(url) => url,
                Err(e) => {
                    warn!("Task {}: result upload failed, keeping inline HTML only: {}", id, e);
                    None
                }
            }
        } else {
            None
        };

        let result = BeautifyResult {
            html: document,
            title,
            source: source.as_str().to_string(),
            template: request.template,
            chunks,
            failed_chunks,
            input_tokens,
            output_tokens,
            download_url,
        };
        let value = serde_json::to_value(&result)
            .map_err(|e| BeautifyError::Internal(format!("serialising result: {e}")))?;
        self.store.complete(id, value).await?;

        info!(
            "Task {} completed: {} chunks ({} failed), {}ms",
            id,
            chunks,
            failed_chunks,
            start.elapsed().as_millis()
        );
        Ok(())
    }

    /// Restyle `body` chunk by chunk. Returns the new body and statistics.
    async fn beautify_body(
        &self,
        id: &str,
        client: &DeepSeekClient,
        body: &str,
        instructions: &str,
    ) -> Result<(String, usize, usize, u64, u64), BeautifyError> {
        let (stashed, images) = html::stash_images(body);
        let chunks = html::split_chunks(&stashed, self.config.chunk_chars);
        let total = chunks.len();
        if total == 0 {
            return Ok((body.to_string(), 0, 0, 0, 0));
        }
        info!("Task {}: {} chunks, {} images stashed", id, total, images.len());

        let config = &self.config;
        let futures: Vec<_> = chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| llm::beautify_chunk(client, i, total, chunk, instructions, config))
            .collect();
        let results: Vec<ChunkResult> = stream::iter(futures)
        .buffered(config.concurrency)
        .collect()
        .await;

        let failed = results.iter().filter(|r| !r.is_ok()).count();
        if failed == total {
            let first_error = results
                .iter()
                .find_map(|r| r.error.as_ref())
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(BeautifyError::AllChunksFailed {
                total,
                retries: config.max_retries,
                first_error,
            });
        }
        if failed > 0 {
            warn!("Task {}: {}/{} chunks kept their original markup", id, failed, total);
        }

        let input_tokens = results.iter().map(|r| r.input_tokens).sum();
        let output_tokens = results.iter().map(|r| r.output_tokens).sum();
        let joined = results
            .into_iter()
            .map(|r| r.html)
            .collect::<Vec<_>>()
            .join("\n");

        Ok((
            html::restore_images(&joined, &images),
            total,
            failed,
            input_tokens,
            output_tokens,
        ))
    }

    /// Colorize one image, one image inside a document, or every `data:`
    /// image inside a document.
    pub async fn colorize(&self, request: ColorizeRequest) -> Result<ColorizeOutcome, BeautifyError> {
        let client = self.colorizer.as_ref().ok_or_else(|| BeautifyError::NotConfigured {
            service: "Image colorization".into(),
            hint: "set BAIDU_API_KEY and BAIDU_SECRET_KEY".into(),
        })?;

        if let Some(image) = request.image.as_deref() {
            let colorized = colorize_one(client, image).await?;
            return Ok(ColorizeOutcome {
                image: Some(colorized),
                html: None,
                colorized: 1,
                failed: Vec::new(),
            });
        }

        let doc = request.html.ok_or_else(|| {
            BeautifyError::InvalidRequest("colorize needs an 'image' or an 'html' field".into())
        })?;
        let images = html::find_images(&doc);

        let targets: Vec<_> = match request.index {
            Some(i) => {
                let img = images.get(i).ok_or_else(|| {
                    BeautifyError::InvalidRequest(format!(
                        "image index {} out of range (document has {} images)",
                        i,
                        images.len()
                    ))
                })?;
                if !img.is_data_uri() {
                    return Err(BeautifyError::InvalidRequest(format!(
                        "image {i} is not embedded; only data: images can be colorized"
                    )));
                }
                vec![img.clone()]
            }
            None => images.into_iter().filter(|i| i.is_data_uri()).collect(),
        };

        let results: Vec<_> = stream::iter(targets.into_iter().map(|img| async move {
            let out = colorize_one(client, &img.src).await;
            (img.index, out)
        }))
        .buffered(self.config.concurrency)
        .collect()
        .await;

        let mut doc = doc;
        let mut colorized = 0;
        let mut failed = Vec::new();
        for (index, out) in results {
            match out {
                Ok(uri) => {
                    doc = html::replace_image_src(&doc, index, &uri)?;
                    colorized += 1;
                }
                Err(e) => {
                    // A single explicit target surfaces its error.
                    if request.index.is_some() {
                        return Err(e);
                    }
                    warn!("Image {} could not be colorized: {}", index, e);
                    failed.push(index);
                }
            }
        }

        info!("Colorized {} images ({} failed)", colorized, failed.len());
        Ok(ColorizeOutcome {
            image: None,
            html: Some(doc),
            colorized,
            failed,
        })
    }
}

async fn colorize_one(client: &ColorizeClient, image: &str) -> Result<String, BeautifyError> {
    let payload = encode::prepare_for_colorize(image)?;
    let colorized = client.colorize_base64(&payload).await?;
    Ok(encode::base64_data_uri(&colorized))
}
