//! LLM interaction: build chat messages for one HTML chunk and call DeepSeek.
//!
//! This module turns one chunk of document HTML into a DeepSeek request and
//! returns the restyled fragment. It is intentionally thin: all prompt
//! wording lives in [`crate::prompts`] so it can be changed without touching
//! retry or error-handling logic here.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors from DeepSeek are transient and frequent under
//! concurrent load. Exponential backoff (`retry_backoff_ms * 2^(attempt-1)`)
//! avoids a thundering herd: with a 500 ms base and 2 retries the wait
//! sequence is 500 ms → 1 s. A single wait never exceeds one minute.

use crate::config::ServiceConfig;
use crate::deepseek::{ChatMessage, CompletionOptions, DeepSeekClient};
use crate::error::ChunkError;
use crate::pipeline::postprocess::clean_html;
use crate::prompts::system_prompt;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Longest wait between two attempts.
pub const MAX_BACKOFF_MS: u64 = 60_000;

/// Outcome of restyling one chunk.
///
/// On failure `html` holds the original chunk so the document stays
/// complete; `error` says why it was not restyled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkResult {
    /// 0-based chunk index.
    pub index: usize,
    pub html: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
    pub retries: u32,
    pub error: Option<ChunkError>,
}

impl ChunkResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Build the message list for one chunk.
///
/// ## Message Layout
///
/// 1. **System message**: base rules, plus the continuation rule for every
///    chunk after the first so only one `<style>` block and `<h1>` appear
/// 2. **User message**: the styling instructions followed by the fragment
pub fn build_messages(index: usize, total: usize, chunk: &str, instructions: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(system_prompt(index > 0)),
        ChatMessage::user(format!(
            "{instructions}\n\nHTML fragment {} of {}:\n\n{chunk}",
            index + 1,
            total
        )),
    ]
}

/// Restyle a single chunk via DeepSeek.
///
/// Always returns a `ChunkResult`, never an error, so one bad chunk doesn't
/// abort the whole document. An answer that is empty after post-processing
/// counts as a failed attempt and is retried.
pub async fn beautify_chunk(
    client: &DeepSeekClient,
    index: usize,
    total: usize,
    chunk: &str,
    instructions: &str,
    config: &ServiceConfig,
) -> ChunkResult {
    let start = Instant::now();
    let messages = build_messages(index, total, chunk, instructions);
    let options = build_options(config);

    let mut last_err: Option<ChunkError> = None;
    let mut input_tokens = 0;
    let mut output_tokens = 0;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = backoff_ms(config.retry_backoff_ms, attempt);
            warn!(
                "Chunk {}: retry {}/{} after {}ms",
                index + 1,
                attempt,
                config.max_retries,
                backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match client.chat(&messages, &options).await {
            Ok(response) => {
                input_tokens += response.prompt_tokens;
                output_tokens += response.completion_tokens;
                let html = clean_html(&response.content);
                if html.is_empty() {
                    warn!("Chunk {}: attempt {} returned no HTML", index + 1, attempt + 1);
                    last_err = Some(ChunkError::EmptyOutput { chunk: index + 1 });
                    continue;
                }

                let duration = start.elapsed();
                debug!(
                    "Chunk {}/{}: {} input tokens, {} output tokens, {:?}",
                    index + 1,
                    total,
                    response.prompt_tokens,
                    response.completion_tokens,
                    duration
                );
                return ChunkResult {
                    index,
                    html,
                    input_tokens,
                    output_tokens,
                    duration_ms: duration.as_millis() as u64,
                    retries: attempt,
                    error: None,
                };
            }
            Err(e) => {
                warn!("Chunk {}: attempt {} failed: {}", index + 1, attempt + 1, e);
                last_err = Some(ChunkError::LlmFailed {
                    chunk: index + 1,
                    retries: config.max_retries,
                    detail: e.to_string(),
                });
            }
        }
    }

    ChunkResult {
        index,
        html: chunk.to_string(),
        input_tokens,
        output_tokens,
        duration_ms: start.elapsed().as_millis() as u64,
        retries: config.max_retries,
        error: Some(last_err.unwrap_or(ChunkError::EmptyOutput { chunk: index + 1 })),
    }
}

/// Delay before retry `attempt` (1-based), capped at [`MAX_BACKOFF_MS`].
fn backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    base_ms.saturating_mul(factor).min(MAX_BACKOFF_MS)
}

fn build_options(config: &ServiceConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
    }
}
