//! Client-side task polling.
//!
//! [`TaskPoller`] talks to a running docbeautify server: it uploads a
//! document, then re-fetches `GET /api/check-task` until the task reaches a
//! terminal status.
//!
//! ## Backoff
//!
//! The interval starts at `initial_interval` and is multiplied by
//! `backoff_multiplier` after every poll, capped at `max_interval`. Polling
//! stops on a terminal status, after `max_attempts` polls, or once
//! `timeout` has elapsed, whichever comes first. A failed request (network
//! error, 5xx) still counts as an attempt so a dead server cannot keep the
//! client spinning forever.

use crate::beautify::BeautifyRequest;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::store::preview_body;
use crate::task::{TaskReport, TaskStatus};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Why polling stopped without a completed task.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("Task {task_id} did not finish within {elapsed_secs}s")]
    Timeout { task_id: String, elapsed_secs: u64 },

    #[error("Task {task_id} still not finished after {attempts} polls")]
    MaxAttempts { task_id: String, attempts: u32 },

    #[error("Task {task_id} failed: {error}")]
    TaskFailed { task_id: String, error: String },

    #[error("Task {task_id} not found")]
    NotFound { task_id: String },

    #[error("Request failed{}: {message}", status_suffix(*.status))]
    Http { status: Option<u16>, message: String },
}

fn status_suffix(status: Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl PollError {
    fn http(err: reqwest::Error) -> Self {
        PollError::Http {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

/// Polling schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollConfig {
    /// Delay before the second poll. Default: 1 s.
    pub initial_interval: Duration,
    /// Factor applied to the interval after each poll. Default: 1.5.
    pub backoff_multiplier: f64,
    /// Upper bound on the interval. Default: 10 s.
    pub max_interval: Duration,
    /// Maximum number of polls. Default: 120.
    pub max_attempts: u32,
    /// Hard limit on total polling time. Default: 10 min.
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            backoff_multiplier: 1.5,
            max_interval: Duration::from_secs(10),
            max_attempts: 120,
            timeout: Duration::from_secs(600),
        }
    }
}

impl PollConfig {
    /// Interval to wait after `interval`, honouring the multiplier and cap.
    ///
    /// A multiplier below 1.0 or not finite is treated as 1.0.
    pub fn next_interval(&self, interval: Duration) -> Duration {
        let factor = if self.backoff_multiplier.is_finite() {
            self.backoff_multiplier.max(1.0)
        } else {
            1.0
        };
        let next = interval.as_secs_f64() * factor;
        if !next.is_finite() || next >= self.max_interval.as_secs_f64() {
            self.max_interval
        } else {
            Duration::from_secs_f64(next)
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    task_id: String,
}

/// Polls a docbeautify server for task completion.
#[derive(Clone)]
pub struct TaskPoller {
    http: reqwest::Client,
    base_url: String,
    config: PollConfig,
    callback: ProgressCallback,
}

impl TaskPoller {
    pub fn new(base_url: impl Into<String>) -> Result<Self, PollError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(PollError::http)?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            config: PollConfig::default(),
            callback: Arc::new(NoopProgressCallback),
        })
    }

    pub fn with_config(mut self, config: PollConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_callback(mut self, callback: ProgressCallback) -> Self {
        self.callback = callback;
        self
    }

    async fn error_from(resp: reqwest::Response) -> PollError {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or_else(|_| preview_body(&body));
        PollError::Http {
            status: Some(status),
            message,
        }
    }

    /// Upload a document and return the new task id.
    pub async fn submit_file(
        &self,
        path: &Path,
        request: &BeautifyRequest,
    ) -> Result<String, PollError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| PollError::Http {
            status: None,
            message: format!("cannot read {}: {e}", path.display()),
        })?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document")
            .to_string();

        let mut form = reqwest::multipart::Form::new()
            .part("file", reqwest::multipart::Part::bytes(bytes).file_name(file_name));
        if let Some(t) = &request.template {
            form = form.text("template", t.clone());
        }
        if let Some(i) = &request.instructions {
            form = form.text("instructions", i.clone());
        }
        if let Some(t) = &request.title {
            form = form.text("title", t.clone());
        }

        let resp = self
            .http
            .post(format!("{}/api/document-api", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(PollError::http)?;
        if !resp.status().is_success() {
            return Err(Self::error_from(resp).await);
        }
        let body: SubmitResponse = resp.json().await.map_err(PollError::http)?;
        self.callback.on_submitted(&body.task_id);
        Ok(body.task_id)
    }

    /// Fetch the current state of a task once.
    pub async fn fetch(&self, task_id: &str) -> Result<TaskReport, PollError> {
        let resp = self
            .http
            .get(format!("{}/api/check-task", self.base_url))
            .query(&[("taskId", task_id)])
            .send()
            .await
            .map_err(PollError::http)?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PollError::NotFound {
                task_id: task_id.to_string(),
            });
        }
        if !resp.status().is_success() {
            return Err(Self::error_from(resp).await);
        }
        resp.json().await.map_err(PollError::http)
    }

    /// Poll until the task completes.
    ///
    /// Returns the completed report, or the reason polling stopped.
    pub async fn wait(&self, task_id: &str) -> Result<TaskReport, PollError> {
        let start = Instant::now();
        let mut interval = self.config.initial_interval;

        for attempt in 1..=self.config.max_attempts {
            let elapsed = start.elapsed();
            if elapsed >= self.config.timeout {
                return Err(PollError::Timeout {
                    task_id: task_id.to_string(),
                    elapsed_secs: elapsed.as_secs(),
                });
            }

            match self.fetch(task_id).await {
                Ok(report) => {
                    debug!("Poll {}: task {} is {}", attempt, task_id, report.status);
                    self.callback.on_poll(attempt, &report);
                    match report.status {
                        TaskStatus::Completed => {
                            self.callback.on_finished(report.status, attempt);
                            return Ok(report);
                        }
                        TaskStatus::Failed => {
                            self.callback.on_finished(report.status, attempt);
                            return Err(PollError::TaskFailed {
                                task_id: task_id.to_string(),
                                error: report.error.unwrap_or_else(|| "unknown error".into()),
                            });
                        }
                        TaskStatus::Pending | TaskStatus::Processing => {}
                    }
                }
                Err(e @ PollError::NotFound { .. }) => return Err(e),
                Err(e) => {
                    debug!("Poll {}: {}", attempt, e);
                    self.callback.on_retry(attempt, &e.to_string());
                }
            }

            if attempt == self.config.max_attempts {
                break;
            }
            let remaining = self.config.timeout.saturating_sub(start.elapsed());
            tokio::time::sleep(interval.min(remaining)).await;
            interval = self.config.next_interval(interval);
        }

        Err(PollError::MaxAttempts {
            task_id: task_id.to_string(),
            attempts: self.config.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::PollProgressCallback;
    use mockito::{Matcher, Server};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn report_body(status: &str, error: Option<&str>) -> String {
        serde_json::json!({
            "success": true,
            "taskId": "t1",
            "status": status,
            "progress": 0,
            "result": null,
            "error": error,
            "createdAt": "2024-05-01T10:00:00Z",
            "updatedAt": "2024-05-01T10:00:00Z"
        })
        .to_string()
    }

    fn fast() -> PollConfig {
        PollConfig {
            initial_interval: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            max_interval: Duration::from_millis(20),
            max_attempts: 3,
            timeout: Duration::from_secs(5),
        }
    }

    #[derive(Default)]
    struct Counter {
        polls: AtomicU32,
        retries: AtomicU32,
    }

    impl PollProgressCallback for Counter {
        fn on_poll(&self, _attempt: u32, _report: &TaskReport) {
            self.polls.fetch_add(1, Ordering::SeqCst);
        }
        fn on_retry(&self, _attempt: u32, _error: &str) {
            self.retries.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn interval_grows_and_caps() {
        let c = fast();
        let i = c.next_interval(c.initial_interval);
        assert_eq!(i, Duration::from_millis(10));
        assert_eq!(c.next_interval(Duration::from_millis(15)), Duration::from_millis(20));
    }

    #[test]
    fn odd_multipliers_do_not_panic() {
        let base = Duration::from_millis(5);
        for multiplier in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, -3.0, 0.5] {
            let c = PollConfig {
                backoff_multiplier: multiplier,
                ..fast()
            };
            assert_eq!(c.next_interval(base), base, "multiplier {multiplier}");
        }

        let c = PollConfig {
            backoff_multiplier: 1e300,
            max_interval: Duration::MAX,
            ..fast()
        };
        assert_eq!(c.next_interval(Duration::from_secs(u64::MAX)), Duration::MAX);
        assert_eq!(c.next_interval(base), Duration::MAX);
    }

    #[tokio::test]
    async fn stops_on_completed() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/api/check-task")
            .match_query(Matcher::UrlEncoded("taskId".into(), "t1".into()))
            .with_status(200)
            .with_body(report_body("completed", None))
            .expect(1)
            .create_async()
            .await;

        let poller = TaskPoller::new(server.url()).unwrap().with_config(fast());
        let report = poller.wait("t1").await.unwrap();
        assert_eq!(report.status, TaskStatus::Completed);
        m.assert_async().await;
    }

    #[tokio::test]
    async fn failed_task_is_an_error() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/api/check-task")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(report_body("failed", Some("DeepSeek down")))
            .create_async()
            .await;

        let poller = TaskPoller::new(server.url()).unwrap().with_config(fast());
        match poller.wait("t1").await {
            Err(PollError::TaskFailed { error, .. }) => assert_eq!(error, "DeepSeek down"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn stops_after_max_attempts() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/api/check-task")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(report_body("processing", None))
            .expect(3)
            .create_async()
            .await;

        let counter = Arc::new(Counter::default());
        let poller = TaskPoller::new(server.url())
            .unwrap()
            .with_config(fast())
            .with_callback(counter.clone());
        match poller.wait("t1").await {
            Err(PollError::MaxAttempts { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(counter.polls.load(Ordering::SeqCst), 3);
        m.assert_async().await;
    }

    #[tokio::test]
    async fn stops_on_timeout() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/api/check-task")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(report_body("pending", None))
            .create_async()
            .await;

        let config = PollConfig {
            initial_interval: Duration::from_millis(10),
            backoff_multiplier: 1.0,
            max_interval: Duration::from_millis(10),
            max_attempts: 10_000,
            timeout: Duration::from_millis(80),
        };
        let poller = TaskPoller::new(server.url()).unwrap().with_config(config);
        let started = Instant::now();
        assert!(matches!(poller.wait("t1").await, Err(PollError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn server_errors_count_as_attempts() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/api/check-task")
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body(r#"{"success":false,"error":"Task store error: boom"}"#)
            .create_async()
            .await;

        let counter = Arc::new(Counter::default());
        let poller = TaskPoller::new(server.url())
            .unwrap()
            .with_config(fast())
            .with_callback(counter.clone());
        assert!(matches!(poller.wait("t1").await, Err(PollError::MaxAttempts { .. })));
        assert_eq!(counter.retries.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unknown_task_stops_immediately() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/api/check-task")
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body(r#"{"success":false,"error":"Task not found: t1"}"#)
            .expect(1)
            .create_async()
            .await;

        let poller = TaskPoller::new(server.url()).unwrap().with_config(fast());
        assert!(matches!(poller.wait("t1").await, Err(PollError::NotFound { .. })));
        m.assert_async().await;
    }

    #[tokio::test]
    async fn submit_file_posts_multipart() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("POST", "/api/document-api")
            .match_header("content-type", Matcher::Regex("^multipart/form-data".into()))
            .match_body(Matcher::Regex("name=\"template\"".into()))
            .with_status(200)
            .with_body(r#"{"success":true,"taskId":"abc","status":"pending"}"#)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memo.html");
        std::fs::write(&path, "<p>memo</p>").unwrap();

        let poller = TaskPoller::new(server.url()).unwrap();
        let id = poller
            .submit_file(
                &path,
                &BeautifyRequest {
                    template: Some("report".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(id, "abc");
        m.assert_async().await;
    }
}
