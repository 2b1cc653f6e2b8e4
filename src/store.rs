//! Task persistence: Supabase (PostgREST + Storage) or an in-process map.
//!
//! The `tasks` table is owned by the hosted database; this module only reads
//! and patches rows. When no Supabase credentials are configured the service
//! keeps tasks in memory so it still works for local development, with the
//! obvious caveat that a restart forgets every task.

use crate::config::ServiceConfig;
use crate::error::BeautifyError;
use crate::task::{TaskRecord, TaskStatus};
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

const BODY_PREVIEW_LIMIT: usize = 300;

/// Where task records live.
#[derive(Clone)]
pub enum TaskStore {
    Supabase(SupabaseClient),
    Memory(MemoryStore),
}

impl TaskStore {
    /// Pick the backend from configuration.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, BeautifyError> {
        match (&config.supabase_url, &config.supabase_key) {
            (Some(url), Some(key)) => Ok(TaskStore::Supabase(SupabaseClient::new(
                url,
                key,
                &config.task_table,
                &config.storage_bucket,
                config.api_timeout_secs,
            )?)),
            _ => {
                warn!("SUPABASE_URL / SUPABASE_SERVICE_KEY not set; tasks are kept in memory");
                Ok(TaskStore::Memory(MemoryStore::new(
                    Duration::from_secs(config.memory_task_ttl_secs),
                    config.memory_task_capacity,
                )))
            }
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            TaskStore::Supabase(_) => "supabase",
            TaskStore::Memory(_) => "memory",
        }
    }

    pub async fn create(&self, task: &TaskRecord) -> Result<(), BeautifyError> {
        match self {
            TaskStore::Supabase(c) => c.insert(task).await,
            TaskStore::Memory(m) => {
                m.insert(task.clone()).await;
                Ok(())
            }
        }
    }

    pub async fn get(&self, id: &str) -> Result<Option<TaskRecord>, BeautifyError> {
        match self {
            TaskStore::Supabase(c) => c.fetch(id).await,
            TaskStore::Memory(m) => Ok(m.tasks.read().await.get(id).cloned()),
        }
    }

    pub async fn mark_processing(&self, id: &str) -> Result<(), BeautifyError> {
        self.transition(id, TaskStatus::Processing, None, None).await
    }

    pub async fn complete(&self, id: &str, result: serde_json::Value) -> Result<(), BeautifyError> {
        self.transition(id, TaskStatus::Completed, Some(result), None)
            .await
    }

    pub async fn fail(&self, id: &str, error: impl Into<String>) -> Result<(), BeautifyError> {
        self.transition(id, TaskStatus::Failed, None, Some(error.into()))
            .await
    }

    /// Move a non-terminal task to `status`. Terminal tasks are left as is.
    async fn transition(
        &self,
        id: &str,
        status: TaskStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<(), BeautifyError> {
        match self {
            TaskStore::Supabase(c) => c.update(id, status, result, error).await,
            TaskStore::Memory(m) => {
                let mut tasks = m.tasks.write().await;
                let task = tasks
                    .get_mut(id)
                    .ok_or_else(|| BeautifyError::TaskNotFound { id: id.to_string() })?;
                if task.status.is_terminal() {
                    warn!("Task {} is already {}; ignoring move to {}", id, task.status, status);
                    return Ok(());
                }
                task.status = status;
                if result.is_some() {
                    task.result = result;
                }
                if error.is_some() {
                    task.error = error;
                }
                task.updated_at = Utc::now();
                Ok(())
            }
        }
    }

    /// Upload finished HTML to object storage and return its public URL.
    ///
    /// The in-memory backend has no storage and returns `Ok(None)`.
    pub async fn upload_result(&self, path: &str, html: &str) -> Result<Option<String>, BeautifyError> {
        match self {
            TaskStore::Supabase(c) => c
                .upload(path, html.as_bytes().to_vec(), "text/html; charset=utf-8")
                .await
                .map(Some),
            TaskStore::Memory(_) => Ok(None),
        }
    }
}

/// In-process task map.
///
/// Finished tasks are dropped once they are older than the retention period,
/// and the map never holds more than `capacity` tasks: when full, the oldest
/// finished tasks go first, then the oldest unfinished ones. Both limits are
/// enforced whenever a task is added.
#[derive(Clone)]
pub struct MemoryStore {
    tasks: Arc<RwLock<HashMap<String, TaskRecord>>>,
    retention: Duration,
    capacity: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600), 10_000)
    }
}

impl MemoryStore {
    pub fn new(retention: Duration, capacity: usize) -> Self {
        Self {
            tasks: Arc::default(),
            retention,
            capacity: capacity.max(1),
        }
    }

    async fn insert(&self, task: TaskRecord) {
        let mut tasks = self.tasks.write().await;
        let cutoff = chrono::Duration::from_std(self.retention)
            .ok()
            .and_then(|r| Utc::now().checked_sub_signed(r));
        let evicted = Self::evict(&mut tasks, cutoff, self.capacity - 1);
        if evicted > 0 {
            debug!("Evicted {} tasks from the in-memory store", evicted);
        }
        tasks.insert(task.id.clone(), task);
    }

    /// Drop finished tasks last updated before `cutoff`, then the oldest
    /// tasks until at most `keep` remain. Returns how many were removed.
    fn evict(
        tasks: &mut HashMap<String, TaskRecord>,
        cutoff: Option<DateTime<Utc>>,
        keep: usize,
    ) -> usize {
        let before = tasks.len();
        if let Some(cutoff) = cutoff {
            tasks.retain(|_, t| !(t.status.is_terminal() && t.updated_at < cutoff));
        }

        if tasks.len() > keep {
            let mut by_age: Vec<(bool, DateTime<Utc>, String)> = tasks
                .values()
                .map(|t| (!t.status.is_terminal(), t.updated_at, t.id.clone()))
                .collect();
            by_age.sort();
            let excess = tasks.len() - keep;
            for (active, _, id) in by_age.into_iter().take(excess) {
                if active {
                    warn!("In-memory store full; dropping unfinished task {}", id);
                }
                tasks.remove(&id);
            }
        }
        before - tasks.len()
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

/// Minimal PostgREST + Storage client for the `tasks` table.
#[derive(Clone)]
pub struct SupabaseClient {
    http: reqwest::Client,
    base_url: String,
    table: String,
    bucket: String,
}

impl SupabaseClient {
    pub fn new(
        base_url: &str,
        key: &str,
        table: &str,
        bucket: &str,
        timeout_secs: u64,
    ) -> Result<Self, BeautifyError> {
        let mut headers = HeaderMap::new();
        let apikey = HeaderValue::from_str(key)
            .map_err(|_| BeautifyError::InvalidRequest("Supabase key is not a valid header value".into()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {key}"))
            .map_err(|_| BeautifyError::InvalidRequest("Supabase key is not a valid header value".into()))?;
        headers.insert("apikey", apikey);
        headers.insert(AUTHORIZATION, bearer);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| BeautifyError::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            table: table.to_string(),
            bucket: bucket.to_string(),
        })
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    /// Public URL of an object in the result bucket.
    pub fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url,
            self.bucket,
            path.trim_start_matches('/')
        )
    }

    async fn insert(&self, task: &TaskRecord) -> Result<(), BeautifyError> {
        let resp = self
            .http
            .post(self.table_url())
            .header("Prefer", "return=representation")
            .json(task)
            .send()
            .await
            .map_err(BeautifyError::store)?;
        check_status(resp).await?;
        debug!("Inserted task {}", task.id);
        Ok(())
    }

    async fn fetch(&self, id: &str) -> Result<Option<TaskRecord>, BeautifyError> {
        let resp = self
            .http
            .get(self.table_url())
            .query(&[("id", format!("eq.{id}")), ("select", "*".to_string())])
            .send()
            .await
            .map_err(BeautifyError::store)?;
        let resp = check_status(resp).await?;
        let rows: Vec<TaskRecord> = resp.json().await.map_err(|e| BeautifyError::Store {
            status: None,
            message: format!("unreadable task row: {e}"),
        })?;
        Ok(rows.into_iter().next())
    }

    async fn update(
        &self,
        id: &str,
        status: TaskStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<(), BeautifyError> {
        let mut patch = serde_json::json!({
            "status": status,
            "updated_at": Utc::now(),
        });
        if let Some(r) = result {
            patch["result"] = r;
        }
        if let Some(e) = error {
            patch["error"] = serde_json::Value::String(e);
        }

        // The status filter keeps terminal rows untouched.
        let resp = self
            .http
            .patch(self.table_url())
            .query(&[
                ("id", format!("eq.{id}")),
                ("status", "in.(pending,processing)".to_string()),
            ])
            .header("Prefer", "return=minimal")
            .json(&patch)
            .send()
            .await
            .map_err(BeautifyError::store)?;
        check_status(resp).await?;
        debug!("Task {} → {}", id, status);
        Ok(())
    }

    async fn upload(
        &self,
        path: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<String, BeautifyError> {
        let path = path.trim_start_matches('/');
        let url = format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, path);
        let resp = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, content_type)
            .header("x-upsert", "true")
            .body(body)
            .send()
            .await
            .map_err(|e| BeautifyError::Storage {
                path: path.to_string(),
                message: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BeautifyError::Storage {
                path: path.to_string(),
                message: format!("HTTP {}: {}", status.as_u16(), preview_body(&body)),
            });
        }
        Ok(self.public_url(path))
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, BeautifyError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(BeautifyError::Store {
        status: Some(status.as_u16()),
        message: preview_body(&body),
    })
}

pub(crate) fn preview_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }
    if trimmed.len() <= BODY_PREVIEW_LIMIT {
        return trimmed.to_string();
    }
    let mut end = BODY_PREVIEW_LIMIT;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn row(id: &str, status: &str) -> String {
        format!(
            r#"[{{"id":"{id}","status":"{status}","result":null,"error":null,
                "created_at":"2024-05-01T10:00:00Z","updated_at":"2024-05-01T10:00:05Z"}}]"#
        )
    }

    #[test]
    fn preview_body_truncates() {
        assert_eq!(preview_body("  "), "<empty body>");
        let long = "é".repeat(BODY_PREVIEW_LIMIT);
        let p = preview_body(&long);
        assert!(p.ends_with("..."));
        assert!(p.len() <= BODY_PREVIEW_LIMIT + 3);
    }

    #[tokio::test]
    async fn memory_store_lifecycle() {
        let store = TaskStore::Memory(MemoryStore::default());
        let task = TaskRecord::new_pending();
        store.create(&task).await.unwrap();

        store.mark_processing(&task.id).await.unwrap();
        let t = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(t.status, TaskStatus::Processing);

        store
            .complete(&task.id, serde_json::json!({ "html": "<p>ok</p>" }))
            .await
            .unwrap();
        // terminal: a late failure must not overwrite the result
        store.fail(&task.id, "late").await.unwrap();

        let t = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(t.status, TaskStatus::Completed);
        assert_eq!(t.result_html(), Some("<p>ok</p>"));
        assert!(t.error.is_none());
    }

    fn aged(status: TaskStatus, minutes_ago: i64) -> TaskRecord {
        let mut t = TaskRecord::new_pending();
        t.status = status;
        t.updated_at = Utc::now() - chrono::Duration::minutes(minutes_ago);
        t
    }

    #[tokio::test]
    async fn memory_store_drops_expired_finished_tasks() {
        let mem = MemoryStore::new(Duration::from_secs(600), 100);
        let store = TaskStore::Memory(mem.clone());
        let old_done = aged(TaskStatus::Completed, 30);
        let old_running = aged(TaskStatus::Processing, 30);
        let fresh_failed = aged(TaskStatus::Failed, 1);
        for t in [&old_done, &old_running, &fresh_failed] {
            mem.tasks.write().await.insert(t.id.clone(), t.clone());
        }

        store.create(&TaskRecord::new_pending()).await.unwrap();

        assert_eq!(mem.len().await, 3);
        assert!(store.get(&old_done.id).await.unwrap().is_none());
        assert!(store.get(&old_running.id).await.unwrap().is_some());
        assert!(store.get(&fresh_failed.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn memory_store_capacity_evicts_oldest_finished_first() {
        let mem = MemoryStore::new(Duration::from_secs(86_400), 3);
        let store = TaskStore::Memory(mem.clone());
        let running = aged(TaskStatus::Processing, 50);
        let done_old = aged(TaskStatus::Completed, 20);
        let done_new = aged(TaskStatus::Completed, 10);
        for t in [&running, &done_old, &done_new] {
            mem.tasks.write().await.insert(t.id.clone(), t.clone());
        }

        let next = TaskRecord::new_pending();
        store.create(&next).await.unwrap();

        assert_eq!(mem.len().await, 3);
        assert!(store.get(&done_old.id).await.unwrap().is_none());
        assert!(store.get(&running.id).await.unwrap().is_some());
        assert!(store.get(&next.id).await.unwrap().is_some());

        for _ in 0..10 {
            store.create(&TaskRecord::new_pending()).await.unwrap();
        }
        assert_eq!(mem.len().await, 3);
    }

    #[tokio::test]
    async fn memory_store_unknown_id() {
        let store = TaskStore::Memory(MemoryStore::default());
        assert!(store.get("nope").await.unwrap().is_none());
        assert!(matches!(
            store.mark_processing("nope").await,
            Err(BeautifyError::TaskNotFound { .. })
        ));
        assert_eq!(store.upload_result("a.html", "<p/>").await.unwrap(), None);
    }

    #[tokio::test]
    async fn supabase_fetch_sends_keys_and_filter() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/rest/v1/tasks")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("id".into(), "eq.abc".into()),
                Matcher::UrlEncoded("select".into(), "*".into()),
            ]))
            .match_header("apikey", "service-key")
            .match_header("authorization", "Bearer service-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(row("abc", "processing"))
            .create_async()
            .await;

        let client = SupabaseClient::new(&server.url(), "service-key", "tasks", "documents", 5).unwrap();
        let store = TaskStore::Supabase(client);
        let task = store.get("abc").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Processing);
        m.assert_async().await;
    }

    #[tokio::test]
    async fn supabase_fetch_empty_is_none() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/rest/v1/tasks")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let store = TaskStore::Supabase(
            SupabaseClient::new(&server.url(), "k", "tasks", "documents", 5).unwrap(),
        );
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn supabase_error_status_is_reported() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("PATCH", "/rest/v1/tasks")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body(r#"{"message":"Invalid API key"}"#)
            .create_async()
            .await;

        let store = TaskStore::Supabase(
            SupabaseClient::new(&server.url(), "bad", "tasks", "documents", 5).unwrap(),
        );
        let err = store.fail("abc", "boom").await.unwrap_err();
        match err {
            BeautifyError::Store { status, message } => {
                assert_eq!(status, Some(401));
                assert!(message.contains("Invalid API key"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn supabase_update_only_touches_open_rows() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("PATCH", "/rest/v1/tasks")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("id".into(), "eq.abc".into()),
                Matcher::UrlEncoded("status".into(), "in.(pending,processing)".into()),
            ]))
            .match_body(Matcher::PartialJson(serde_json::json!({
                "status": "completed",
                "result": { "html": "<p/>" }
            })))
            .with_status(204)
            .create_async()
            .await;

        let store = TaskStore::Supabase(
            SupabaseClient::new(&server.url(), "k", "tasks", "documents", 5).unwrap(),
        );
        store
            .complete("abc", serde_json::json!({ "html": "<p/>" }))
            .await
            .unwrap();
        m.assert_async().await;
    }

    #[tokio::test]
    async fn supabase_upload_returns_public_url() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/storage/v1/object/documents/results/abc.html")
            .match_header("x-upsert", "true")
            .with_status(200)
            .with_body(r#"{"Key":"documents/results/abc.html"}"#)
            .create_async()
            .await;

        let client = SupabaseClient::new(&server.url(), "k", "tasks", "documents", 5).unwrap();
        let store = TaskStore::Supabase(client);
        let url = store
            .upload_result("results/abc.html", "<p>hi</p>")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            url,
            format!("{}/storage/v1/object/public/documents/results/abc.html", server.url())
        );
    }
}
