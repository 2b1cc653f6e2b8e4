//! Task records: the unit of asynchronous work polled by clients.
//!
//! A [`TaskRecord`] mirrors one row of the external `tasks` table. Its
//! status only ever moves forward: `pending → processing → completed|failed`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Completed and failed tasks never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Percentage reported to polling clients.
    pub fn progress(self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Processing => 50,
            TaskStatus::Completed | TaskStatus::Failed => 100,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the `tasks` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// A fresh pending task with a random v4 id.
    pub fn new_pending() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            status: TaskStatus::Pending,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn progress(&self) -> u8 {
        self.status.progress()
    }

    /// The HTML payload of a completed beautify task, if any.
    pub fn result_html(&self) -> Option<&str> {
        self.result.as_ref()?.get("html")?.as_str()
    }
}

/// Wire form of a task returned by `check-task` and consumed by the poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskReport {
    pub success: bool,
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: u8,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<TaskRecord> for TaskReport {
    fn from(t: TaskRecord) -> Self {
        Self {
            success: true,
            progress: t.progress(),
            task_id: t.id,
            status: t.status,
            result: t.result,
            error: t.error,
            created_at: t.created_at,
            updated_at: t.updated_at,
        }
    }
}

/// Result payload stored on a completed beautify task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeautifyResult {
    pub html: String,
    pub title: Option<String>,
    pub source: String,
    pub template: Option<String>,
    pub chunks: usize,
    pub failed_chunks: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub download_url: Option<String>,
}
