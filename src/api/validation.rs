//! Request validation shared by handlers.

use crate::error::BeautifyError;
use uuid::Uuid;

/// Check a task id before it reaches the store.
///
/// Task ids are v4 UUIDs. Anything else cannot name a task, so it is
/// reported as not found rather than forwarded to PostgREST, which would
/// reject it with a type error.
pub fn validate_task_id(id: Option<&str>) -> Result<String, BeautifyError> {
    let id = id.ok_or(BeautifyError::MissingTaskId)?;
    if id.len() > 64 || Uuid::parse_str(id).is_err() {
        return Err(BeautifyError::TaskNotFound { id: truncate(id) });
    }
    Ok(id.to_string())
}

fn truncate(id: &str) -> String {
    id.chars().take(64).collect()
}
