//! Request and response bodies of the HTTP API.
//!
//! Field names are camelCase on the wire (`taskId`, `upstreamStatus`) to
//! match what browser clients already send and read.

use crate::beautify::{BeautifyRequest, ColorizeOutcome, ColorizeRequest};
use crate::error::BeautifyError;
use crate::prompts::Template;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

// ============= Task lookup =============

/// Task id as accepted by `check-task` and `download`: `taskId` or `id`,
/// from the query string or a JSON body.
#[derive(Debug, Default, Deserialize)]
pub struct TaskIdQuery {
    #[serde(default, rename = "taskId")]
    pub task_id: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

impl TaskIdQuery {
    /// The first non-blank id, `taskId` taking precedence.
    pub fn resolve(&self) -> Option<&str> {
        [self.task_id.as_deref(), self.id.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
    }

    /// Fill missing fields from `other`.
    pub fn or(self, other: TaskIdQuery) -> TaskIdQuery {
        TaskIdQuery {
            task_id: self.task_id.or(other.task_id),
            id: self.id.or(other.id),
        }
    }
}

// ============= Submission =============

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub success: bool,
    pub task_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// JSON body of `POST /api/document-api`.
#[derive(Debug, Default, Deserialize)]
pub struct DocumentActionRequest {
    pub action: String,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl DocumentActionRequest {
    pub fn beautify_request(&self) -> BeautifyRequest {
        BeautifyRequest {
            template: self.template.clone(),
            instructions: self.instructions.clone(),
            title: self.title.clone(),
        }
    }

    pub fn colorize_request(self) -> ColorizeRequest {
        ColorizeRequest {
            image: self.image,
            html: self.html,
            index: self.index,
        }
    }
}

// ============= Catalogue & colorize =============

#[derive(Debug, Serialize)]
pub struct TemplatesResponse {
    pub success: bool,
    pub templates: &'static [Template],
}

#[derive(Debug, Serialize)]
pub struct ColorizeResponse {
    pub success: bool,
    #[serde(flatten)]
    pub outcome: ColorizeOutcome,
}

// ============= Index =============

#[derive(Debug, Serialize)]
pub struct EndpointInfo {
    pub method: &'static str,
    pub path: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicesInfo {
    pub task_store: &'static str,
    pub deepseek: bool,
    pub colorize: bool,
    pub model: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexResponse {
    pub success: bool,
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
    pub uptime_seconds: f64,
    pub endpoints: &'static [EndpointInfo],
    pub services: ServicesInfo,
}

pub const ENDPOINTS: &[EndpointInfo] = &[
    EndpointInfo {
        method: "POST",
        path: "/api/beautify",
        description: "Legacy endpoint; returns a mock task id",
    },
    EndpointInfo {
        method: "GET|POST",
        path: "/api/check-task",
        description: "Task status by taskId",
    },
    EndpointInfo {
        method: "GET",
        path: "/api/document-api",
        description: "List styling templates",
    },
    EndpointInfo {
        method: "POST",
        path: "/api/document-api",
        description: "Upload a document (multipart) or run a JSON action: beautify, colorize, templates",
    },
    EndpointInfo {
        method: "GET",
        path: "/api/download",
        description: "Download the HTML of a completed task",
    },
    EndpointInfo {
        method: "GET",
        path: "/api/index",
        description: "This overview",
    },
    EndpointInfo {
        method: "GET|POST",
        path: "/api/test-deepseek",
        description: "DeepSeek connectivity check",
    },
];

// ============= Errors =============

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl IntoResponse for BeautifyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();
        if status.is_server_error() {
            error!(status = status.as_u16(), "{}", message);
        } else {
            warn!(status = status.as_u16(), "{}", message);
        }

        let body = ErrorResponse {
            success: false,
            error: message,
        };
        (status, Json(body)).into_response()
    }
}
