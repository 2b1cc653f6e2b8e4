//! HTTP route handlers.

use crate::api::{models::*, state::AppState, validation::validate_task_id};
use crate::beautify::BeautifyRequest;
use crate::deepseek::PingOutcome;
use crate::error::BeautifyError;
use crate::pipeline::input::Upload;
use crate::prompts::TEMPLATES;
use crate::task::{TaskReport, TaskStatus};
use axum::{
    body::Bytes,
    extract::{FromRequest, Multipart, Query, Request, State},
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::services::ServeDir;
use tracing::{debug, info};
use uuid::Uuid;

/// Build the API router. Non-API paths fall through to the static
/// directory when one is configured.
pub fn create_router(state: AppState) -> Router {
    let router = Router::new()
        .route("/api/beautify", post(legacy_beautify_handler))
        .route(
            "/api/check-task",
            get(check_task_handler).post(check_task_post_handler),
        )
        .route(
            "/api/document-api",
            get(templates_handler).post(document_handler),
        )
        .route("/api/download", get(download_handler))
        .route("/api/index", get(index_handler))
        .route(
            "/api/test-deepseek",
            get(test_deepseek_handler).post(test_deepseek_handler),
        );

    let router = match state.static_dir.as_deref() {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router.fallback(not_found_handler),
    };
    router.with_state(state)
}

/// POST /api/beautify - legacy endpoint, hands out a mock id and stores nothing
async fn legacy_beautify_handler() -> Json<SubmitResponse> {
    let task_id = format!("mock-{}", Uuid::new_v4());
    info!("Legacy beautify request answered with {}", task_id);
    Json(SubmitResponse {
        success: true,
        task_id,
        status: TaskStatus::Pending.to_string(),
        message: Some("Use POST /api/document-api to process documents".into()),
    })
}

/// GET /api/check-task?taskId=…
async fn check_task_handler(
    State(state): State<AppState>,
    Query(query): Query<TaskIdQuery>,
) -> Result<Json<TaskReport>, BeautifyError> {
    lookup_task(&state, query).await
}

/// POST /api/check-task with the id in the query string or a JSON body
async fn check_task_post_handler(
    State(state): State<AppState>,
    Query(query): Query<TaskIdQuery>,
    body: Bytes,
) -> Result<Json<TaskReport>, BeautifyError> {
    let from_body = parse_optional_json::<TaskIdQuery>(&body)?.unwrap_or_default();
    lookup_task(&state, query.or(from_body)).await
}

async fn lookup_task(state: &AppState, query: TaskIdQuery) -> Result<Json<TaskReport>, BeautifyError> {
    let id = validate_task_id(query.resolve())?;
    let task = state
        .beautifier
        .store()
        .get(&id)
        .await?
        .ok_or(BeautifyError::TaskNotFound { id })?;
    debug!("Task {} is {}", task.id, task.status);
    Ok(Json(TaskReport::from(task)))
}

/// GET /api/document-api - template catalogue
async fn templates_handler() -> Json<TemplatesResponse> {
    Json(TemplatesResponse {
        success: true,
        templates: TEMPLATES,
    })
}

/// POST /api/document-api - multipart upload or a JSON action
async fn document_handler(
    State(state): State<AppState>,
    req: Request,
) -> Result<Response, BeautifyError> {
    let is_multipart = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    if is_multipart {
        let multipart = Multipart::from_request(req, &state)
            .await
            .map_err(|e| BeautifyError::InvalidRequest(e.body_text()))?;
        let (upload, request) = read_upload_form(multipart).await?;
        let task = state.beautifier.submit_document(upload, request).await?;
        return Ok(submitted(task.id, task.status).into_response());
    }

    let Json(action) = Json::<DocumentActionRequest>::from_request(req, &state)
        .await
        .map_err(|e| BeautifyError::InvalidRequest(e.body_text()))?;
    run_action(&state, action).await
}

async fn run_action(state: &AppState, action: DocumentActionRequest) -> Result<Response, BeautifyError> {
    match action.action.as_str() {
        "beautify" => {
            let request = action.beautify_request();
            let html = action
                .html
                .ok_or_else(|| BeautifyError::InvalidRequest("beautify needs an 'html' field".into()))?;
            let task = state.beautifier.submit_html(html, request).await?;
            Ok(submitted(task.id, task.status).into_response())
        }
        "colorize" => {
            let outcome = state.beautifier.colorize(action.colorize_request()).await?;
            Ok(Json(ColorizeResponse {
                success: true,
                outcome,
            })
            .into_response())
        }
        "templates" => Ok(templates_handler().await.into_response()),
        other => Err(BeautifyError::InvalidRequest(format!(
            "unknown action '{other}' (expected beautify, colorize or templates)"
        ))),
    }
}

/// Collect the `file` part and the styling fields of an upload form.
async fn read_upload_form(mut multipart: Multipart) -> Result<(Upload, BeautifyRequest), BeautifyError> {
    let mut upload = None;
    let mut request = BeautifyRequest::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| BeautifyError::InvalidRequest(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| BeautifyError::InvalidRequest(e.body_text()))?;
                upload = Some(Upload::new(file_name, bytes.to_vec()));
            }
            "template" | "instructions" | "title" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| BeautifyError::InvalidRequest(e.body_text()))?;
                let value = Some(text.trim().to_string()).filter(|s| !s.is_empty());
                match name.as_str() {
                    "template" => request.template = value,
                    "instructions" => request.instructions = value,
                    _ => request.title = value,
                }
            }
            other => debug!("Ignoring form field '{}'", other),
        }
    }

    let upload =
        upload.ok_or_else(|| BeautifyError::InvalidRequest("form has no 'file' field".into()))?;
    Ok((upload, request))
}

fn submitted(task_id: String, status: TaskStatus) -> Json<SubmitResponse> {
    Json(SubmitResponse {
        success: true,
        task_id,
        status: status.to_string(),
        message: None,
    })
}

/// GET /api/download?taskId=… - finished HTML as an attachment
async fn download_handler(
    State(state): State<AppState>,
    Query(query): Query<TaskIdQuery>,
) -> Result<Response, BeautifyError> {
    let id = validate_task_id(query.resolve())?;
    let task = state
        .beautifier
        .store()
        .get(&id)
        .await?
        .ok_or_else(|| BeautifyError::TaskNotFound { id: id.clone() })?;

    if task.status != TaskStatus::Completed {
        return Err(BeautifyError::TaskNotReady {
            id,
            status: task.status.to_string(),
        });
    }
    let html = task
        .result_html()
        .ok_or_else(|| BeautifyError::Internal(format!("task {id} completed without HTML")))?
        .to_string();

    let disposition = format!("attachment; filename=\"beautified-{id}.html\"");
    Ok((
        [
            (header::CONTENT_TYPE, "text/html; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        html,
    )
        .into_response())
}

/// GET /api/index - API overview
async fn index_handler(State(state): State<AppState>) -> Json<IndexResponse> {
    let beautifier = &state.beautifier;
    Json(IndexResponse {
        success: true,
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        description: env!("CARGO_PKG_DESCRIPTION"),
        uptime_seconds: state.uptime_seconds(),
        endpoints: ENDPOINTS,
        services: ServicesInfo {
            task_store: beautifier.store().backend_name(),
            deepseek: beautifier.deepseek().is_some(),
            colorize: beautifier.colorize_configured(),
            model: beautifier.config().model.clone(),
        },
    })
}

/// GET|POST /api/test-deepseek - 200 on an upstream 2xx, 500 otherwise
async fn test_deepseek_handler(State(state): State<AppState>) -> (StatusCode, Json<PingOutcome>) {
    let outcome = match state.beautifier.deepseek() {
        Some(client) => client.ping().await,
        None => PingOutcome::not_configured(&state.beautifier.config().model),
    };
    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(outcome))
}

async fn not_found_handler(uri: Uri) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            success: false,
            error: format!("No route for {}", uri.path()),
        }),
    )
}

/// Parse a JSON body that may legitimately be empty.
fn parse_optional_json<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<Option<T>, BeautifyError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| BeautifyError::InvalidRequest(format!("invalid JSON body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_parses_as_none() {
        let parsed: Option<TaskIdQuery> = parse_optional_json(b"  \n").unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn malformed_body_is_invalid_request() {
        let err = parse_optional_json::<TaskIdQuery>(b"{not json").unwrap_err();
        assert!(matches!(err, BeautifyError::InvalidRequest(_)));
    }
}
