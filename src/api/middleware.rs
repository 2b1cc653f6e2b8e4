//! Middleware: CORS, request timeout and request logging.

use super::models::ErrorResponse;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tracing::{info, warn};

/// Permissive CORS: any origin, method and header.
///
/// `CorsLayer` answers every `OPTIONS` request itself with 200, so
/// pre-flight never reaches a handler.
pub fn create_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .max_age(Duration::from_secs(86_400))
}

/// Abort requests that take longer than `timeout`.
///
/// The layer answers with an empty 408; [`timeout_json`] gives it the
/// uniform error body.
pub fn create_timeout_layer(timeout: Duration) -> TimeoutLayer {
    TimeoutLayer::new(timeout)
}

/// Give body-less 408 responses the `{success:false,error}` body.
pub async fn timeout_json(response: Response) -> Response {
    let empty = response
        .headers()
        .get(header::CONTENT_TYPE)
        .is_none();
    if response.status() != StatusCode::REQUEST_TIMEOUT || !empty {
        return response;
    }
    let body = ErrorResponse {
        success: false,
        error: "Request timed out".to_string(),
    };
    (StatusCode::REQUEST_TIMEOUT, Json(body)).into_response()
}

/// Log method, uri, status and latency of every request.
pub async fn request_logger(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();

    let response = next.run(req).await;

    let duration = start.elapsed();
    let status = response.status();

    if status.is_client_error() || status.is_server_error() {
        warn!(
            method = %method,
            uri = %uri,
            status = status.as_u16(),
            duration_ms = duration.as_millis() as u64,
            "Request failed"
        );
    } else {
        info!(
            method = %method,
            uri = %uri,
            status = status.as_u16(),
            duration_ms = duration.as_millis() as u64,
            "Request completed"
        );
    }

    response
}
