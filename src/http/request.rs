//! Request conversion from the transport into the engine.
//!
//! # Responsibilities
//! - Carry the request ID assigned by the request-id layer
//! - Buffer the body within the configured size limit
//! - Build the engine's [`WebRequest`] (method, URI, headers, body)
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - The body is buffered: handlers run synchronously on a blocking thread

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
};

use crate::webapp::request::WebRequest;

/// Header carrying the request correlation ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Convert an incoming request, or produce the rejection to send instead.
pub async fn into_web_request(request: Request<Body>, max_body_size: usize) -> Result<WebRequest, Response> {
    let (parts, body) = request.into_parts();

    let request_id = parts
        .headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let body = match axum::body::to_bytes(body, max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(
                request_id = request_id.as_deref().unwrap_or("unknown"),
                error = %e,
                limit = max_body_size,
                "Request body rejected"
            );
            return Err((StatusCode::PAYLOAD_TOO_LARGE, "413 Payload Too Large").into_response());
        }
    };

    let uri = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let mut web_request = WebRequest::new(parts.method.as_str(), uri)
        .with_headers(parts.headers)
        .with_body(body);
    if let Some(id) = request_id {
        web_request = web_request.with_request_id(id);
    }
    Ok(web_request)
}
