//! Response conversion from the engine back to the transport.
//!
//! # Design Decisions
//! - The engine buffers the whole response; it is sent as one body
//! - An out-of-range status becomes 500 rather than a broken response

use axum::{
    body::Body,
    http::StatusCode,
    response::Response,
};

use crate::webapp::response::WebResponse;

/// Convert a finished engine response.
pub fn into_http_response(response: WebResponse) -> Response {
    let (status, headers, body) = response.into_parts();
    let mut http = Response::new(Body::from(body));
    *http.status_mut() = StatusCode::from_u16(status).unwrap_or_else(|_| {
        tracing::warn!(status, "Handler set an invalid status code");
        StatusCode::INTERNAL_SERVER_ERROR
    });
    *http.headers_mut() = headers;
    http
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_converts_status_headers_and_body() {
        let mut web = WebResponse::new();
        web.set_status(201);
        web.set_header("x-engine", "on").unwrap();
        web.write_str("created");

        let response = into_http_response(web);
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["x-engine"], "on");
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(body.as_ref(), b"created");
    }
}
