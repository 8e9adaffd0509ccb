//! HTTP transport subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (net::Listener)
//!     → server.rs (hyper http1 connection, Axum router, middleware)
//!     → request.rs (request ID, body limit, WebRequest)
//!     → routing::ApplicationServer::service (blocking thread)
//!     → response.rs (WebResponse → HTTP response)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{into_web_request, X_REQUEST_ID};
pub use response::into_http_response;
pub use server::{AppState, HttpServer};
