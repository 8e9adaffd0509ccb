//! Servlet-style web application engine.
//!
//! Deployed [`WebApplication`]s own handlers, filters, URL mappings and
//! sessions; the [`ApplicationServer`] routes each request to the right
//! application and runs its filter chain, with forward, include, async and
//! error re-dispatch through [`RequestDispatcher`].

// Core engine
pub mod dispatch;
pub mod routing;
pub mod session;
pub mod webapp;

// Transport
pub mod http;
pub mod net;

// Cross-cutting concerns
pub mod admin;
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use config::schema::EngineConfig;
pub use dispatch::RequestDispatcher;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use routing::ApplicationServer;
pub use webapp::{
    DispatchType, EngineError, Filter, Handler, InstantiatorRegistry, ServiceError, WebApplication,
    WebRequest, WebResponse,
};
