//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router that hands every request to the engine
//! - Wire up middleware (tracing, timeout, request ID)
//! - Serve HTTP/1.1 connections accepted by the [`Listener`]
//! - Drain open connections on shutdown

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper::server::conn::http1;
use hyper_util::{rt::TokioIo, service::TowerToHyperService};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    set_header::SetResponseHeaderLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::EngineConfig;
use crate::http::request::into_web_request;
use crate::http::response::into_http_response;
use crate::net::{ConnectionGuard, ConnectionPermit, ConnectionTracker, Listener, ListenerError};
use crate::routing::ApplicationServer;

const SERVER_HEADER: &str = concat!("webapp-engine/", env!("CARGO_PKG_VERSION"));

/// State injected into the engine handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ApplicationServer>,
    pub max_body_size: usize,
}

/// HTTP front end for an [`ApplicationServer`].
pub struct HttpServer {
    router: Router,
    config: EngineConfig,
    tracker: ConnectionTracker,
}

impl HttpServer {
    pub fn new(engine: Arc<ApplicationServer>, config: EngineConfig) -> Self {
        let state = AppState {
            engine,
            max_body_size: config.limits.max_body_size,
        };
        let router = Self::build_router(&config, state);
        Self {
            router,
            config,
            tracker: ConnectionTracker::new(),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &EngineConfig, state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(engine_handler))
            .route("/", any(engine_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(SetResponseHeaderLayer::if_not_present(
                header::SERVER,
                HeaderValue::from_static(SERVER_HEADER),
            ))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// The router, for serving it somewhere other than [`HttpServer::run`].
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Accept connections until `shutdown` fires, then drain.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            max_connections = listener.max_connections(),
            "HTTP server starting"
        );

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr, permit)) => {
                        let guard = self.tracker.track(peer_addr);
                        tokio::spawn(serve_connection(
                            stream,
                            self.router.clone(),
                            self.config.listener.keep_alive,
                            guard,
                            permit,
                            shutdown.resubscribe(),
                        ));
                    }
                    Err(ListenerError::Closed) => break,
                    Err(e) if e.is_transient() => {
                        tracing::debug!(error = %e, "Transient accept error");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting");
                    break;
                }
            }
        }

        listener.close();
        drop(listener);
        let drain_timeout = Duration::from_secs(self.config.timeouts.request_secs);
        if !self.tracker.wait_for_drain(drain_timeout).await {
            tracing::warn!(
                remaining = self.tracker.active_count(),
                "Connections still open after drain timeout"
            );
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    router: Router,
    keep_alive: bool,
    guard: ConnectionGuard,
    _permit: ConnectionPermit,
    mut shutdown: broadcast::Receiver<()>,
) {
    let service = TowerToHyperService::new(router);
    let conn = http1::Builder::new()
        .keep_alive(keep_alive)
        .serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = shutdown.recv() => {
            conn.as_mut().graceful_shutdown();
            conn.as_mut().await
        }
    };

    if let Err(e) = result {
        if e.is_incomplete_message() || e.is_closed() || e.is_canceled() {
            tracing::debug!(connection = guard.id().as_u64(), peer = %guard.peer_addr(), error = %e, "Connection closed early");
        } else {
            tracing::warn!(connection = guard.id().as_u64(), peer = %guard.peer_addr(), error = %e, "Connection error");
        }
    }
}

/// Hand the request to the engine on a blocking thread.
async fn engine_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let web_request = match into_web_request(request, state.max_body_size).await {
        Ok(r) => r,
        Err(rejection) => return rejection,
    };

    let engine = Arc::clone(&state.engine);
    match tokio::task::spawn_blocking(move || engine.service(web_request)).await {
        Ok(response) => into_http_response(response),
        Err(e) => {
            tracing::error!(error = %e, "Engine task failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "500 Internal Server Error").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_unknown_path_is_404_with_request_id() {
        let server = HttpServer::new(Arc::new(ApplicationServer::new()), EngineConfig::default());
        let response = server
            .router()
            .oneshot(Request::builder().uri("/nothing").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().contains_key("x-request-id"));
        assert_eq!(response.headers()["server"], SERVER_HEADER);
    }
}
