//! Read-only diagnostics API.
//!
//! Served on its own listener so it never shares routes with deployed
//! applications.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::routing::ApplicationServer;

#[derive(Clone)]
pub struct AdminState {
    pub engine: Arc<ApplicationServer>,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/applications", get(get_applications))
        .route("/admin/mappings", get(get_mappings))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}

/// Serve the admin API until `shutdown` fires.
pub async fn serve_admin(
    listener: TcpListener,
    state: AdminState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    tracing::info!(address = %listener.local_addr()?, "Admin API listening");
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::webapp::application::WebApplication;
    use crate::webapp::builtin::InstantiatorRegistry;

    fn state() -> AdminState {
        let engine = Arc::new(ApplicationServer::new());
        let app = Arc::new(WebApplication::new(
            "shop",
            "/shop",
            Arc::new(InstantiatorRegistry::with_builtins()),
        ));
        app.add_handler("echo", "echo").unwrap().add_mapping(&["/echo/*"]).unwrap();
        app.start().unwrap();
        engine.deploy(app).unwrap();
        AdminState {
            engine,
            api_key: Arc::from("secret"),
        }
    }

    #[tokio::test]
    async fn test_requires_bearer_token() {
        let response = setup_admin_router(state())
            .oneshot(Request::builder().uri("/admin/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = setup_admin_router(state())
            .oneshot(
                Request::builder()
                    .uri("/admin/status")
                    .header("authorization", "Bearer wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_mappings_snapshot() {
        let response = setup_admin_router(state())
            .oneshot(
                Request::builder()
                    .uri("/admin/mappings")
                    .header("authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        let snapshots: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(snapshots[0]["context_path"], "/shop");
        assert_eq!(snapshots[0]["state"], "running");
        assert_eq!(snapshots[0]["mappings"]["/echo/*"], "echo");
    }
}
