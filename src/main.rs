//! webapp-engine
//!
//! Serves the applications described in a TOML configuration file.
//!
//! ```text
//!   Client ──▶ net::Listener ──▶ http::HttpServer ──▶ routing::ApplicationServer
//!                                                         │
//!                                     ┌───────────────────┼───────────────────┐
//!                                     ▼                   ▼                   ▼
//!                               WebApplication      WebApplication      WebApplication
//!                            (filters → handler)   (forward/include)    (sessions)
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use webapp_engine::admin::{serve_admin, AdminState};
use webapp_engine::config::{load_config, EngineConfig};
use webapp_engine::lifecycle::{build_server, signals, Shutdown};
use webapp_engine::net::Listener;
use webapp_engine::observability::{logging, metrics};
use webapp_engine::session::sweeper::SessionSweeper;
use webapp_engine::{HttpServer, InstantiatorRegistry};

#[derive(Parser, Debug)]
#[command(name = "webapp-engine", version, about = "Servlet-style web application engine")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "engine.toml")]
    config: PathBuf,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config: EngineConfig = load_config(&args.config)?;
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        applications = config.applications.len(),
        "webapp-engine starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let engine = build_server(&config, Arc::new(InstantiatorRegistry::with_builtins()))?;
    let shutdown = Shutdown::new();

    let sweeper = SessionSweeper::new(
        Arc::clone(&engine),
        Duration::from_secs(config.sessions.sweep_interval_secs),
    );
    tokio::spawn(sweeper.run(shutdown.subscribe()));

    if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        let state = AdminState {
            engine: Arc::clone(&engine),
            api_key: Arc::from(config.admin.api_key.as_str()),
        };
        let admin_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = serve_admin(listener, state, admin_shutdown).await {
                tracing::error!(error = %e, "Admin API failed");
            }
        });
    }

    let listener = Listener::bind(&config.listener).await?;
    let server = HttpServer::new(Arc::clone(&engine), config);
    let server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    signals::shutdown_on_signal(&shutdown).await;

    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "HTTP server failed"),
        Err(e) => tracing::error!(error = %e, "HTTP server task panicked"),
    }

    for app in engine.applications() {
        if let Err(e) = app.stop() {
            tracing::warn!(application = %app.name(), error = %e, "Application did not stop cleanly");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
