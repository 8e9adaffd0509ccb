//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use webapp_engine::config::loader::parse_config;
use webapp_engine::lifecycle::{build_server, Shutdown};
use webapp_engine::net::Listener;
use webapp_engine::{ApplicationServer, EngineConfig, HttpServer, InstantiatorRegistry};

/// A running engine on an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub engine: Arc<ApplicationServer>,
    pub shutdown: Shutdown,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Serve an already-built engine on 127.0.0.1:0.
pub async fn serve(engine: Arc<ApplicationServer>, config: EngineConfig) -> TestServer {
    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    let listener = Listener::from_tcp(tcp, 64).unwrap();
    let shutdown = Shutdown::new();

    let server = HttpServer::new(Arc::clone(&engine), config);
    tokio::spawn(server.run(listener, shutdown.subscribe()));

    TestServer {
        addr,
        engine,
        shutdown,
    }
}

/// Build the engine from TOML and serve it.
#[allow(dead_code)]
pub async fn serve_config(toml: &str) -> TestServer {
    let config = parse_config(toml).unwrap();
    let engine = build_server(&config, Arc::new(InstantiatorRegistry::with_builtins())).unwrap();
    serve(engine, config).await
}
