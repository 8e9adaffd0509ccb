//! Periodic idle-session expiry.
//!
//! # Responsibilities
//! - Tick on a fixed interval
//! - Ask every deployed application to expire idle sessions
//! - Exit on shutdown

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::time;

use crate::routing::router::ApplicationServer;

pub struct SessionSweeper {
    server: Arc<ApplicationServer>,
    interval: Duration,
}

impl SessionSweeper {
    pub fn new(server: Arc<ApplicationServer>, interval: Duration) -> Self {
        Self { server, interval }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Session sweeper starting"
        );

        let mut ticker = time::interval(self.interval);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let expired = self.sweep_once();
                    tracing::debug!(expired, "Session sweep complete");
                }
                _ = shutdown.recv() => {
                    tracing::info!("Session sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Expire idle sessions in every application once.
    pub fn sweep_once(&self) -> usize {
        let now = Instant::now();
        self.server
            .applications()
            .iter()
            .map(|app| app.sessions().expire_idle(now))
            .sum()
    }
}
