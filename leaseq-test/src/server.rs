//! Test server management

use leaseq::{build_state, create_router, Config};
use leaseq_queue::QueueState;
use portpicker::pick_unused_port;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

use crate::STARTUP_TIMEOUT_SECS;

/// A running Leaseq test server
pub struct TestServer {
    handle: JoinHandle<()>,
    state: Arc<QueueState>,
    port: u16,
    base_url: String,
}

impl TestServer {
    /// Start a server with default configuration on a random available port
    pub async fn start() -> Result<Self, TestError> {
        Self::start_with(Config::default()).await
    }

    /// Start a server with the given configuration; the port is always picked
    pub async fn start_with(mut config: Config) -> Result<Self, TestError> {
        let port = pick_unused_port().ok_or(TestError::NoPortAvailable)?;
        config.server.host = "127.0.0.1".to_string();
        config.server.port = port;

        info!(port = port, "Starting Leaseq test server");

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|_| TestError::PortInUse(port))?;

        let state = build_state(&config);
        let app = create_router(state.clone());
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "Test server failed");
            }
        });

        let base_url = format!("http://127.0.0.1:{}", port);
        let health_url = format!("{}/health", base_url);
        let start = std::time::Instant::now();

        while start.elapsed() < Duration::from_secs(STARTUP_TIMEOUT_SECS) {
            if let Ok(response) = reqwest::get(&health_url).await {
                if response.status().is_success() {
                    info!(port = port, "Leaseq ready");
                    return Ok(Self {
                        handle,
                        state,
                        port,
                        base_url,
                    });
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        handle.abort();
        Err(TestError::StartupTimeout)
    }

    /// Get the base URL
    pub fn url(&self) -> &str {
        &self.base_url
    }

    /// Get the port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Direct access to the served queue, bypassing HTTP
    pub fn state(&self) -> &Arc<QueueState> {
        &self.state
    }

    /// Drop every message
    pub fn reset(&self) -> usize {
        self.state.queue().clear()
    }

    /// Get a client for interacting with the server
    pub fn client(&self) -> crate::LeaseqClient {
        crate::LeaseqClient::new(self.base_url.clone())
    }

    /// Stop the server
    pub fn stop(&self) {
        info!("Stopping Leaseq test server");
        self.handle.abort();
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Errors that can occur with test server
#[derive(Debug, Error)]
pub enum TestError {
    #[error("No available port found")]
    NoPortAvailable,
    #[error("Port {0} is already in use")]
    PortInUse(u16),
    #[error("Server startup timed out")]
    StartupTimeout,
}
