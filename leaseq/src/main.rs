//! Leaseq - lease-based message queue service
//!
//! Serves a single FIFO queue over HTTP/JSON. Received messages stay hidden
//! for their visibility timeout and are removed only with a matching lease
//! token.

use clap::Parser;
use leaseq::{build_state, create_router, spawn_expiry_sweep, Config};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "leaseq")]
#[command(about = "Lease-based message queue service", long_about = None)]
struct Args {
    /// Configuration file (toml, yaml or json)
    #[arg(short, long, env = "LEASEQ_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "LEASEQ_PORT")]
    port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "LEASEQ_HOST")]
    host: Option<String>,

    /// Name of the queue served by this instance
    #[arg(long, env = "LEASEQ_QUEUE_NAME")]
    queue_name: Option<String>,

    /// Seconds between expired-message sweeps, 0 disables
    #[arg(long, env = "LEASEQ_SWEEP_INTERVAL")]
    sweep_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LEASEQ_LOG_LEVEL")]
    log_level: String,
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(name) = self.queue_name {
            config.queue.name = name;
        }
        if let Some(secs) = self.sweep_interval {
            config.queue.sweep_interval_secs = secs;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "leaseq={level},leaseq_queue={level},tower_http=debug",
                    level = args.log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    info!("Starting Leaseq...");
    info!("  Queue: {}", config.queue.name);
    info!(
        "  Defaults: ttl {}s, visibility timeout {}s",
        config.queue.default_ttl_secs, config.queue.default_visibility_timeout_secs
    );

    let state = build_state(&config);
    let _sweep = spawn_expiry_sweep(state.clone(), config.sweep_interval());

    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Leaseq stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
