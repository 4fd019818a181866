//! # featureloom server
//!
//! ```bash
//! # Start with ./feature_store.yaml
//! featureloom-server serve
//!
//! # Explicit config and port
//! featureloom-server serve --config repo/feature_store.yaml --port 6566
//!
//! # Production logging
//! LOG_FORMAT=json RUST_LOG=info,featureloom=debug featureloom-server serve
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use featureloom::FeatureStore;
use featureloom_server::{metrics, router, shutdown::shutdown_signal, AppState, ServerLimits};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "featureloom-server")]
#[command(about = "HTTP feature server for featureloom", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Feature repository configuration
        #[arg(short, long, default_value = "feature_store.yaml")]
        config: String,

        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        #[arg(short, long, default_value = "6566")]
        port: u16,

        #[arg(long, env = "FEATURELOOM_REQUEST_TIMEOUT", default_value = "60")]
        request_timeout_secs: u64,

        #[arg(long, env = "FEATURELOOM_MAX_BODY_SIZE", default_value = "10485760")]
        max_body_bytes: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG picks levels (default info); LOG_FORMAT=json for production
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty().with_target(false).with_thread_ids(false))
            .init();
    }

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve {
            config,
            host,
            port,
            request_timeout_secs,
            max_body_bytes,
        } => {
            let limits = ServerLimits {
                max_body_bytes,
                request_timeout: Duration::from_secs(request_timeout_secs),
            };
            serve(&config, &host, port, limits).await
        }
    }
}

async fn serve(
    config_path: &str,
    host: &str,
    port: u16,
    limits: ServerLimits,
) -> anyhow::Result<()> {
    info!(config = config_path, "Starting featureloom server");

    let store = FeatureStore::open(config_path)
        .await
        .with_context(|| format!("failed to open feature store from {}", config_path))?;
    info!(
        project = store.project(),
        registry = %store.registry().store().location(),
        online_store = store.online_store().store_type(),
        "Feature store ready"
    );

    info!(
        max_body_mb = limits.max_body_bytes / (1024 * 1024),
        request_timeout_secs = limits.request_timeout.as_secs(),
        "Server resilience config"
    );
    metrics::init_metrics();
    let app = router(AppState::new(store), limits);

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("invalid host/port {}:{}", host, port))?;
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server shut down gracefully");
    Ok(())
}
