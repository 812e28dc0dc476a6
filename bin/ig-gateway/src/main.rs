//! Integration Gateway Server
//!
//! Single public entry point in front of the registered integrations:
//! - Change-capture webhook fan-out to connected users
//! - Dashboard aggregation, health, subscriptions
//! - Proxying of integration-declared routes
//! - Prometheus metrics at `/metrics`
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `IG_CONFIG` | - | Path to a TOML config file |
//! | `IG_BIND` | `0.0.0.0:8080` | HTTP listen address |
//! | `IG_STORE_BACKEND` | `redis` | `redis` or `memory` |
//! | `IG_REDIS_URL` | - | Shared store URL, required for the `redis` backend (`REDIS_URL` also read) |
//! | `IG_WEBHOOK_SECRET` | - | Bearer secret for `/webhooks/changes` |
//! | `IG_LOG_FORMAT` | `text` | `json` for structured logs |
//! | `RUST_LOG` | `info` | Log level |

use anyhow::Result;
use axum::routing::get;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::{net::TcpListener, signal, sync::watch};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ig_api::{client_config, create_router, GatewayState};
use ig_config::{GatewayConfig, StoreBackend};
use ig_router::HttpIntegrationClient;
use ig_store::{KeyValueStore, MemoryStore, RedisStore};

/// How long open connections (event streams included) may drain after a shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "ig-gateway")]
#[command(about = "Integration Gateway - routes changes, dashboards and requests to integrations")]
struct Args {
    /// TOML configuration file
    #[arg(long, env = "IG_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let config = GatewayConfig::load(args.config.as_deref())?;
    info!("Starting Integration Gateway");

    let store: Arc<dyn KeyValueStore> = match config.store.backend {
        StoreBackend::Redis => Arc::new(RedisStore::connect(&config.store.redis_url).await?),
        StoreBackend::Memory => {
            warn!("Using in-memory store; integrations in other processes cannot register");
            Arc::new(MemoryStore::new())
        }
    };
    info!(backend = store.backend_name(), "Store ready");

    let metrics = PrometheusBuilder::new().install_recorder()?;
    let client = Arc::new(HttpIntegrationClient::new(client_config(&config))?);
    let state = GatewayState::from_config(&config, store, client);

    let app = create_router(state)
        .route("/metrics", get(move || std::future::ready(metrics.render())))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;
    info!("Gateway listening on http://{}", addr);

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            })
            .await
    });

    shutdown_signal().await;
    info!("Shutdown signal received...");
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(SHUTDOWN_GRACE, server).await {
        Ok(joined) => joined??,
        Err(_) => warn!("Connections still open after {:?}, exiting", SHUTDOWN_GRACE),
    }

    info!("Integration Gateway shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let json = std::env::var("IG_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
