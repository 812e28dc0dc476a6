//! Integration announcer
//!
//! Runs next to an integration and keeps its registration lease alive in the
//! shared store until terminated, then withdraws it.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `IG_ANNOUNCE_CONFIG` | - | Path to the announce TOML file |
//! | `IG_REDIS_URL` | - | Shared store URL, required (`REDIS_URL` also read) |
//! | `IG_INTERNAL_URL` | - | Overrides `integration.internal_url` |
//! | `IG_LEASE_TTL_SECS` | `30` | Lease lifetime |
//! | `IG_RENEW_INTERVAL_SECS` | `20` | Renewal period |
//! | `RUST_LOG` | `info` | Log level |

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ig_config::AnnounceConfig;
use ig_registry::{LeaseConfig, LeaseKeeper, ServiceRegistry};
use ig_store::RedisStore;

#[derive(Parser, Debug)]
#[command(name = "ig-announce")]
#[command(about = "Keep an integration registered with the Integration Gateway")]
struct Args {
    /// Announce configuration file
    #[arg(long, env = "IG_ANNOUNCE_CONFIG")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let config = AnnounceConfig::load(&args.config)?;
    info!(
        integration = %config.integration.name,
        internal_url = %config.integration.internal_url,
        "Announcing integration"
    );

    let store = Arc::new(RedisStore::connect(&config.store.redis_url).await?);
    let registry = Arc::new(ServiceRegistry::new(store));
    let keeper = LeaseKeeper::start(
        registry,
        config.integration,
        LeaseConfig {
            ttl: config.registry.lease_ttl(),
            renew_interval: config.registry.renew_interval(),
        },
    )?;

    shutdown_signal().await;
    info!(integration = %keeper.name(), "Shutdown signal received, withdrawing registration");
    keeper.shutdown().await;

    info!("Announcer stopped");
    Ok(())
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
