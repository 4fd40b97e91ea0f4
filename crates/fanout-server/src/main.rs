//! # Fanout Server
//!
//! Multi-tenant realtime fanout server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings (JWT_SECRET is required)
//! JWT_SECRET=... fanout
//!
//! # Run with custom config
//! fanout --config /path/to/fanout.toml
//!
//! # Run with environment variables
//! FANOUT_PORT=3002 REDIS_URL=redis://redis:6379 fanout
//!
//! # Run without Redis (single instance, no event bus)
//! FANOUT__REDIS__URL=memory fanout
//! ```

mod auth;
mod config;
mod handlers;
mod metrics;
mod session;
mod store;

use anyhow::{Context, Result};
use fanout_core::{Bridge, Hub, HubConfig, MemoryStore};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::handlers::AppState;
use crate::store::RedisStore;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fanout=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match config_path() {
        Some(path) => config::Config::from_file(&path)?,
        None => config::Config::load()?,
    };

    info!("Starting fanout server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let (hub, hub_task) = Hub::spawn(&HubConfig {
        inbox_capacity: config.hub.inbox_capacity,
    });
    let background = CancellationToken::new();

    let (state, bridge_task) = if config.redis.is_memory() {
        warn!("Using in-memory store; event bus disabled");
        let store = Arc::new(MemoryStore::new());
        let state = AppState::new(
            config.clone(),
            hub.clone(),
            store.clone(),
            store.clone(),
            store,
        );
        (state, None)
    } else {
        let store = RedisStore::connect(&config.redis.url)
            .await
            .context("Redis is unreachable")?;

        let subscribe = {
            let store = store.clone();
            let channel = config.redis.events_channel.clone();
            move || {
                let store = store.clone();
                let channel = channel.clone();
                async move {
                    let events = store.subscribe(&channel).await?;
                    Ok::<_, redis::RedisError>(events.inspect(|_| metrics::record_bus_event()))
                }
            }
        };
        let bridge_task = tokio::spawn(Bridge::new(hub.clone()).run_resubscribing(
            subscribe,
            config.redis.resubscribe(),
            background.clone(),
        ));

        let store = Arc::new(store);
        let state = AppState::new(
            config.clone(),
            hub.clone(),
            store.clone(),
            store.clone(),
            store,
        );
        (state, Some(bridge_task))
    };

    if config.metrics.enabled {
        tokio::spawn(metrics::report_hub_stats(
            hub.clone(),
            Duration::from_millis(config.metrics.sample_interval_ms),
            background.clone(),
        ));
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let stop_accepting = CancellationToken::new();
    tokio::spawn({
        let stop_accepting = stop_accepting.clone();
        async move {
            shutdown_signal().await;
            info!("Shutdown signal received");
            stop_accepting.cancel();
        }
    });

    handlers::serve(listener, Arc::new(state), stop_accepting).await?;

    // Listener is closed; stop the bridge, then close every connection.
    background.cancel();
    if let Some(task) = bridge_task {
        if let Err(e) = task.await {
            warn!(error = %e, "Event bridge task failed");
        }
    }
    if hub.shutdown().await.is_ok() {
        if let Err(e) = hub_task.await {
            warn!(error = %e, "Hub task failed");
        }
    }

    info!("Fanout server stopped");
    Ok(())
}

/// `--config <path>` from the command line, if given.
fn config_path() -> Option<String> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(path.to_string());
        }
    }
    None
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
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
