//! Soilwatch — Binary Entrypoint
//! Boots the heartbeat scheduler and the Axum HTTP surface (trigger
//! endpoint, stations view, debug routes, Prometheus metrics).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use soilwatch::api::{self, AppState};
use soilwatch::batch::BatchUpdater;
use soilwatch::config::AppConfig;
use soilwatch::heartbeat::{Heartbeat, HeartbeatCfg};
use soilwatch::metrics::Metrics;
use soilwatch::station::{MemoryRegistry, StationRegistry};
use soilwatch::transport::{FileTransport, FtpTransport};

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("soilwatch=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::load_default().context("loading configuration")?;

    let registry: Arc<dyn StationRegistry> = Arc::new(
        MemoryRegistry::from_toml_file(&cfg.stations_path).context("loading station file")?,
    );
    let transport: Arc<dyn FileTransport> = Arc::new(FtpTransport::new(cfg.ftp.clone()));

    let metrics = Metrics::init(cfg.heartbeat.interval_secs);

    let heartbeat = Arc::new(Heartbeat::new(
        registry.clone(),
        transport.clone(),
        HeartbeatCfg {
            interval: Duration::from_secs(cfg.heartbeat.interval_secs),
            rain_column: cfg.aggregation.rain_column.clone(),
            rolling_window: cfg.aggregation.rolling_window,
        },
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = heartbeat.clone().spawn(shutdown_rx);

    let state = AppState {
        batch: BatchUpdater::new(registry.clone()),
        registry,
        transport,
        heartbeat,
    };

    let app = api::create_router(state).merge(metrics.router());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, interval_secs = cfg.heartbeat.interval_secs, "soilwatch listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("http server")?;

    // Stop the scheduler between ticks and wait for it to wind down.
    let _ = shutdown_tx.send(true);
    let _ = scheduler.await;
    Ok(())
}
