mod api;
mod aqi;
mod config;
mod flux;
mod influx;
mod latest;
mod state;
mod store;

use config::Config;
use state::AppState;
use std::{net::SocketAddr, sync::Arc};
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = match std::env::var("AQI_LATEST_CONFIG") {
        Ok(path) => Config::from_file(&path)?,
        Err(_) => Config::from_env()?,
    };

    // RUST_LOG wins over LOG_LEVEL when both are set
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cfg.log_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let state = Arc::new(AppState::from_config(&cfg)?);
    let app = api::router(state);

    let listen = cfg.listen.unwrap_or_else(|| "0.0.0.0:5000".into());
    let addr: SocketAddr = listen.parse()?;
    info!(%addr, "Starting aqi-latest");

    let server = axum::Server::bind(&addr).serve(app.into_make_service());

    let graceful = server.with_graceful_shutdown(shutdown_signal());
    graceful.await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("Shutdown signal received");
}
