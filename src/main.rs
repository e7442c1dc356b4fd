use std::net::SocketAddr;

use hiregate::{app, initialize_state, telemetry};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::var("CONFIG_PATH").unwrap_or_default();
    let telemetry_config = hiregate::config::Configuration::default()
        .path(path.into())
        .read()?
        .telemetry
        .clone();
    let tracer = telemetry::init(telemetry_config.as_ref());

    let state = initialize_state().await?;
    let port = state.config.port;

    let mut router = app(state);
    match telemetry::setup_metrics_recorder() {
        Ok(handle) => router = router.merge(telemetry::metrics_router(handle)),
        Err(err) => tracing::error!(%err, "prometheus recorder not installed, /metrics disabled"),
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "hiregate listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(provider) = tracer {
        if let Err(err) = provider.shutdown() {
            tracing::warn!(%err, "trace exporter did not flush");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "cannot listen for shutdown signal");
    }
    tracing::info!("shutting down");
}
