use kokeilu::config::{apply_seed, load_seed_file, EngineConfig};
use kokeilu::engine::{ExperimentService, FlagService, MemoryStore, SystemClock};
use kokeilu::server::{
    create_metrics, run_health_server, shutdown_channel, wait_for_signal, ReadinessState,
};
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting kokeilu flag and experiment service");

    let config = EngineConfig::from_env();
    info!(
        cache_ttl_seconds = config.cache_ttl_seconds,
        health_port = config.health_port,
        min_sample_size = config.default_min_sample_size,
        confidence_level = config.default_confidence_level,
        "Configuration loaded"
    );

    let (shutdown_controller, shutdown_signal) = shutdown_channel();
    let readiness = ReadinessState::new();

    let metrics = create_metrics()?;
    info!("Prometheus metrics registry initialized");

    let clock = Arc::new(SystemClock);
    let store = Arc::new(MemoryStore::new(clock.clone()));
    let flags = FlagService::new(
        store.clone(),
        clock.clone(),
        config.cache_ttl(),
        Some(metrics.clone()),
    );
    let experiments = ExperimentService::new(
        store,
        clock,
        config.experiment_defaults(),
        Some(metrics.clone()),
    );

    if let Some(path) = &config.seed_file {
        let doc = load_seed_file(path).await?;
        apply_seed(doc, &flags, &experiments).await?;
    } else {
        info!("No seed file configured - starting with an empty store");
    }

    let health_readiness = readiness.clone();
    let health_metrics = metrics.clone();
    let health_port = config.health_port;
    let health_handle = tokio::spawn(async move {
        if let Err(e) =
            run_health_server(health_port, health_readiness, health_metrics, shutdown_signal).await
        {
            error!(error = %e, "Health server failed");
        }
    });

    // Ready once the first snapshot is in memory
    if let Err(e) = flags.cache().refresh().await {
        warn!(error = %e, "Initial flag cache load failed, evaluations will fall back to the store");
    }
    readiness.set_ready();
    info!("Service ready");

    match wait_for_signal().await {
        Ok(signal) => info!(signal = signal, "Initiating graceful shutdown"),
        Err(e) => error!(error = %e, "Cannot listen for termination signals, shutting down"),
    }
    readiness.set_not_ready();
    shutdown_controller.shutdown();

    if let Err(e) = health_handle.await {
        warn!(error = %e, "Health server task did not finish cleanly");
    }

    info!("kokeilu shut down gracefully");
    Ok(())
}
