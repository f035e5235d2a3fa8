use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use inference_engine::EngineRegistry;
use predict_service::config::{Config, LogFormat};
use predict_service::{metrics, transport, Pipeline, PredictStage};
use tracing::{info, warn};

const SERVICE_NAME: &str = "predict-service";

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    // Initialize tracing
    match config.log_format {
        LogFormat::Text => predict_core::init_tracing(SERVICE_NAME),
        LogFormat::Json => predict_core::init_tracing_json(SERVICE_NAME),
    }

    if let Some(addr) = config.metrics_addr {
        metrics::init_metrics(addr).context("failed to start metrics exporter")?;
    }

    info!(
        input = %config.input,
        output = %config.output,
        model = %config.model.display(),
        concurrency = config.concurrency,
        cache_mode = ?config.cache_mode,
        "Prediction service starting"
    );

    let registry = Arc::new(EngineRegistry::new(config.cache_mode.into()));

    // Fail fast on a bad checkpoint rather than on the first record
    if !config.lazy_load {
        let registry = Arc::clone(&registry);
        let model = config.model.clone();
        tokio::task::spawn_blocking(move || registry.get(&model))
            .await?
            .with_context(|| format!("failed to load model from {}", config.model.display()))?;
    }

    let mut stage =
        PredictStage::new(registry, config.model.clone()).with_max_in_flight(config.concurrency);
    if let Some(timeout) = config.predict_timeout() {
        stage = stage.with_timeout(timeout);
    }

    let source = transport::subscribe(&config.input)
        .await
        .with_context(|| format!("failed to subscribe to {}", config.input))?;
    let sink = transport::publisher(&config.output)
        .await
        .with_context(|| format!("failed to open {}", config.output))?;

    let mut pipeline =
        Pipeline::new(Arc::new(stage), source, sink).with_concurrency(config.concurrency);
    if let Some(dead_letter) = &config.dead_letter {
        let sink = transport::publisher(dead_letter)
            .await
            .with_context(|| format!("failed to open {dead_letter}"))?;
        pipeline = pipeline.with_dead_letter(sink);
    }

    let stats = pipeline.run(shutdown_signal()).await?;

    info!(
        received = stats.received,
        published = stats.published,
        failed = stats.failed,
        dead_lettered = stats.dead_lettered,
        "Prediction service stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Unable to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
