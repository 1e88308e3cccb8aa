//! Clothing Classifier - Main Entry Point
//!
//! Loads the classification model once, then serves predictions over HTTP.
//! Usage: `clothing-classifier [config.toml]`

use anyhow::{Context, Result};
use clothing_classifier::{
    api::{self, AppState},
    config::{AppConfig, LoggingConfig, DEFAULT_CONFIG_PATH},
    metrics::{MetricsReporter, ServiceMetrics},
    models::ModelLoader,
    predictor::Predictor,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let (config, config_path) = match std::env::args().nth(1) {
        Some(path) => (AppConfig::load_from_path(&path)?, path),
        None => (AppConfig::load()?, DEFAULT_CONFIG_PATH.to_string()),
    };

    init_logging(&config.logging)?;
    info!(config = %config_path, "Starting Clothing Classifier");

    // Model loading is blocking (hub download + session build)
    let loader = ModelLoader::new(&config.model);
    let model_id = config.model.id.clone();
    let artifact = tokio::task::spawn_blocking(move || loader.load(&model_id))
        .await
        .context("Model loading task panicked")?
        .with_context(|| format!("Failed to load model artifact {}", config.model.id))?;

    let predictor = Predictor::from_artifact(artifact);
    info!(
        model = %predictor.model_id(),
        labels = predictor.labels().len(),
        "Model ready"
    );

    let metrics = Arc::new(ServiceMetrics::new());
    if config.metrics.report_interval_secs > 0 {
        let reporter = MetricsReporter::new(metrics.clone(), config.metrics.report_interval_secs);
        tokio::spawn(reporter.start());
    }

    let state = AppState::new(predictor, metrics.clone());
    let app = api::router(state, config.server.max_body_bytes);

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(address = %addr, "Listening for prediction requests");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Service shutting down...");
    metrics.print_summary();

    Ok(())
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("info")
            .add_directive(format!("clothing_classifier={}", logging.level).parse()?),
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
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
