mod app;
mod history;

use anyhow::{Context, Result};
use common::{AppConfig, Pipeline};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app::{router, AppState};
use crate::history::HistoryStore;

/// Overrides `server.bind` from the config file.
const BIND_ENV: &str = "LEAF_BIND";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("onnx_server=info,common=info,tower_http=info")),
        )
        .init();

    info!("======================================================================");
    info!("Plant Disease Detector API - Starting");
    info!("======================================================================");

    // Load configuration
    let (mut config, config_path) = AppConfig::from_env()?;
    match &config_path {
        Some(path) => info!("Config: {}", path.display()),
        None => info!("Config: built-in defaults"),
    }
    if let Ok(bind) = std::env::var(BIND_ENV) {
        config.server.bind = bind
            .parse::<SocketAddr>()
            .with_context(|| format!("{} is not a socket address: {}", BIND_ENV, bind))?;
    }

    let pipeline = Arc::new(Pipeline::from_config(&config));
    info!("Labels: {}", pipeline.labels().len());
    info!("Disease entries: {}", pipeline.catalog().len());

    // Load model once; a failure leaves the API up but every /predict answers 503
    let load = {
        let pipeline = Arc::clone(&pipeline);
        tokio::task::spawn_blocking(move || pipeline.load_model()).await?
    };
    match load {
        Ok(model) => info!("Model: {}", model.path().display()),
        Err(e) => {
            error!("{}", e);
            warn!("Serving without a model; /predict will fail until restart");
        }
    }

    let history = HistoryStore::open(&config.history.path)?;
    info!("History: {} ({} records)", history.path().display(), history.len());

    let bind = config.server.bind;
    let state = Arc::new(AppState::new(pipeline, history, config));
    let app = router(state);

    info!("Server ready on http://{}", bind);
    info!("======================================================================");

    // Start server
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
