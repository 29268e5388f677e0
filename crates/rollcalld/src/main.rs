use anyhow::{Context, Result};
use rollcall_core::onnx::OnnxEmbedder;
use rollcall_core::{DirectoryStore, FaceAnalyzer, FaceStore};
use rollcalld::{router, spawn_engine, AppState, Config, ServiceInfo};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load().context("loading configuration")?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.bind,
        data_dir = %config.data_dir.display(),
        model = %config.model,
        metric = %config.metric,
        threshold = config.effective_threshold(),
        strategy = %config.strategy,
        "rollcalld starting"
    );

    let store = Arc::new(DirectoryStore::open(&config.data_dir)?);
    tracing::info!(root = %store.root().display(), "face store ready");
    let embedder = OnnxEmbedder::load(&config.onnx()).context("loading face models")?;
    let analyzer = FaceAnalyzer::new(embedder, config.model, config.metric)
        .with_threshold(config.effective_threshold());

    let info = ServiceInfo {
        model: analyzer.model(),
        metric: analyzer.metric(),
        threshold: analyzer.threshold(),
        strategy: config.strategy,
    };
    let engine = spawn_engine(analyzer, store.clone(), config.engine_settings())?;
    let app = router(AppState { engine, store, info }, config.max_body_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    tracing::info!(addr = %config.bind, "rollcalld ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("rollcalld shutting down");
        })
        .await?;

    Ok(())
}
