use order_ingest::{app, config::AppConfig, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides LOG_LEVEL, e.g. RUST_LOG=info,order_ingest=debug
    let config = AppConfig::from_env()?;
    telemetry::init(&config.log_level, config.log_format);

    tracing::info!(
        storage = ?config.storage_type,
        broker = ?config.broker_type,
        cache = ?config.cache_type,
        "🚀 Starting order ingestion service"
    );

    if let Err(e) = app::run(config).await {
        tracing::error!(error = %format!("{e:#}"), "Service terminated with error");
        return Err(e);
    }

    Ok(())
}
