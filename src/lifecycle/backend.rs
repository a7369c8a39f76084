use async_trait::async_trait;

/// Anything the lifecycle manager constructs at startup and closes at exit.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Short name used in logs ("postgres", "kafka", ...)
    fn name(&self) -> &'static str;

    /// Release connections. Called exactly once, during shutdown.
    async fn close(&self) -> anyhow::Result<()>;
}
