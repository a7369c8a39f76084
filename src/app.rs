use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, HttpConfig};
use crate::lifecycle::{self, registry, ShutdownOutcome};
use crate::messaging::{self, OrderHandler};
use crate::metrics::Metrics;

// ============================================================================
// Application Wiring
// ============================================================================
//
//   signals ──► shutdown token
//                   │
//   start backends ─┼─► consumer loop ──┐
//                   └─► HTTP server ────┤
//                                       ▼
//            drain consumer → stop HTTP → close backends
//
// ============================================================================

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let timeout = config.shutdown_timeout();
    let http_config = HttpConfig::from_env()?;

    let metrics = Arc::new(Metrics::new()?);
    tracing::info!(
        "📊 Metrics registry created with {} metrics",
        metrics.registry().gather().len()
    );

    let backends = lifecycle::start(
        registry::build_storage(config.storage_type, shutdown.clone()),
        registry::build_broker(config.broker_type, metrics.clone()),
        registry::build_cache(config.cache_type),
        timeout,
    )
    .await?;

    let handler = Arc::new(OrderHandler::new(backends.storage.clone(), metrics.clone()));
    let consumer = tokio::spawn(messaging::subscribe(
        backends.broker.clone(),
        handler,
        backends.broker.max_workers(),
        backends.broker.retry_interval(),
        metrics.clone(),
        shutdown.clone(),
    ));

    let server = match crate::http::serve(
        &http_config,
        backends.storage.clone(),
        backends.cache.clone(),
        metrics.clone(),
        timeout,
    ) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(address = %http_config.address, error = %e, "Failed to bind HTTP server");
            shutdown.cancel();
            if let Err(join_err) = consumer.await {
                tracing::error!(error = %join_err, "Consumer task aborted");
            }
            lifecycle::shutdown(backends.handles(), timeout).await;
            return Err(e.into());
        }
    };
    let server_handle = server.handle();
    let mut server_task = tokio::spawn(server);

    tracing::info!("✅ Order ingestion service running");

    let mut server_exited = false;
    tokio::select! {
        _ = shutdown.cancelled() => {
            tracing::info!("Shutdown signal received");
        }
        result = &mut server_task => {
            server_exited = true;
            match result {
                Ok(Ok(())) => tracing::warn!("HTTP server stopped unexpectedly"),
                Ok(Err(e)) => tracing::error!(error = %e, "HTTP server failed"),
                Err(e) => tracing::error!(error = %e, "HTTP server task aborted"),
            }
            shutdown.cancel();
        }
    }

    if let Err(e) = consumer.await {
        tracing::error!(error = %e, "Consumer task aborted");
    }

    if !server_exited {
        server_handle.stop(true).await;
        match server_task.await {
            Ok(Ok(())) => tracing::info!("HTTP server stopped"),
            Ok(Err(e)) => tracing::error!(error = %e, "HTTP server stopped with error"),
            Err(e) => tracing::error!(error = %e, "HTTP server task aborted"),
        }
    }

    match lifecycle::shutdown(backends.handles(), timeout).await {
        ShutdownOutcome::Clean => tracing::info!("🎉 Graceful shutdown complete"),
        ShutdownOutcome::TimedOut => {
            tracing::warn!("Backends did not close within the shutdown timeout")
        }
    }

    Ok(())
}

/// Cancel `token` on SIGINT or SIGTERM.
async fn cancel_on_signal(token: CancellationToken) {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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
        _ = interrupt => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
        _ = token.cancelled() => return,
    }

    token.cancel();
}
