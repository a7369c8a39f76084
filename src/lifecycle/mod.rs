// ============================================================================
// Lifecycle - backend construction and teardown
// ============================================================================
//
// Startup builds storage, broker and cache concurrently. Either all three
// come up, or every one that did is closed again before the failures are
// reported together.
//
// Shutdown closes all backends concurrently under one deadline. A close
// that fails is logged and does not stop the others.
//
// ============================================================================

mod backend;
pub mod registry;

pub use backend::Backend;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Every backend that failed to start, with its cause
#[derive(Debug)]
pub struct StartupError {
    pub failures: Vec<(&'static str, anyhow::Error)>,
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to start")?;
        for (i, (name, err)) in self.failures.iter().enumerate() {
            let sep = if i == 0 { " " } else { "; " };
            write!(f, "{sep}{name}: {err:#}")?;
        }
        Ok(())
    }
}

impl std::error::Error for StartupError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    Clean,
    TimedOut,
}

/// The three running backends
pub struct Backends<S, B, C> {
    pub storage: Arc<S>,
    pub broker: Arc<B>,
    pub cache: Arc<C>,
}

impl<S: Backend, B: Backend, C: Backend> Backends<S, B, C> {
    /// Type-erased handles, in close order
    pub fn handles(&self) -> Vec<Arc<dyn Backend>> {
        vec![
            self.broker.clone() as Arc<dyn Backend>,
            self.cache.clone() as Arc<dyn Backend>,
            self.storage.clone() as Arc<dyn Backend>,
        ]
    }
}

/// Run the three constructors concurrently.
pub async fn start<S, B, C, FS, FB, FC>(
    storage: FS,
    broker: FB,
    cache: FC,
    shutdown_timeout: Duration,
) -> Result<Backends<S, B, C>, StartupError>
where
    S: Backend,
    B: Backend,
    C: Backend,
    FS: Future<Output = anyhow::Result<S>>,
    FB: Future<Output = anyhow::Result<B>>,
    FC: Future<Output = anyhow::Result<C>>,
{
    let (storage, broker, cache) = tokio::join!(storage, broker, cache);

    match (storage, broker, cache) {
        (Ok(storage), Ok(broker), Ok(cache)) => {
            let backends = Backends {
                storage: Arc::new(storage),
                broker: Arc::new(broker),
                cache: Arc::new(cache),
            };
            tracing::info!("All backends started");
            Ok(backends)
        }
        (storage, broker, cache) => {
            let mut started: Vec<Arc<dyn Backend>> = Vec::new();
            let mut failures = Vec::new();

            collect(storage, "storage", &mut started, &mut failures);
            collect(broker, "broker", &mut started, &mut failures);
            collect(cache, "cache", &mut started, &mut failures);

            for (name, err) in &failures {
                tracing::error!(backend = name, error = %format!("{err:#}"), "Backend failed to start");
            }

            if !started.is_empty() {
                tracing::info!(count = started.len(), "Closing backends that did start");
                shutdown(started, shutdown_timeout).await;
            }

            Err(StartupError { failures })
        }
    }
}

fn collect<T: Backend>(
    result: anyhow::Result<T>,
    role: &'static str,
    started: &mut Vec<Arc<dyn Backend>>,
    failures: &mut Vec<(&'static str, anyhow::Error)>,
) {
    match result {
        Ok(backend) => started.push(Arc::new(backend)),
        Err(err) => failures.push((role, err)),
    }
}

/// Close every backend concurrently, giving up after `timeout`.
pub async fn shutdown(backends: Vec<Arc<dyn Backend>>, timeout: Duration) -> ShutdownOutcome {
    let mut closing = JoinSet::new();
    for backend in backends {
        closing.spawn(async move {
            let name = backend.name();
            match backend.close().await {
                Ok(()) => tracing::info!(backend = name, "Backend closed"),
                Err(e) => tracing::error!(backend = name, error = %e, "Failed to close backend"),
            }
        });
    }

    let all_closed = async {
        while let Some(joined) = closing.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Backend close task aborted");
            }
        }
    };

    match tokio::time::timeout(timeout, all_closed).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ShutdownOutcome::Clean
        }
        Err(_) => {
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Shutdown timed out");
            ShutdownOutcome::TimedOut
        }
    }
}
