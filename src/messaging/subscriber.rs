use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::{Broker, Message, MessageHandler, OffsetTracker};
use crate::metrics::Metrics;

// ============================================================================
// Consumer Loop
// ============================================================================
//
//   acquire worker slot ──► fetch ──► spawn handler ──► ok ──► commit watermark
//          ▲                  │                      └─► err ──► rewind partition
//          │               fetch error
//          └───── wait retry_interval ◄──┘
//
// At most `max_workers` handlers run at once. Every wait (slot, fetch,
// backoff) ends as soon as `shutdown` fires; the loop then stops fetching,
// waits for the handlers already running and returns.
//
// Offsets are committed under the tracker lock so that commits of one
// partition reach the broker in ascending order. A failed offset rewinds its
// partition under the same lock, so the next fetches deliver it again.
//
// ============================================================================

/// Run the consumer until `shutdown` is cancelled.
pub async fn subscribe<B, H>(
    broker: Arc<B>,
    handler: Arc<H>,
    max_workers: usize,
    retry_interval: Duration,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
) where
    B: Broker,
    H: MessageHandler,
{
    let slots = Arc::new(Semaphore::new(max_workers));
    let tracker = Arc::new(Mutex::new(OffsetTracker::new()));
    let mut workers = JoinSet::new();

    tracing::info!(max_workers = max_workers, "Consumer loop started");

    loop {
        while let Some(joined) = workers.try_join_next() {
            log_worker_exit(joined);
        }

        let permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            permit = slots.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let fetched = tokio::select! {
            _ = shutdown.cancelled() => break,
            fetched = broker.fetch() => fetched,
        };

        let msg = match fetched {
            Ok(msg) => msg,
            Err(e) => {
                metrics.record_fetch_error();
                tracing::warn!(
                    error = %e,
                    retry_in_ms = retry_interval.as_millis() as u64,
                    "Failed to fetch message"
                );
                drop(permit);
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(retry_interval) => continue,
                }
            }
        };

        tracker
            .lock()
            .await
            .dispatched(&msg.topic, msg.partition, msg.offset);

        let broker = broker.clone();
        let handler = handler.clone();
        let tracker = tracker.clone();
        let metrics = metrics.clone();

        workers.spawn(async move {
            process(broker.as_ref(), handler.as_ref(), &tracker, &metrics, msg).await;
            drop(permit);
        });
    }

    tracing::info!(in_flight = workers.len(), "Consumer loop stopping, draining handlers");

    while let Some(joined) = workers.join_next().await {
        log_worker_exit(joined);
    }

    tracing::info!("Consumer loop stopped");
}

async fn process<B, H>(
    broker: &B,
    handler: &H,
    tracker: &Mutex<OffsetTracker>,
    metrics: &Metrics,
    msg: Message,
) where
    B: Broker,
    H: MessageHandler,
{
    if let Err(e) = handler.handle(&msg).await {
        tracing::warn!(
            message_key = %msg.key_str(),
            partition = msg.partition,
            offset = msg.offset,
            error = %e,
            "Message handling failed, offset left uncommitted"
        );

        let mut tracker = tracker.lock().await;
        let Some(target) = tracker.failed(&msg.topic, msg.partition, msg.offset) else {
            return;
        };
        if let Err(e) = broker.rewind(&msg.topic, msg.partition, target).await {
            tracing::error!(
                partition = msg.partition,
                offset = target,
                error = %e,
                "Failed to rewind partition"
            );
        }
        return;
    }

    let mut tracker = tracker.lock().await;
    let Some(watermark) = tracker.completed(&msg.topic, msg.partition, msg.offset) else {
        return;
    };

    if let Err(e) = broker.commit(&msg.topic, msg.partition, watermark).await {
        metrics.record_commit_failure();
        tracing::error!(
            partition = msg.partition,
            offset = watermark,
            error = %e,
            "Failed to commit offset"
        );
    }
}

fn log_worker_exit(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!(error = %e, "Message handler task aborted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::OrderHandler;
    use crate::models::{sample_order, SAMPLE_ORDER};
    use crate::testing::{message, MemoryBroker, MemoryStorage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records concurrency, fails offsets listed in `fail_once` exactly once
    /// and offsets in `fail_always` every time
    struct ScriptedHandler {
        delay: Duration,
        running: AtomicUsize,
        peak: AtomicUsize,
        handled: AtomicUsize,
        fail_once: std::sync::Mutex<Vec<i64>>,
        fail_always: Vec<i64>,
    }

    impl ScriptedHandler {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                handled: AtomicUsize::new(0),
                fail_once: std::sync::Mutex::new(Vec::new()),
                fail_always: Vec::new(),
            }
        }

        fn failing_always(mut self, offsets: &[i64]) -> Self {
            self.fail_always = offsets.to_vec();
            self
        }

        fn failing_once(self, offsets: &[i64]) -> Self {
            *self.fail_once.lock().unwrap() = offsets.to_vec();
            self
        }
    }

    #[async_trait]
    impl MessageHandler for ScriptedHandler {
        async fn handle(&self, msg: &Message) -> anyhow::Result<()> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            if self.fail_always.contains(&msg.offset) {
                anyhow::bail!("permanent failure at offset {}", msg.offset);
            }
            let mut fail_once = self.fail_once.lock().unwrap();
            if let Some(pos) = fail_once.iter().position(|&o| o == msg.offset) {
                fail_once.remove(pos);
                anyhow::bail!("injected failure at offset {}", msg.offset);
            }
            self.handled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn spawn_loop(
        broker: Arc<MemoryBroker>,
        handler: Arc<ScriptedHandler>,
        max_workers: usize,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let metrics = Arc::new(Metrics::new().unwrap());
        tokio::spawn(subscribe(
            broker,
            handler,
            max_workers,
            Duration::from_millis(20),
            metrics,
            shutdown,
        ))
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_max_workers() {
        let broker = Arc::new(MemoryBroker::new((0..20).map(|o| message(o, b"{}")).collect()));
        let handler = Arc::new(ScriptedHandler::new(Duration::from_millis(20)));
        let shutdown = CancellationToken::new();

        let task = spawn_loop(broker.clone(), handler.clone(), 3, shutdown.clone());
        wait_until(|| broker.committed(0) == Some(19)).await;
        shutdown.cancel();
        task.await.unwrap();

        assert!(handler.handled.load(Ordering::SeqCst) >= 20);
        assert!(handler.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_failed_message_is_never_committed() {
        let broker = Arc::new(
            MemoryBroker::new((0..3).map(|o| message(o, b"{}")).collect()).without_redelivery(),
        );
        let handler = Arc::new(ScriptedHandler::new(Duration::from_millis(5)).failing_always(&[1]));
        let shutdown = CancellationToken::new();

        let task = spawn_loop(broker.clone(), handler.clone(), 1, shutdown.clone());
        wait_until(|| broker.rewinds().len() >= 3).await;
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(broker.commits(0), vec![0]);
        assert!(broker.rewinds().iter().all(|&rewind| rewind == (0, 1)));
    }

    #[tokio::test]
    async fn test_failed_message_is_rewound_and_later_offsets_committed() {
        // Like a real consumer group: nothing is delivered twice unless rewound
        let broker = Arc::new(
            MemoryBroker::new((0..5).map(|o| message(o, b"{}")).collect()).without_redelivery(),
        );
        let handler = Arc::new(ScriptedHandler::new(Duration::from_millis(5)).failing_once(&[0]));
        let shutdown = CancellationToken::new();

        let task = spawn_loop(broker.clone(), handler.clone(), 3, shutdown.clone());
        wait_until(|| broker.committed(0) == Some(4)).await;
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(broker.rewinds(), vec![(0, 0)]);
        let commits = broker.commits(0);
        assert!(commits.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_failure_holds_later_commits_until_redelivery() {
        let broker = Arc::new(MemoryBroker::new((0..3).map(|o| message(o, b"{}")).collect()));
        let handler = Arc::new(ScriptedHandler::new(Duration::ZERO).failing_once(&[1]));
        let shutdown = CancellationToken::new();

        let task = spawn_loop(broker.clone(), handler.clone(), 1, shutdown.clone());
        wait_until(|| broker.committed(0) == Some(2)).await;
        shutdown.cancel();
        task.await.unwrap();

        // offset 2 finished before the redelivered 1 but was never committed first
        let commits = broker.commits(0);
        assert_eq!(commits.first(), Some(&0));
        assert_eq!(commits.last(), Some(&2));
        assert!(commits.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_fetch_errors_are_retried() {
        let broker = Arc::new(MemoryBroker::new(vec![message(0, b"{}")]));
        broker.fail_next_fetches(3);
        let handler = Arc::new(ScriptedHandler::new(Duration::ZERO));
        let shutdown = CancellationToken::new();

        let task = spawn_loop(broker.clone(), handler.clone(), 1, shutdown.clone());
        wait_until(|| broker.committed(0) == Some(0)).await;
        shutdown.cancel();
        task.await.unwrap();

        assert!(broker.fetches() >= 4);
    }

    #[tokio::test]
    async fn test_shutdown_drains_in_flight_handlers() {
        let broker = Arc::new(MemoryBroker::new(vec![message(0, b"{}")]));
        let handler = Arc::new(ScriptedHandler::new(Duration::from_millis(200)));
        let shutdown = CancellationToken::new();

        let task = spawn_loop(broker.clone(), handler.clone(), 2, shutdown.clone());
        wait_until(|| handler.running.load(Ordering::SeqCst) == 1).await;
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(handler.handled.load(Ordering::SeqCst), 1);
        assert_eq!(broker.committed(0), Some(0));
    }

    #[tokio::test]
    async fn test_cancel_while_idle_returns() {
        let broker = Arc::new(MemoryBroker::new(Vec::new()));
        let handler = Arc::new(ScriptedHandler::new(Duration::ZERO));
        let shutdown = CancellationToken::new();

        let task = spawn_loop(broker, handler, 1, shutdown.clone());
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("consumer loop did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_transient_storage_failure_is_redelivered() {
        let broker = Arc::new(MemoryBroker::new(vec![message(0, SAMPLE_ORDER.as_bytes())]));
        let storage = Arc::new(MemoryStorage::new());
        storage.fail_next_saves(1);
        let metrics = Arc::new(Metrics::new().unwrap());
        let handler = Arc::new(OrderHandler::new(storage.clone(), metrics.clone()));
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(subscribe(
            broker.clone(),
            handler,
            1,
            Duration::from_millis(20),
            metrics,
            shutdown.clone(),
        ));
        wait_until(|| broker.committed(0) == Some(0)).await;
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(storage.save_calls(), 2);
        assert!(broker.fetches() >= 2);
        assert!(storage.get("b563feb7b2b84b6test").is_some());
    }

    #[tokio::test]
    async fn test_invalid_order_is_committed_without_write() {
        let mut order = sample_order("ord-1");
        order.items[0].sale = 250;
        let payload = serde_json::to_vec(&order).unwrap();

        let broker = Arc::new(MemoryBroker::new(vec![message(0, &payload)]));
        let storage = Arc::new(MemoryStorage::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let handler = Arc::new(OrderHandler::new(storage.clone(), metrics.clone()));
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(subscribe(
            broker.clone(),
            handler,
            1,
            Duration::from_millis(20),
            metrics,
            shutdown.clone(),
        ));
        wait_until(|| broker.committed(0) == Some(0)).await;
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(storage.save_calls(), 0);
        assert_eq!(broker.commits(0), vec![0]);
    }
}
