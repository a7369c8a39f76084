//! In-memory backends for pipeline tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::lifecycle::Backend;
use crate::messaging::{Broker, BrokerError, Message};
use crate::models::Order;
use crate::storage::{Storage, StorageError};

/// A message on partition 0 of the `orders` topic
pub(crate) fn message(offset: i64, value: &[u8]) -> Message {
    Message {
        topic: "orders".to_string(),
        partition: 0,
        offset,
        key: format!("key-{offset}").into_bytes(),
        value: value.to_vec(),
        timestamp: None,
        headers: HashMap::new(),
    }
}

// ============================================================================
// Memory Broker
// ============================================================================

#[derive(Default)]
struct BrokerState {
    queue: VecDeque<Message>,
    log: Vec<Message>,
    commits: HashMap<i32, Vec<i64>>,
    rewinds: Vec<(i32, i64)>,
    fetch_failures: usize,
}

/// Replays a fixed log. A rewind drops the queued messages of the partition
/// and queues the log again from the rewound offset. Once the queue runs dry,
/// every message above the committed position of its partition is delivered
/// again, the way a consumer group resumes after a rebalance, unless built
/// `without_redelivery`.
pub(crate) struct MemoryBroker {
    state: Mutex<BrokerState>,
    redeliver: bool,
    fetches: AtomicUsize,
}

const REDELIVERY_DELAY: Duration = Duration::from_millis(100);

impl MemoryBroker {
    pub(crate) fn new(log: Vec<Message>) -> Self {
        Self {
            state: Mutex::new(BrokerState {
                queue: log.iter().cloned().collect(),
                log,
                ..Default::default()
            }),
            redeliver: true,
            fetches: AtomicUsize::new(0),
        }
    }

    pub(crate) fn without_redelivery(mut self) -> Self {
        self.redeliver = false;
        self
    }

    pub(crate) fn fail_next_fetches(&self, count: usize) {
        self.state.lock().unwrap().fetch_failures = count;
    }

    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn commits(&self, partition: i32) -> Vec<i64> {
        self.state
            .lock()
            .unwrap()
            .commits
            .get(&partition)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn rewinds(&self) -> Vec<(i32, i64)> {
        self.state.lock().unwrap().rewinds.clone()
    }

    pub(crate) fn committed(&self, partition: i32) -> Option<i64> {
        self.commits(partition).last().copied()
    }

    fn try_pop(&self) -> Option<Result<Message, BrokerError>> {
        let mut state = self.state.lock().unwrap();
        if state.fetch_failures > 0 {
            state.fetch_failures -= 1;
            return Some(Err(BrokerError::Closed));
        }
        state.queue.pop_front().map(Ok)
    }

    fn requeue_uncommitted(&self) {
        let mut state = self.state.lock().unwrap();
        let uncommitted: Vec<Message> = state
            .log
            .iter()
            .filter(|m| {
                let committed = state.commits.get(&m.partition).and_then(|c| c.last());
                committed.map_or(true, |&c| m.offset > c)
            })
            .cloned()
            .collect();
        state.queue.extend(uncommitted);
    }
}

#[async_trait]
impl Backend for MemoryBroker {
    fn name(&self) -> &'static str {
        "memory-broker"
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn fetch(&self) -> Result<Message, BrokerError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        loop {
            if let Some(fetched) = self.try_pop() {
                return fetched;
            }
            tokio::time::sleep(REDELIVERY_DELAY).await;
            if self.redeliver {
                self.requeue_uncommitted();
            }
        }
    }

    async fn commit(&self, _topic: &str, partition: i32, offset: i64) -> Result<(), BrokerError> {
        self.state
            .lock()
            .unwrap()
            .commits
            .entry(partition)
            .or_default()
            .push(offset);
        Ok(())
    }

    async fn rewind(&self, _topic: &str, partition: i32, offset: i64) -> Result<(), BrokerError> {
        let mut state = self.state.lock().unwrap();
        state.rewinds.push((partition, offset));
        state.queue.retain(|m| m.partition != partition);
        let replay: Vec<Message> = state
            .log
            .iter()
            .filter(|m| m.partition == partition && m.offset >= offset)
            .cloned()
            .collect();
        state.queue.extend(replay);
        Ok(())
    }
}

// ============================================================================
// Memory Storage
// ============================================================================

/// Order store with the uniqueness semantics of the relational schema.
#[derive(Default)]
pub(crate) struct MemoryStorage {
    orders: Mutex<HashMap<String, Order>>,
    failing_saves: AtomicUsize,
    failing_gets: AtomicUsize,
    saves: AtomicUsize,
    gets: AtomicUsize,
    closed: AtomicUsize,
}

impl MemoryStorage {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_order(order: Order) -> Self {
        let storage = Self::new();
        storage
            .orders
            .lock()
            .unwrap()
            .insert(order.order_uid.clone(), order);
        storage
    }

    /// The next `count` saves fail with a retry exhaustion
    pub(crate) fn fail_next_saves(&self, count: usize) {
        self.failing_saves.store(count, Ordering::SeqCst);
    }

    pub(crate) fn fail_next_gets(&self, count: usize) {
        self.failing_gets.store(count, Ordering::SeqCst);
    }

    pub(crate) fn get(&self, order_uid: &str) -> Option<Order> {
        self.orders.lock().unwrap().get(order_uid).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.orders.lock().unwrap().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn save_calls(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub(crate) fn get_calls(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn exhausted(operation: &'static str) -> StorageError {
    StorageError::RetriesExhausted {
        operation,
        attempts: 3,
        source: Box::new(StorageError::Timeout(Duration::from_secs(5))),
    }
}

#[async_trait]
impl Backend for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory-storage"
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save_order(&self, order: &Order) -> Result<(), StorageError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.failing_saves) {
            return Err(exhausted("save_order"));
        }

        let mut orders = self.orders.lock().unwrap();
        if orders.contains_key(&order.order_uid) {
            return Err(StorageError::AlreadyExists);
        }
        orders.insert(order.order_uid.clone(), order.clone());
        Ok(())
    }

    async fn get_order(&self, order_uid: &str) -> Result<Order, StorageError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.failing_gets) {
            return Err(exhausted("get_order"));
        }

        self.get(order_uid).ok_or(StorageError::NotFound)
    }
}
