use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use validator::Validate;

use super::Message;
use crate::metrics::{MessageOutcome, Metrics};
use crate::models::Order;
use crate::storage::{Storage, StorageError};

/// Processes one consumed message.
///
/// `Ok` means the message is done with and its offset may be committed,
/// `Err` means it must be seen again.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, msg: &Message) -> anyhow::Result<()>;
}

// ============================================================================
// Order Handler
// ============================================================================
//
// decode ──✗──► poison, drop (commit)
//   │
// validate ──✗──► poison, drop (commit)
//   │
// save_order ──AlreadyExists──► duplicate delivery (commit)
//   │        └──other error──► failure (no commit, redelivered)
//   ▼
// stored (commit)
//
// ============================================================================

pub struct OrderHandler<S: Storage> {
    storage: Arc<S>,
    metrics: Arc<Metrics>,
}

impl<S: Storage> OrderHandler<S> {
    pub fn new(storage: Arc<S>, metrics: Arc<Metrics>) -> Self {
        Self { storage, metrics }
    }

    async fn process(&self, msg: &Message) -> (MessageOutcome, anyhow::Result<()>) {
        let message_key = msg.key_str();

        let order: Order = match serde_json::from_slice(&msg.value) {
            Ok(order) => order,
            Err(e) => {
                tracing::debug!(
                    message_key = %message_key,
                    offset = msg.offset,
                    error = %e,
                    "Dropping message that is not a valid order document"
                );
                return (MessageOutcome::Rejected, Ok(()));
            }
        };

        if let Err(e) = order.validate() {
            tracing::debug!(
                message_key = %message_key,
                order_uid = %order.order_uid,
                error = %e,
                "Dropping order that failed validation"
            );
            return (MessageOutcome::Rejected, Ok(()));
        }

        match self.storage.save_order(&order).await {
            Ok(()) => {
                tracing::info!(
                    message_key = %message_key,
                    order_uid = %order.order_uid,
                    "Order stored"
                );
                (MessageOutcome::Stored, Ok(()))
            }
            Err(StorageError::AlreadyExists) => {
                tracing::debug!(
                    message_key = %message_key,
                    order_uid = %order.order_uid,
                    "Order already stored, skipping duplicate delivery"
                );
                (MessageOutcome::Duplicate, Ok(()))
            }
            Err(e) => {
                tracing::error!(
                    message_key = %message_key,
                    order_uid = %order.order_uid,
                    error = %e,
                    "Failed to store order"
                );
                let err = anyhow::Error::new(e)
                    .context(format!("failed to store order {}", order.order_uid));
                (MessageOutcome::Failed, Err(err))
            }
        }
    }
}

#[async_trait]
impl<S: Storage> MessageHandler for OrderHandler<S> {
    async fn handle(&self, msg: &Message) -> anyhow::Result<()> {
        let start = Instant::now();
        let (outcome, result) = self.process(msg).await;
        self.metrics
            .record_message(outcome, start.elapsed().as_secs_f64());
        result
    }
}
