use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use sqlx::{FromRow, Postgres, Transaction};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{Storage, StorageError};
use crate::config::PostgresConfig;
use crate::lifecycle::Backend;
use crate::models::{Delivery, Item, Order, Payment};
use crate::utils::{retry_on_transient, RetryConfig, RetryResult};

// ============================================================================
// PostgreSQL Order Store
// ============================================================================
//
// Writes go through one transaction per attempt:
//
//   BEGIN → orders → delivery → payment → items[] → COMMIT
//
// Every database call of an attempt shares one deadline
// (POSTGRES_REQUEST_TIMEOUT_MS). A failed attempt is rolled back without a
// deadline so an expired request budget never leaves a transaction open.
//
// Retry backoff waits on the store's own shutdown token; reads are also
// abandoned when the caller drops the request future.
//
// ============================================================================

pub struct PgStorage {
    pool: PgPool,
    request_timeout: Duration,
    retry: RetryConfig,
    shutdown: CancellationToken,
}

impl PgStorage {
    /// Build the connection pool and verify that the database is reachable
    pub async fn connect(
        config: &PostgresConfig,
        shutdown: CancellationToken,
    ) -> Result<Self, StorageError> {
        tracing::debug!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            "Creating storage connection pool"
        );

        let ssl_mode: PgSslMode = config.sslmode.parse()?;
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database)
            .ssl_mode(ssl_mode);

        let connect = PgPoolOptions::new()
            .max_connections(config.pool_max_conns)
            .min_connections(config.pool_min_conns)
            .acquire_timeout(config.connect_timeout())
            .max_lifetime(config.max_conn_lifetime())
            .idle_timeout(config.max_conn_idle_time())
            .connect_with(options);

        let pool = tokio::time::timeout(config.connect_timeout(), connect)
            .await
            .map_err(|_| StorageError::Timeout(config.connect_timeout()))??;

        let retry = RetryConfig {
            max_attempts: config.max_retries,
            interval: config.retry_timeout(),
        };

        Ok(Self::from_pool(pool, config.request_timeout(), retry, shutdown))
    }

    pub fn from_pool(
        pool: PgPool,
        request_timeout: Duration,
        retry: RetryConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            pool,
            request_timeout,
            retry,
            shutdown,
        }
    }

    async fn save_attempt(&self, order: &Order) -> Result<(), StorageError> {
        let deadline = Instant::now() + self.request_timeout;

        let mut tx = within(deadline, self.request_timeout, self.pool.begin()).await?;

        let inserted = within(deadline, self.request_timeout, insert_order_tx(&mut tx, order)).await;
        if let Err(err) = inserted {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(
                    order_uid = %order.order_uid,
                    error = %rollback_err,
                    "Failed to rollback transaction"
                );
            }
            return Err(err);
        }

        // A commit cut off by the deadline drops the transaction, which
        // rolls it back when the connection returns to the pool.
        within(deadline, self.request_timeout, tx.commit()).await
    }

    async fn get_attempt(&self, order_uid: &str) -> Result<Order, StorageError> {
        let deadline = Instant::now() + self.request_timeout;

        let row = within(
            deadline,
            self.request_timeout,
            sqlx::query_as::<_, OrderRow>(SELECT_ORDER)
                .bind(order_uid)
                .fetch_one(&self.pool),
        )
        .await?;

        let items = within(
            deadline,
            self.request_timeout,
            sqlx::query_as::<_, ItemRow>(SELECT_ITEMS)
                .bind(order_uid)
                .fetch_all(&self.pool),
        )
        .await?;

        Ok(row.into_order(items.into_iter().map(Item::from).collect()))
    }
}

/// Run a database call against the attempt deadline
async fn within<T, F>(deadline: Instant, budget: Duration, call: F) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout_at(deadline, call).await {
        Ok(result) => result.map_err(StorageError::from),
        Err(_) => Err(StorageError::Timeout(budget)),
    }
}

async fn insert_order_tx(
    tx: &mut Transaction<'static, Postgres>,
    o: &Order,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO orders (
            order_uid, track_number, entry, locale, internal_signature,
            customer_id, delivery_service, shardkey, sm_id, date_created, oof_shard
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(&o.order_uid)
    .bind(&o.track_number)
    .bind(&o.entry)
    .bind(&o.locale)
    .bind(&o.internal_signature)
    .bind(&o.customer_id)
    .bind(&o.delivery_service)
    .bind(&o.shardkey)
    .bind(o.sm_id)
    .bind(o.date_created)
    .bind(&o.oof_shard)
    .execute(&mut **tx)
    .await?;

    let d = &o.delivery;
    sqlx::query(
        r#"
        INSERT INTO delivery (
            order_uid, name, phone, zip, city, address, region, email
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(&o.order_uid)
    .bind(&d.name)
    .bind(&d.phone)
    .bind(&d.zip)
    .bind(&d.city)
    .bind(&d.address)
    .bind(&d.region)
    .bind(&d.email)
    .execute(&mut **tx)
    .await?;

    let p = &o.payment;
    sqlx::query(
        r#"
        INSERT INTO payment (
            transaction, order_uid, request_id, currency, provider,
            amount, payment_dt, bank, delivery_cost, goods_total, custom_fee
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(&p.transaction)
    .bind(&o.order_uid)
    .bind(&p.request_id)
    .bind(&p.currency)
    .bind(&p.provider)
    .bind(p.amount)
    .bind(p.payment_dt)
    .bind(&p.bank)
    .bind(p.delivery_cost)
    .bind(p.goods_total)
    .bind(p.custom_fee)
    .execute(&mut **tx)
    .await?;

    for item in &o.items {
        sqlx::query(
            r#"
            INSERT INTO items (
                order_uid, chrt_id, track_number, price, rid,
                name, sale, size, total_price, nm_id, brand, status
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&o.order_uid)
        .bind(item.chrt_id)
        .bind(&item.track_number)
        .bind(item.price)
        .bind(&item.rid)
        .bind(&item.name)
        .bind(item.sale)
        .bind(&item.size)
        .bind(item.total_price)
        .bind(item.nm_id)
        .bind(&item.brand)
        .bind(item.status)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

// ============================================================================
// Read Queries
// ============================================================================

const SELECT_ORDER: &str = r#"
    SELECT
        o.order_uid, o.track_number, o.entry, o.locale, o.internal_signature,
        o.customer_id, o.delivery_service, o.shardkey, o.sm_id, o.date_created, o.oof_shard,

        d.name AS delivery_name, d.phone AS delivery_phone, d.zip AS delivery_zip,
        d.city AS delivery_city, d.address AS delivery_address,
        d.region AS delivery_region, d.email AS delivery_email,

        p.transaction AS payment_transaction, p.request_id AS payment_request_id,
        p.currency AS payment_currency, p.provider AS payment_provider,
        p.amount AS payment_amount, p.payment_dt AS payment_dt, p.bank AS payment_bank,
        p.delivery_cost AS payment_delivery_cost, p.goods_total AS payment_goods_total,
        p.custom_fee AS payment_custom_fee
    FROM orders o
    JOIN delivery d ON o.order_uid = d.order_uid
    JOIN payment p ON o.order_uid = p.order_uid
    WHERE o.order_uid = $1
"#;

const SELECT_ITEMS: &str = r#"
    SELECT
        chrt_id, track_number, price, rid, name,
        sale, size, total_price, nm_id, brand, status
    FROM items
    WHERE order_uid = $1
    ORDER BY id
"#;

#[derive(FromRow)]
struct OrderRow {
    order_uid: String,
    track_number: String,
    entry: String,
    locale: String,
    internal_signature: String,
    customer_id: String,
    delivery_service: String,
    shardkey: String,
    sm_id: i32,
    date_created: DateTime<Utc>,
    oof_shard: String,

    delivery_name: String,
    delivery_phone: String,
    delivery_zip: String,
    delivery_city: String,
    delivery_address: String,
    delivery_region: String,
    delivery_email: String,

    payment_transaction: String,
    payment_request_id: String,
    payment_currency: String,
    payment_provider: String,
    payment_amount: i32,
    payment_dt: i64,
    payment_bank: String,
    payment_delivery_cost: i32,
    payment_goods_total: i32,
    payment_custom_fee: i32,
}

impl OrderRow {
    fn into_order(self, items: Vec<Item>) -> Order {
        Order {
            order_uid: self.order_uid,
            track_number: self.track_number,
            entry: self.entry,
            delivery: Delivery {
                name: self.delivery_name,
                phone: self.delivery_phone,
                zip: self.delivery_zip,
                city: self.delivery_city,
                address: self.delivery_address,
                region: self.delivery_region,
                email: self.delivery_email,
            },
            payment: Payment {
                transaction: self.payment_transaction,
                request_id: self.payment_request_id,
                currency: self.payment_currency,
                provider: self.payment_provider,
                amount: self.payment_amount,
                payment_dt: self.payment_dt,
                bank: self.payment_bank,
                delivery_cost: self.payment_delivery_cost,
                goods_total: self.payment_goods_total,
                custom_fee: self.payment_custom_fee,
            },
            items,
            locale: self.locale,
            internal_signature: self.internal_signature,
            customer_id: self.customer_id,
            delivery_service: self.delivery_service,
            shardkey: self.shardkey,
            sm_id: self.sm_id,
            date_created: self.date_created,
            oof_shard: self.oof_shard,
        }
    }
}

#[derive(FromRow)]
struct ItemRow {
    chrt_id: i64,
    track_number: String,
    price: i32,
    rid: String,
    name: String,
    sale: i32,
    size: String,
    total_price: i32,
    nm_id: i64,
    brand: String,
    status: i32,
}

impl From<ItemRow> for Item {
    fn from(row: ItemRow) -> Self {
        Item {
            chrt_id: row.chrt_id,
            track_number: row.track_number,
            price: row.price,
            rid: row.rid,
            name: row.name,
            sale: row.sale,
            size: row.size,
            total_price: row.total_price,
            nm_id: row.nm_id,
            brand: row.brand,
            status: row.status,
        }
    }
}

// ============================================================================
// Trait Implementations
// ============================================================================

#[async_trait]
impl Backend for PgStorage {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

#[async_trait]
impl Storage for PgStorage {
    async fn save_order(&self, order: &Order) -> Result<(), StorageError> {
        let result = retry_on_transient("save_order", &self.retry, &self.shutdown, |attempt| {
            tracing::debug!(
                order_uid = %order.order_uid,
                attempt = attempt,
                max_attempts = self.retry.max_attempts,
                "Attempting to save order"
            );
            self.save_attempt(order)
        })
        .await;

        match result {
            RetryResult::Success(()) => {
                tracing::debug!(order_uid = %order.order_uid, "Order saved successfully");
                Ok(())
            }
            RetryResult::PermanentFailure(err) => Err(err),
            RetryResult::Failed { attempts, error } => Err(StorageError::RetriesExhausted {
                operation: "save_order",
                attempts,
                source: Box::new(error),
            }),
            RetryResult::Cancelled => Err(StorageError::Cancelled),
        }
    }

    async fn get_order(&self, order_uid: &str) -> Result<Order, StorageError> {
        let result = retry_on_transient("get_order", &self.retry, &self.shutdown, |attempt| {
            tracing::debug!(
                order_uid = %order_uid,
                attempt = attempt,
                "Attempting to get order"
            );
            self.get_attempt(order_uid)
        })
        .await;

        match result {
            RetryResult::Success(order) => Ok(order),
            RetryResult::PermanentFailure(err) => {
                if matches!(err, StorageError::NotFound) {
                    tracing::debug!(order_uid = %order_uid, "No such order");
                }
                Err(err)
            }
            RetryResult::Failed { attempts, error } => Err(StorageError::RetriesExhausted {
                operation: "get_order",
                attempts,
                source: Box::new(error),
            }),
            RetryResult::Cancelled => Err(StorageError::Cancelled),
        }
    }
}
