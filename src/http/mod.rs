mod middleware;

pub use middleware::{request_id, RequestId, RequestTracing};

use actix_web::{dev::Server, web, App, HttpRequest, HttpResponse, HttpServer};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::Cache;
use crate::config::HttpConfig;
use crate::metrics::Metrics;
use crate::storage::{Storage, StorageError};

// ============================================================================
// Read API
// ============================================================================
//
// GET /api/order/{order_uid}   cache → storage → fill cache
// GET /health                  liveness
// GET /metrics                 Prometheus exposition
//
// The server does not install signal handlers; the caller stops it through
// the returned handle. A request future dropped by the server (client gone,
// shutdown) abandons its storage lookup and pending retries with it.
//
// ============================================================================

pub struct ApiState<S, C> {
    pub storage: Arc<S>,
    pub cache: Arc<C>,
}

/// Register routes. Expects `web::Data<ApiState<S, C>>` and
/// `web::Data<Metrics>` in app data.
pub fn routes<S: Storage, C: Cache>(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/api/order/{order_uid}")
            .route(web::get().to(get_order::<S, C>))
            .default_service(web::to(method_not_allowed)),
    )
    .service(
        web::resource(vec!["/api/order", "/api/order/"])
            .route(web::get().to(missing_order_uid))
            .default_service(web::to(method_not_allowed)),
    )
    .route("/health", web::get().to(health))
    .route("/metrics", web::get().to(metrics_handler));
}

/// Bind the API server. The returned server must be awaited to run.
pub fn serve<S: Storage, C: Cache>(
    config: &HttpConfig,
    storage: Arc<S>,
    cache: Arc<C>,
    metrics: Arc<Metrics>,
    shutdown_timeout: Duration,
) -> std::io::Result<Server> {
    let state = web::Data::new(ApiState { storage, cache });
    let metrics = web::Data::from(metrics);

    tracing::info!(
        address = %config.address,
        workers = config.workers,
        "Starting HTTP server"
    );

    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(metrics.clone())
            .wrap(RequestTracing)
            .configure(routes::<S, C>)
    })
    .workers(config.workers)
    .disable_signals()
    .shutdown_timeout(shutdown_timeout.as_secs().max(1))
    .bind(config.address.as_str())?
    .run();

    Ok(server)
}

async fn get_order<S: Storage, C: Cache>(
    req: HttpRequest,
    path: web::Path<String>,
    state: web::Data<ApiState<S, C>>,
    metrics: web::Data<Metrics>,
) -> HttpResponse {
    let request_id = request_id(&req);
    let order_uid = path.into_inner();

    if order_uid.trim().is_empty() {
        tracing::debug!(request_id = %request_id, "Request order_uid is empty");
        return HttpResponse::BadRequest().body("missing order uid");
    }

    if let Some(order) = state.cache.get(&order_uid).await {
        metrics.record_cache_lookup(true);
        tracing::debug!(
            request_id = %request_id,
            order_uid = %order_uid,
            "Order served from cache"
        );
        return HttpResponse::Ok().json(order);
    }
    metrics.record_cache_lookup(false);

    match state.storage.get_order(&order_uid).await {
        Ok(order) => {
            state.cache.put(&order_uid, order.clone()).await;
            tracing::debug!(
                request_id = %request_id,
                order_uid = %order_uid,
                "Order served from storage"
            );
            HttpResponse::Ok().json(order)
        }
        Err(StorageError::NotFound) => {
            tracing::debug!(request_id = %request_id, order_uid = %order_uid, "Order not found");
            HttpResponse::NotFound().body("order not found")
        }
        Err(e) => {
            tracing::warn!(
                request_id = %request_id,
                order_uid = %order_uid,
                error = %e,
                "Failed to get order"
            );
            HttpResponse::InternalServerError().body("internal server error")
        }
    }
}

async fn missing_order_uid() -> HttpResponse {
    HttpResponse::BadRequest().body("missing order uid")
}

async fn method_not_allowed() -> HttpResponse {
    HttpResponse::MethodNotAllowed().body("method not allowed")
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "order-ingest"
    }))
}

async fn metrics_handler(metrics: web::Data<Metrics>) -> HttpResponse {
    match metrics.encode() {
        Ok(buffer) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(buffer),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            HttpResponse::InternalServerError().finish()
        }
    }
}
