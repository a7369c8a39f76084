use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Covers the ingestion consumer (message outcomes, fetch and commit
// failures, handling latency) and the read API (cache hit ratio, response
// statuses). Everything is registered on one private registry which the
// HTTP layer renders at /metrics.
//
// ============================================================================

/// How a consumed message left the handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Stored,
    Duplicate,
    Rejected,
    Failed,
}

impl MessageOutcome {
    fn as_label(&self) -> &'static str {
        match self {
            MessageOutcome::Stored => "stored",
            MessageOutcome::Duplicate => "duplicate",
            MessageOutcome::Rejected => "rejected",
            MessageOutcome::Failed => "failed",
        }
    }
}

/// Central metrics registry for the entire application
pub struct Metrics {
    registry: Registry,

    // Consumer Metrics
    pub messages_total: IntCounterVec,
    pub fetch_errors_total: IntCounter,
    pub commit_failures_total: IntCounter,
    pub handle_duration: Histogram,

    // Read API Metrics
    pub cache_requests_total: IntCounterVec,
    pub http_requests_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        // Consumer Metrics
        let messages_total = IntCounterVec::new(
            Opts::new("orders_messages_total", "Consumed order messages by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(messages_total.clone()))?;

        let fetch_errors_total = IntCounter::new(
            "orders_fetch_errors_total",
            "Failed fetches from the broker",
        )?;
        registry.register(Box::new(fetch_errors_total.clone()))?;

        let commit_failures_total = IntCounter::new(
            "orders_commit_failures_total",
            "Offset commits rejected by the broker",
        )?;
        registry.register(Box::new(commit_failures_total.clone()))?;

        let handle_duration = Histogram::with_opts(
            HistogramOpts::new("orders_handle_duration_seconds", "Order message handling duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
        )?;
        registry.register(Box::new(handle_duration.clone()))?;

        // Read API Metrics
        let cache_requests_total = IntCounterVec::new(
            Opts::new("orders_cache_requests_total", "Order cache lookups by result"),
            &["result"],
        )?;
        registry.register(Box::new(cache_requests_total.clone()))?;

        let http_requests_total = IntCounterVec::new(
            Opts::new("orders_http_requests_total", "Order API responses by status code"),
            &["status"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        Ok(Self {
            registry,
            messages_total,
            fetch_errors_total,
            commit_failures_total,
            handle_duration,
            cache_requests_total,
            http_requests_total,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_message(&self, outcome: MessageOutcome, duration_secs: f64) {
        self.messages_total.with_label_values(&[outcome.as_label()]).inc();
        self.handle_duration.observe(duration_secs);
    }

    pub fn record_fetch_error(&self) {
        self.fetch_errors_total.inc();
    }

    pub fn record_commit_failure(&self) {
        self.commit_failures_total.inc();
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.cache_requests_total.with_label_values(&[result]).inc();
    }

    pub fn record_http_status(&self, status: u16) {
        let status = status.to_string();
        self.http_requests_total.with_label_values(&[status.as_str()]).inc();
    }

    /// Render every registered metric in the Prometheus text format
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}
