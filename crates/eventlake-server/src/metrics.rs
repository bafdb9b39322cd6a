use lazy_static::lazy_static;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Once;

static REGISTER: Once = Once::new();

lazy_static! {
    /// Global Prometheus metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Ingestion
    // ============================================================================

    pub static ref INGESTED_BLOCKS_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("eventlake_ingested_blocks_total", "Blocks appended from the queue")
    ).expect("metric can be created");

    pub static ref INGESTED_ROWS_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("eventlake_ingested_rows_total", "Rows appended from the queue")
    ).expect("metric can be created");

    pub static ref DROPPED_ROWS_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("eventlake_dropped_rows_total", "Rows dropped for unusable partition cells")
    ).expect("metric can be created");

    pub static ref APPEND_LATENCY: Histogram = Histogram::with_opts(
        HistogramOpts::new("eventlake_append_latency_seconds", "Append latency per payload")
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0])
    ).expect("metric can be created");

    // ============================================================================
    // Query surface
    // ============================================================================

    pub static ref SPLITS_SERVED_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("eventlake_splits_served_total", "Split tokens issued")
    ).expect("metric can be created");

    pub static ref PAGES_SERVED_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("eventlake_pages_served_total", "Columnar pages streamed")
    ).expect("metric can be created");

    // ============================================================================
    // Storage
    // ============================================================================

    pub static ref STORE_SIZE_BYTES: IntGauge = IntGauge::with_opts(
        Opts::new("eventlake_store_size_bytes", "Best-effort local store size")
    ).expect("metric can be created");
}

/// Register every metric exactly once.
pub fn register() {
    REGISTER.call_once(|| {
        REGISTRY
            .register(Box::new(INGESTED_BLOCKS_TOTAL.clone()))
            .expect("collector registers");
        REGISTRY
            .register(Box::new(INGESTED_ROWS_TOTAL.clone()))
            .expect("collector registers");
        REGISTRY
            .register(Box::new(DROPPED_ROWS_TOTAL.clone()))
            .expect("collector registers");
        REGISTRY
            .register(Box::new(APPEND_LATENCY.clone()))
            .expect("collector registers");
        REGISTRY
            .register(Box::new(SPLITS_SERVED_TOTAL.clone()))
            .expect("collector registers");
        REGISTRY
            .register(Box::new(PAGES_SERVED_TOTAL.clone()))
            .expect("collector registers");
        REGISTRY
            .register(Box::new(STORE_SIZE_BYTES.clone()))
            .expect("collector registers");
    });
}

/// Render the registry in Prometheus exposition format.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    encoder
        .encode_to_string(&REGISTRY.gather())
        .unwrap_or_default()
}

/// Serve `/metrics` until shutdown. Bound to the configured metrics
/// sink address.
pub async fn serve(
    host: String,
    port: u16,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> std::io::Result<()> {
    use axum::{routing::get, Router};

    register();
    let app = Router::new().route("/metrics", get(|| async { render() }));
    let listener = tokio::net::TcpListener::bind((host.as_str(), port)).await?;
    tracing::info!(%host, port, "metrics endpoint listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
}
