//! Prometheus metrics for the AppDistrib server.
//!
//! Exposes ingestion, deduplication, retention and garbage collection
//! counters.
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! Metrics carry no organization, project or asset identifiers, but they do
//! expose aggregate usage. Restrict the endpoint to scraper IPs at the
//! infrastructure level, or disable it with `server.metrics_enabled = false`.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Ingestion
pub static BUILDS_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "appdistrib_builds_created_total",
        "Total number of builds registered",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "appdistrib_upload_failures_total",
            "Total number of failed upload streams by error code",
        ),
        &["code"],
    )
    .expect("metric creation failed")
});

pub static BYTES_INGESTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "appdistrib_bytes_ingested_total",
        "Total artifact bytes received in upload chunks",
    )
    .expect("metric creation failed")
});

pub static ASSETS_DEDUPLICATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "appdistrib_assets_deduplicated_total",
        "Total number of uploads whose content was already stored",
    )
    .expect("metric creation failed")
});

pub static ACTIVE_INGEST_STREAMS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "appdistrib_active_ingest_streams",
        "Number of upload streams currently open",
    )
    .expect("metric creation failed")
});

pub static INGEST_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "appdistrib_ingest_duration_seconds",
            "Duration of successful upload streams, header to storage key",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0]),
    )
    .expect("metric creation failed")
});

// Retention and GC
pub static BUILDS_PRUNED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "appdistrib_builds_pruned_total",
        "Total number of ephemeral builds removed by retention",
    )
    .expect("metric creation failed")
});

pub static ORPHAN_ASSETS_RECLAIMED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "appdistrib_orphan_assets_reclaimed_total",
        "Total number of unreferenced assets deleted by the orphan sweep",
    )
    .expect("metric creation failed")
});

pub static EMPTY_DIRS_REMOVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "appdistrib_empty_dirs_removed_total",
        "Total number of empty storage directories removed",
    )
    .expect("metric creation failed")
});

pub static MANIFESTS_REGENERATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "appdistrib_manifests_regenerated_total",
        "Total number of project manifest regenerations",
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry. Safe to call repeatedly.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(BUILDS_CREATED.clone()),
            Box::new(UPLOAD_FAILURES.clone()),
            Box::new(BYTES_INGESTED.clone()),
            Box::new(ASSETS_DEDUPLICATED.clone()),
            Box::new(ACTIVE_INGEST_STREAMS.clone()),
            Box::new(INGEST_DURATION.clone()),
            Box::new(BUILDS_PRUNED.clone()),
            Box::new(ORPHAN_ASSETS_RECLAIMED.clone()),
            Box::new(EMPTY_DIRS_REMOVED.clone()),
            Box::new(MANIFESTS_REGENERATED.clone()),
        ];
        for collector in collectors {
            REGISTRY
                .register(collector)
                .expect("metric registration failed");
        }
    });
}

/// Handler for GET /metrics
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Record a failed upload stream.
pub fn record_upload_failure(code: &str) {
    UPLOAD_FAILURES.with_label_values(&[code]).inc();
}
