//! Prometheus metrics for the upload engine.
//!
//! Everything registers into [`REGISTRY`], which the server exposes at `/metrics`.

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Session metrics
pub static UPLOAD_SESSIONS_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stitch_upload_sessions_created_total",
        "Total number of upload sessions created",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_SESSIONS_DELETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stitch_upload_sessions_deleted_total",
        "Total number of upload sessions deleted",
    )
    .expect("metric creation failed")
});

// Chunk metrics
pub static CHUNKS_UPLOADED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stitch_chunks_uploaded_total",
        "Total number of chunks accepted",
    )
    .expect("metric creation failed")
});

pub static BYTES_UPLOADED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stitch_bytes_uploaded_total",
        "Total chunk bytes accepted",
    )
    .expect("metric creation failed")
});

pub static CHUNK_UPLOAD_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "stitch_chunk_upload_duration_seconds",
            "Time to store and record one chunk",
        )
        .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
    )
    .expect("metric creation failed")
});

// Merge metrics
pub static MERGES_STARTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("stitch_merges_started_total", "Total merges started")
        .expect("metric creation failed")
});

pub static MERGES_SUCCEEDED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stitch_merges_succeeded_total",
        "Total merges that produced an artifact",
    )
    .expect("metric creation failed")
});

pub static MERGES_FAILED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("stitch_merges_failed_total", "Total merges that failed")
        .expect("metric creation failed")
});

pub static MERGE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "stitch_merge_duration_seconds",
            "Time to merge all chunks of a session into its artifact",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]),
    )
    .expect("metric creation failed")
});

pub static MERGED_BYTES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("stitch_merged_bytes_total", "Total artifact bytes written")
        .expect("metric creation failed")
});

// Cleanup metrics
pub static CLEANUP_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "stitch_cleanup_failures_total",
            "Objects that could not be removed while deleting a session",
        ),
        &["kind"],
    )
    .expect("metric creation failed")
});

// Errors by type, recorded at the HTTP boundary
pub static UPLOAD_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("stitch_upload_errors_total", "Upload API errors by type"),
        &["error_type"],
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry. Safe to call repeatedly.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(UPLOAD_SESSIONS_CREATED.clone()),
            Box::new(UPLOAD_SESSIONS_DELETED.clone()),
            Box::new(CHUNKS_UPLOADED.clone()),
            Box::new(BYTES_UPLOADED.clone()),
            Box::new(CHUNK_UPLOAD_DURATION.clone()),
            Box::new(MERGES_STARTED.clone()),
            Box::new(MERGES_SUCCEEDED.clone()),
            Box::new(MERGES_FAILED.clone()),
            Box::new(MERGE_DURATION.clone()),
            Box::new(MERGED_BYTES.clone()),
            Box::new(CLEANUP_FAILURES.clone()),
            Box::new(UPLOAD_ERRORS.clone()),
        ];
        for collector in collectors {
            REGISTRY
                .register(collector)
                .expect("metric registration failed");
        }
    });
}

/// Record an API error by type.
pub fn record_upload_error(error_type: &str) {
    UPLOAD_ERRORS.with_label_values(&[error_type]).inc();
}
