use axum::{response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, Histogram, IntCounter, IntCounterVec, Registry, TextEncoder};

/// A container for all Prometheus metric collectors for the gateway.
///
/// Wrapped in an `Arc` and shared across all request handlers.
pub struct Metrics {
    pub registry: Registry,
    /// Total extraction requests, labeled by artifact family.
    pub extraction_requests_total: IntCounterVec,
    /// Requests served straight from the disk cache, by artifact family.
    pub cache_hits_total: IntCounterVec,
    /// Requests that had to fetch and decode, by artifact family.
    pub cache_misses_total: IntCounterVec,
    /// Total result archives downloaded from the remote server.
    pub archive_downloads_total: IntCounter,
    /// Archive downloads that failed (network error or non-2xx).
    pub archive_download_failures_total: IntCounter,
    /// Archive download duration distribution.
    pub archive_download_seconds: Histogram,
    /// Decode/transcode failures after a successful path match.
    pub decode_failures_total: IntCounter,
}

impl Metrics {
    /// Creates a new `Metrics` struct, initializing and registering all collectors.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("odm_gateway".into()), None)
            .expect("Failed to create custom metrics registry");

        macro_rules! reg {
            ($metric:expr) => {{
                let collector = $metric;
                registry
                    .register(Box::new(collector.clone()))
                    .expect("Failed to register metric");
                collector
            }};
        }

        Self {
            extraction_requests_total: reg!(IntCounterVec::new(
                prometheus::Opts::new(
                    "extraction_requests_total",
                    "Total artifact extraction requests"
                ),
                &["artifact"]
            )
            .unwrap()),
            cache_hits_total: reg!(IntCounterVec::new(
                prometheus::Opts::new("cache_hits_total", "Requests served from the disk cache"),
                &["artifact"]
            )
            .unwrap()),
            cache_misses_total: reg!(IntCounterVec::new(
                prometheus::Opts::new(
                    "cache_misses_total",
                    "Requests that fetched and decoded fresh data"
                ),
                &["artifact"]
            )
            .unwrap()),
            archive_downloads_total: reg!(IntCounter::new(
                "archive_downloads_total",
                "Result archives downloaded from the remote server"
            )
            .unwrap()),
            archive_download_failures_total: reg!(IntCounter::new(
                "archive_download_failures_total",
                "Archive downloads that failed"
            )
            .unwrap()),
            archive_download_seconds: reg!(Histogram::with_opts(
                prometheus::HistogramOpts::new(
                    "archive_download_seconds",
                    "Archive download duration"
                )
                .buckets(prometheus::exponential_buckets(0.1, 2.0, 12).unwrap())
            )
            .unwrap()),
            decode_failures_total: reg!(IntCounter::new(
                "decode_failures_total",
                "Artifact decode or transcode failures"
            )
            .unwrap()),
            registry,
        }
    }

    /// Creates an `axum::Router` that serves the metrics on `/metrics`.
    pub fn router(&self) -> Router {
        let registry = self.registry.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let registry = registry.clone();
                async move {
                    let metric_families = registry.gather();
                    let mut buffer = Vec::new();
                    let encoder = TextEncoder::new();
                    encoder
                        .encode(&metric_families, &mut buffer)
                        .expect("Failed to encode metrics");
                    String::from_utf8(buffer)
                        .expect("Metrics buffer is not valid UTF-8")
                        .into_response()
                }
            }),
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
