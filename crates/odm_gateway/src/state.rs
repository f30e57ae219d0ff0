use std::sync::Arc;

use crate::cache::CacheStore;
use crate::metrics::Metrics;

/// Shared dependencies of every extraction handler. The cache store is a
/// trait object so tests can point it somewhere disposable. There is no
/// in-memory cross-request cache or lock table; requests only share the
/// disk cache directory.
pub struct AppState {
    pub http: reqwest::Client,
    pub nodeodm_url: String,
    pub cache: Arc<dyn CacheStore>,
    pub metrics: Arc<Metrics>,
    /// Point cap applied when the client does not pass `maxPoints`.
    pub default_max_points: usize,
}

impl AppState {
    pub fn new(
        nodeodm_url: String,
        cache: Arc<dyn CacheStore>,
        metrics: Arc<Metrics>,
        default_max_points: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            http: reqwest::Client::new(),
            nodeodm_url,
            cache,
            metrics,
            default_max_points,
        })
    }
}
