use std::sync::Arc;

use arc_swap::ArcSwap;
use gemproxy_common::GlobalConfig;
use gemproxy_credentials::{GeminiRotator, TokenCache, VertexRotator};
use gemproxy_lro::LroAffinityCache;
use gemproxy_storage::AttemptStorage;

/// Everything C6 needs to serve one request. Handed to request tasks as an
/// `Arc<AppState>`; no process-wide mutable statics beyond what `ArcSwap`
/// already isolates per field.
pub struct AppState {
    pub gemini: Arc<GeminiRotator>,
    pub vertex: Arc<VertexRotator>,
    pub tokens: Arc<TokenCache>,
    pub lro: Arc<LroAffinityCache>,
    pub storage: Option<Arc<AttemptStorage>>,
    pub http: Arc<wreq::Client>,
    pub config: Arc<ArcSwap<GlobalConfig>>,
}

impl AppState {
    /// Re-reads both credential trees from disk. Safe to call while serving
    /// requests: each rotator swaps its own pool pointer atomically, and any
    /// request already holding a credential finishes the attempt it started.
    pub fn reload_credentials(&self) {
        self.gemini.reload();
        self.vertex.reload();
    }

    pub fn config(&self) -> Arc<GlobalConfig> {
        self.config.load_full()
    }
}
