//! Quire page cache.
//!
//! Stores fully rendered HTML pages as files under a cache root and serves
//! them back before the application renders anything:
//!
//! - **Lookup**: an eligible GET whose artifact exists is answered from disk
//! - **Capture**: an eligible response is written after rendering
//! - **Invalidation**: single URLs, URL subtrees, content items, everything
//!
//! ## Configuration
//!
//! Engine behaviour comes from the `[cache]` section of `quire.toml`:
//!
//! ```toml
//! [cache]
//! enabled = true
//! root = "cache/quire"
//! engine_name = "Quire Page Cache"
//! # ... see config.rs for all options
//! ```
//!
//! The purge interval and exception URLs are edited at runtime and persisted
//! in `<root>/config.toml` by [`ConfigStore`].

mod classifier;
mod config;
mod config_store;
mod engine;
mod events;
mod hooks;
mod invalidation;
mod keys;
mod lock;
mod middleware;
mod store;
mod trigger;

use std::sync::Arc;

pub use classifier::{
    Classifier, DO_NOT_CACHE_MARKER, MissReason, RequestFacts, RuntimeFlags,
    SESSION_COOKIE_MARKERS,
};
pub use config::{
    CacheConfig, DEFAULT_ADMIN_PREFIX, DEFAULT_CACHE_ROOT, DEFAULT_ENGINE_NAME,
    DEFAULT_LOGIN_PATH, DEFAULT_REST_PREFIX,
};
pub use config_store::{
    CONFIG_FILE, CacheOptions, ConfigStore, ConfigStoreError, LoadState, OptionsPatch,
    ParseIntervalError, PurgeInterval,
};
pub use engine::{CacheEngine, CaptureOutcome, Lookup};
pub use events::{ContentEvent, EventReach};
pub use hooks::{
    CacheHooks, ContentId, ContentItem, ContentKind, ContentResolver, ContentStatus, NoHooks,
};
pub use invalidation::{CONTENT_PURGE_DEPTH, ContentPurge, Invalidator, PurgeScope};
pub use keys::{ARTIFACT_FILE, CacheKey, path_to_url, request_path, url_to_path};
pub use middleware::{
    MAX_CAPTURE_BYTES, MISS_HEADER, PageCacheState, SERVED_BY_HEADER, page_cache_layer,
};
pub use store::{ArtifactStore, PurgeReport, StoreError, trailer};
pub use trigger::CacheTrigger;

/// Every cache component for one cache root, wired together.
#[derive(Clone)]
pub struct PageCache {
    pub config: CacheConfig,
    pub store: Arc<ArtifactStore>,
    pub options: Arc<ConfigStore>,
    pub engine: Arc<CacheEngine>,
    pub invalidator: Invalidator,
}

impl PageCache {
    /// Build the components and load runtime options from the cache root.
    pub fn new(config: CacheConfig, hooks: Arc<dyn CacheHooks>) -> Self {
        let store = Arc::new(ArtifactStore::new(&config.root, &config.engine_name));
        let options = Arc::new(ConfigStore::load(config.options_path()));
        let classifier = Classifier::new(&config, Arc::clone(&options), hooks);
        let engine = Arc::new(CacheEngine::new(Arc::clone(&store), classifier));
        let invalidator = Invalidator::new(Arc::clone(&store));

        Self {
            config,
            store,
            options,
            engine,
            invalidator,
        }
    }

    /// State for [`page_cache_layer`].
    pub fn layer_state(&self) -> PageCacheState {
        PageCacheState {
            config: self.config.clone(),
            engine: Arc::clone(&self.engine),
        }
    }

    pub fn trigger(&self, resolver: Arc<dyn ContentResolver>) -> CacheTrigger {
        CacheTrigger::new(self.invalidator.clone(), resolver)
    }
}
