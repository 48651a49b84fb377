//! The two per-request decision points: lookup before rendering and capture
//! after it.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use metrics::counter;
use tracing::{debug, warn};

use super::classifier::{
    Classifier, DO_NOT_CACHE_MARKER, MissReason, RequestFacts, RuntimeFlags, record_miss,
};
use super::store::{ArtifactStore, StoreError};

const METRIC_HIT: &str = "quire_page_cache_hit_total";
const METRIC_STORE: &str = "quire_page_cache_store_total";
const METRIC_STORE_FAILED: &str = "quire_page_cache_store_failed_total";

const DOCUMENT_END: &[u8] = b"</html>";

/// Result of the pre-render decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Serve these bytes and skip rendering.
    Hit(Bytes),
    /// Eligible but not stored yet; render and try to capture.
    Miss,
    /// Not eligible; render without any cache involvement.
    Bypass(MissReason),
}

/// Result of the post-render decision.
#[derive(Debug)]
pub enum CaptureOutcome {
    Stored(PathBuf),
    Rejected(MissReason),
    /// Eligible, but the artifact could not be written. The page is still
    /// served live.
    Failed(StoreError),
}

pub struct CacheEngine {
    store: Arc<ArtifactStore>,
    classifier: Classifier,
}

impl CacheEngine {
    pub fn new(store: Arc<ArtifactStore>, classifier: Classifier) -> Self {
        Self { store, classifier }
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Decide whether the request can be answered from disk.
    ///
    /// A read error is logged and treated as a miss.
    pub fn lookup(&self, facts: &RequestFacts, flags: &RuntimeFlags) -> Lookup {
        if let Err(reason) = self.classifier.check(facts, flags) {
            return Lookup::Bypass(reason);
        }

        let Some(key) = facts.key() else {
            record_miss(MissReason::Unkeyable, &facts.path);
            return Lookup::Bypass(MissReason::Unkeyable);
        };

        let path = self.store.artifact_path(&key);
        match self.store.read(&path) {
            Ok(Some(body)) => {
                counter!(METRIC_HIT).increment(1);
                debug!(
                    target = "quire::cache::engine",
                    op = "lookup",
                    result = "hit",
                    key = %key,
                    "serving cached page"
                );
                Lookup::Hit(body)
            }
            Ok(None) => {
                debug!(
                    target = "quire::cache::engine",
                    op = "lookup",
                    result = "miss",
                    key = %key,
                    "cache miss, rendering"
                );
                Lookup::Miss
            }
            Err(err) => {
                warn!(
                    target = "quire::cache::engine",
                    op = "lookup",
                    result = "error",
                    key = %key,
                    error = %err,
                    "Failed to read cached page, rendering live"
                );
                Lookup::Miss
            }
        }
    }

    /// Persist a freshly rendered body when the request is still eligible.
    ///
    /// Never alters `body`; the caller forwards it unchanged either way.
    pub fn capture(&self, facts: &RequestFacts, flags: &RuntimeFlags, body: &[u8]) -> CaptureOutcome {
        if let Err(reason) = self.classifier.check(facts, flags) {
            return CaptureOutcome::Rejected(reason);
        }

        if let Err(reason) = inspect_body(body) {
            record_miss(reason, &facts.path);
            return CaptureOutcome::Rejected(reason);
        }

        let Some(key) = facts.key() else {
            record_miss(MissReason::Unkeyable, &facts.path);
            return CaptureOutcome::Rejected(MissReason::Unkeyable);
        };

        let path = self.store.artifact_path(&key);
        match self.store.write(&path, body) {
            Ok(()) => {
                counter!(METRIC_STORE).increment(1);
                debug!(
                    target = "quire::cache::engine",
                    op = "capture",
                    result = "stored",
                    key = %key,
                    bytes = body.len(),
                    "page cached"
                );
                CaptureOutcome::Stored(path)
            }
            Err(err) => {
                counter!(METRIC_STORE_FAILED).increment(1);
                warn!(
                    target = "quire::cache::engine",
                    op = "capture",
                    result = "error",
                    key = %key,
                    error = %err,
                    "Failed to cache page"
                );
                CaptureOutcome::Failed(err)
            }
        }
    }
}

/// Reject bodies that are not a complete document or opt out explicitly.
fn inspect_body(body: &[u8]) -> Result<(), MissReason> {
    if !contains_ignore_case(body, DOCUMENT_END) {
        return Err(MissReason::NotHtml);
    }
    if contains_ignore_case(body, DO_NOT_CACHE_MARKER.as_bytes()) {
        return Err(MissReason::DoNotCacheMarker);
    }
    Ok(())
}

fn contains_ignore_case(haystack: &[u8], needle: &[u8]) -> bool {
    haystack
        .windows(needle.len())
        .any(|window| window.eq_ignore_ascii_case(needle))
}
