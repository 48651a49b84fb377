//! Cache trigger service.
//!
//! The host calls into this from its write paths; each event is turned into
//! the matching purge right away.

use std::sync::Arc;

use tracing::info;

use super::events::{ContentEvent, EventReach};
use super::hooks::{ContentId, ContentResolver};
use super::invalidation::{ContentPurge, Invalidator, PurgeScope};

/// Routes host events to the invalidator.
///
/// # Usage
///
/// ```ignore
/// let mut scope = PurgeScope::new();
/// trigger.dispatch(ContentEvent::PrePostUpdate(id), &mut scope);
/// trigger.dispatch(ContentEvent::PostPublished(id), &mut scope); // memoized
/// ```
pub struct CacheTrigger {
    invalidator: Invalidator,
    resolver: Arc<dyn ContentResolver>,
}

impl CacheTrigger {
    pub fn new(invalidator: Invalidator, resolver: Arc<dyn ContentResolver>) -> Self {
        Self {
            invalidator,
            resolver,
        }
    }

    /// Purge whatever `event` makes stale. Returns whether the purge
    /// succeeded.
    pub fn dispatch(&self, event: ContentEvent, scope: &mut PurgeScope) -> bool {
        info!(
            target = "quire::cache::trigger",
            event = event.name(),
            "Cache event received"
        );

        match event.reach() {
            EventReach::Content(id) => self.post_changed(id, scope).is_success(),
            EventReach::Site => self.site_changed(),
        }
    }

    pub fn post_changed(&self, id: ContentId, scope: &mut PurgeScope) -> ContentPurge {
        self.invalidator
            .purge_for_content_change(id, self.resolver.as_ref(), scope)
    }

    pub fn site_changed(&self) -> bool {
        self.invalidator.purge_all().is_success()
    }

    pub fn invalidator(&self) -> &Invalidator {
        &self.invalidator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::hooks::{ContentItem, ContentKind, ContentStatus};
    use crate::cache::keys::CacheKey;
    use crate::cache::store::ArtifactStore;

    struct OnePost;

    impl ContentResolver for OnePost {
        fn content(&self, id: ContentId) -> Option<ContentItem> {
            (id == ContentId(1)).then(|| ContentItem {
                id,
                kind: ContentKind::Post,
                status: ContentStatus::Published,
                permalink: "https://site.test/hello/".to_string(),
                term_urls: Vec::new(),
                author_url: None,
                parent: None,
            })
        }

        fn posts_page_url(&self) -> String {
            "https://site.test/".to_string()
        }
    }

    fn create_trigger(root: &std::path::Path) -> CacheTrigger {
        let store = Arc::new(ArtifactStore::new(root, "Test Engine"));
        CacheTrigger::new(Invalidator::new(store), Arc::new(OnePost))
    }

    fn seed(trigger: &CacheTrigger, url: &str) {
        let store = trigger.invalidator().store();
        let key = CacheKey::from_url(url).expect("key");
        store
            .write(&store.artifact_path(&key), b"<html></html>")
            .expect("write");
    }

    #[test]
    fn content_event_purges_item_pages_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let trigger = create_trigger(dir.path());
        seed(&trigger, "https://site.test/hello/");
        seed(&trigger, "https://site.test/other/");

        assert!(trigger.dispatch(ContentEvent::PostPublished(ContentId(1)), &mut PurgeScope::new()));
        assert_eq!(
            trigger.invalidator().cached_urls(true),
            vec!["https://site.test/other/".to_string()]
        );
    }

    #[test]
    fn site_event_purges_everything() {
        let dir = tempfile::tempdir().expect("tempdir");
        let trigger = create_trigger(dir.path());
        seed(&trigger, "https://site.test/hello/");
        seed(&trigger, "https://site.test/other/");

        assert!(trigger.dispatch(ContentEvent::ThemeSwitched, &mut PurgeScope::new()));
        assert!(trigger.invalidator().cached_urls(true).is_empty());
    }

    #[test]
    fn repeated_events_share_one_purge() {
        let dir = tempfile::tempdir().expect("tempdir");
        let trigger = create_trigger(dir.path());
        let mut scope = PurgeScope::new();

        assert!(trigger.dispatch(ContentEvent::PrePostUpdate(ContentId(1)), &mut scope));
        assert_eq!(
            trigger.post_changed(ContentId(1), &mut scope),
            ContentPurge::Repeated(true)
        );
    }

    #[test]
    fn unknown_item_reports_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let trigger = create_trigger(dir.path());

        assert!(!trigger.dispatch(ContentEvent::PostTrashed(ContentId(42)), &mut PurgeScope::new()));
    }
}
