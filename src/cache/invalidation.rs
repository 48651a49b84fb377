//! Purging artifacts: the whole cache, one URL with an optional subtree, or
//! every URL a content item appears on.
//!
//! The directory tree is the only index. A URL's descendants are the
//! artifacts below its key directory, so a subtree purge is a bounded walk.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use tracing::{info, warn};

use super::hooks::{ContentId, ContentKind, ContentResolver, ContentStatus};
use super::keys::{CacheKey, path_to_url};
use super::store::{ArtifactStore, PurgeReport};

const METRIC_PURGE_MS: &str = "quire_page_cache_purge_ms";

/// Descendant depth purged around a changed item's own pages.
pub const CONTENT_PURGE_DEPTH: usize = 2;

/// Request-scoped memo of content purges.
///
/// Hosts often raise several change events for one item while handling a
/// single request; passing the same scope to each makes only the first one
/// touch the disk.
#[derive(Debug, Default)]
pub struct PurgeScope {
    results: HashMap<ContentId, bool>,
}

impl PurgeScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outcome of an earlier purge of `id` in this scope.
    pub fn result(&self, id: ContentId) -> Option<bool> {
        self.results.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Outcome of [`Invalidator::purge_for_content_change`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPurge {
    Purged(PurgeReport),
    /// Not published, or a revision; nothing to invalidate.
    Skipped,
    /// The resolver does not know the item.
    Unknown,
    /// Already purged earlier in the same scope.
    Repeated(bool),
}

impl ContentPurge {
    pub fn is_success(&self) -> bool {
        match self {
            ContentPurge::Purged(report) => report.is_success(),
            ContentPurge::Skipped => true,
            ContentPurge::Unknown => false,
            ContentPurge::Repeated(success) => *success,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Invalidator {
    store: Arc<ArtifactStore>,
}

impl Invalidator {
    pub fn new(store: Arc<ArtifactStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    /// Delete every artifact under the cache root.
    pub fn purge_all(&self) -> PurgeReport {
        let started = Instant::now();
        let paths = self.store.list_artifacts(self.store.root(), None);
        let report = self.store.delete_many(paths);
        histogram!(METRIC_PURGE_MS).record(started.elapsed().as_secs_f64() * 1000.0);

        info!(
            target = "quire::cache::invalidation",
            op = "purge_all",
            result = if report.is_success() { "ok" } else { "partial" },
            deleted = report.deleted,
            failed = report.failed.len(),
            "Purged page cache"
        );
        report
    }

    /// Delete the artifact for `url` and, when `depth > 0`, every artifact in
    /// the directories 1 to `depth` levels below it.
    ///
    /// A URL that was never cached purges successfully. A URL that cannot be
    /// mapped to a cache path fails.
    pub fn purge_url(&self, url: &str, depth: usize) -> PurgeReport {
        let Some(key) = CacheKey::from_url(url) else {
            warn!(
                target = "quire::cache::invalidation",
                op = "purge_url",
                result = "unresolved",
                url,
                "Cannot map URL to a cache path"
            );
            return PurgeReport::unresolved();
        };

        let own = self.store.artifact_path(&key);
        let mut targets = if depth > 0 {
            self.store.list_artifacts(&self.store.key_dir(&key), Some(depth))
        } else {
            Vec::new()
        };
        if !targets.contains(&own) {
            targets.push(own);
        }

        let report = self.store.delete_many(targets);
        info!(
            target = "quire::cache::invalidation",
            op = "purge_url",
            result = if report.is_success() { "ok" } else { "partial" },
            url,
            depth,
            deleted = report.deleted,
            "Purged URL"
        );
        report
    }

    /// Purge every page that shows content item `id`.
    ///
    /// The item's permalink, its term archives and its author archive are
    /// purged with their descendants; the posts-listing page without. Every
    /// URL is attempted even when an earlier one fails. Attachments stand in
    /// for their parent item.
    pub fn purge_for_content_change(
        &self,
        id: ContentId,
        resolver: &dyn ContentResolver,
        scope: &mut PurgeScope,
    ) -> ContentPurge {
        if let Some(success) = scope.result(id) {
            return ContentPurge::Repeated(success);
        }

        let outcome = self.purge_content(id, resolver);
        scope.results.insert(id, outcome.is_success());
        outcome
    }

    fn purge_content(&self, id: ContentId, resolver: &dyn ContentResolver) -> ContentPurge {
        let Some(mut item) = resolver.content(id) else {
            warn!(
                target = "quire::cache::invalidation",
                op = "purge_content",
                result = "unknown",
                content_id = %id,
                "Content item not found"
            );
            return ContentPurge::Unknown;
        };

        if item.kind == ContentKind::Attachment {
            let Some(parent) = item.parent else {
                return ContentPurge::Skipped;
            };
            match resolver.content(parent) {
                Some(parent_item) => item = parent_item,
                None => return ContentPurge::Unknown,
            }
        }

        if matches!(item.kind, ContentKind::Revision | ContentKind::Attachment)
            || item.status != ContentStatus::Published
        {
            return ContentPurge::Skipped;
        }

        let mut with_descendants = vec![item.permalink.clone()];
        with_descendants.extend(item.term_urls.iter().cloned());
        with_descendants.extend(item.author_url.clone());

        let mut report = PurgeReport::default();
        for url in &with_descendants {
            report.merge(self.purge_url(url, CONTENT_PURGE_DEPTH));
        }
        report.merge(self.purge_url(&resolver.posts_page_url(), 0));

        info!(
            target = "quire::cache::invalidation",
            op = "purge_content",
            result = if report.is_success() { "ok" } else { "partial" },
            content_id = %item.id,
            urls = with_descendants.len() + 1,
            deleted = report.deleted,
            "Purged pages for changed content"
        );
        ContentPurge::Purged(report)
    }

    /// URLs of every stored artifact, sorted. For display only.
    pub fn cached_urls(&self, https: bool) -> Vec<String> {
        let root = self.store.root();
        let mut urls: Vec<String> = self
            .store
            .list_artifacts(root, None)
            .iter()
            .filter_map(|path| path_to_url(root, path, https))
            .collect();
        urls.sort();
        urls
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::cache::hooks::ContentItem;

    const PAGE: &[u8] = b"<html></html>";

    fn invalidator(root: &Path) -> Invalidator {
        Invalidator::new(Arc::new(ArtifactStore::new(root, "Test Engine")))
    }

    fn seed(invalidator: &Invalidator, urls: &[&str]) {
        for url in urls {
            let key = CacheKey::from_url(url).expect("key");
            invalidator
                .store()
                .write(&invalidator.store().artifact_path(&key), PAGE)
                .expect("write");
        }
    }

    fn cached(invalidator: &Invalidator, url: &str) -> bool {
        let key = CacheKey::from_url(url).expect("key");
        invalidator.store().artifact_path(&key).exists()
    }

    #[test]
    fn purge_url_with_depth_removes_subtree_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let inv = invalidator(dir.path());
        seed(
            &inv,
            &[
                "https://site.test/blog/post-1/",
                "https://site.test/blog/post-1/comments/",
                "https://site.test/blog/post-2/",
            ],
        );

        let report = inv.purge_url("https://site.test/blog/post-1", 2);
        assert!(report.is_success());
        assert_eq!(report.deleted, 2);
        assert!(!cached(&inv, "https://site.test/blog/post-1/"));
        assert!(!cached(&inv, "https://site.test/blog/post-1/comments/"));
        assert!(cached(&inv, "https://site.test/blog/post-2/"));
    }

    #[test]
    fn depth_bounds_descendant_levels() {
        let dir = tempfile::tempdir().expect("tempdir");
        let inv = invalidator(dir.path());
        seed(
            &inv,
            &[
                "https://site.test/c/",
                "https://site.test/c/page/",
                "https://site.test/c/page/2/",
            ],
        );

        inv.purge_url("https://site.test/c/", 1);
        assert!(!cached(&inv, "https://site.test/c/"));
        assert!(!cached(&inv, "https://site.test/c/page/"));
        assert!(cached(&inv, "https://site.test/c/page/2/"));
    }

    #[test]
    fn depth_zero_leaves_children() {
        let dir = tempfile::tempdir().expect("tempdir");
        let inv = invalidator(dir.path());
        seed(&inv, &["https://site.test/", "https://site.test/about/"]);

        inv.purge_url("https://site.test/", 0);
        assert!(!cached(&inv, "https://site.test/"));
        assert!(cached(&inv, "https://site.test/about/"));
    }

    #[test]
    fn purging_uncached_url_succeeds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let inv = invalidator(dir.path());

        let report = inv.purge_url("https://site.test/never/", 2);
        assert!(report.is_success());
        assert_eq!(report.deleted, 0);
        assert_eq!(report.missing, 1);
    }

    #[test]
    fn unresolvable_url_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let inv = invalidator(dir.path());

        assert!(!inv.purge_url("not a url", 0).is_success());
        assert!(!inv.purge_url("", 0).is_success());
    }

    #[test]
    fn purge_all_empties_cache_and_keeps_options_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let inv = invalidator(dir.path());
        seed(
            &inv,
            &[
                "https://a.test/",
                "https://a.test/x/y/z/",
                "https://b.test/deep/er/than/two/",
            ],
        );
        std::fs::write(dir.path().join("config.toml"), b"purge_interval = \"daily\"\n")
            .expect("options");

        let report = inv.purge_all();
        assert!(report.is_success());
        assert_eq!(report.deleted, 3);
        assert!(inv.cached_urls(true).is_empty());
        assert!(dir.path().join("config.toml").exists());
    }

    #[test]
    fn cached_urls_lists_sorted_display_urls() {
        let dir = tempfile::tempdir().expect("tempdir");
        let inv = invalidator(dir.path());
        seed(&inv, &["https://site.test/b/", "https://site.test/a/"]);

        assert_eq!(
            inv.cached_urls(false),
            vec!["http://site.test/a/".to_string(), "http://site.test/b/".to_string()]
        );
    }

    struct Catalog(Vec<ContentItem>);

    impl ContentResolver for Catalog {
        fn content(&self, id: ContentId) -> Option<ContentItem> {
            self.0.iter().find(|item| item.id == id).cloned()
        }

        fn posts_page_url(&self) -> String {
            "https://site.test/".to_string()
        }
    }

    fn item(id: u64, kind: ContentKind, status: ContentStatus) -> ContentItem {
        ContentItem {
            id: ContentId(id),
            kind,
            status,
            permalink: format!("https://site.test/blog/post-{id}/"),
            term_urls: vec!["https://site.test/category/news/".to_string()],
            author_url: Some("https://site.test/author/ann/".to_string()),
            parent: None,
        }
    }

    fn catalog() -> Catalog {
        let mut attachment = item(3, ContentKind::Attachment, ContentStatus::Published);
        attachment.parent = Some(ContentId(1));
        Catalog(vec![
            item(1, ContentKind::Post, ContentStatus::Published),
            item(2, ContentKind::Post, ContentStatus::Draft),
            attachment,
        ])
    }

    const SITE: [&str; 7] = [
        "https://site.test/",
        "https://site.test/about/",
        "https://site.test/blog/post-1/",
        "https://site.test/blog/post-1/comments/",
        "https://site.test/category/news/",
        "https://site.test/category/news/page/2/",
        "https://site.test/author/ann/",
    ];

    #[test]
    fn published_post_purges_related_pages() {
        let dir = tempfile::tempdir().expect("tempdir");
        let inv = invalidator(dir.path());
        seed(&inv, &SITE);

        let outcome = inv.purge_for_content_change(ContentId(1), &catalog(), &mut PurgeScope::new());
        assert!(outcome.is_success());
        assert_eq!(inv.cached_urls(true), vec!["https://site.test/about/".to_string()]);
    }

    #[test]
    fn draft_is_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let inv = invalidator(dir.path());
        seed(&inv, &SITE);

        let outcome = inv.purge_for_content_change(ContentId(2), &catalog(), &mut PurgeScope::new());
        assert_eq!(outcome, ContentPurge::Skipped);
        assert_eq!(inv.cached_urls(true).len(), SITE.len());
    }

    #[test]
    fn attachment_purges_parent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let inv = invalidator(dir.path());
        seed(&inv, &SITE);

        let outcome = inv.purge_for_content_change(ContentId(3), &catalog(), &mut PurgeScope::new());
        assert!(matches!(outcome, ContentPurge::Purged(_)));
        assert!(!cached(&inv, "https://site.test/blog/post-1/"));
    }

    #[test]
    fn unknown_content_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let inv = invalidator(dir.path());

        let outcome = inv.purge_for_content_change(ContentId(99), &catalog(), &mut PurgeScope::new());
        assert_eq!(outcome, ContentPurge::Unknown);
        assert!(!outcome.is_success());
    }

    #[test]
    fn scope_purges_each_item_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let inv = invalidator(dir.path());
        let mut scope = PurgeScope::new();

        assert!(matches!(
            inv.purge_for_content_change(ContentId(1), &catalog(), &mut scope),
            ContentPurge::Purged(_)
        ));

        seed(&inv, &["https://site.test/blog/post-1/"]);
        assert_eq!(
            inv.purge_for_content_change(ContentId(1), &catalog(), &mut scope),
            ContentPurge::Repeated(true)
        );
        assert!(cached(&inv, "https://site.test/blog/post-1/"));
        assert_eq!(scope.len(), 1);
    }
}
