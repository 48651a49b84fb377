//! Invalidation against a real on-disk cache tree.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use quire::cache::{
    ArtifactStore, CacheKey, ContentEvent, ContentId, ContentItem, ContentKind, ContentResolver,
    ContentStatus, Invalidator, PurgeScope, trailer,
};

struct Site {
    items: HashMap<ContentId, ContentItem>,
}

impl Site {
    fn new() -> Self {
        let mut items = HashMap::new();
        let mut add = |item: ContentItem| {
            items.insert(item.id, item);
        };
        add(ContentItem {
            id: ContentId(10),
            kind: ContentKind::Post,
            status: ContentStatus::Published,
            permalink: "https://site.test/2024/hello-world/".to_string(),
            term_urls: vec![
                "https://site.test/category/news/".to_string(),
                "https://site.test/tag/rust/".to_string(),
            ],
            author_url: Some("https://site.test/author/ann/".to_string()),
            parent: None,
        });
        add(ContentItem {
            id: ContentId(11),
            kind: ContentKind::Post,
            status: ContentStatus::Trashed,
            permalink: "https://site.test/2024/gone/".to_string(),
            term_urls: Vec::new(),
            author_url: None,
            parent: None,
        });
        add(ContentItem {
            id: ContentId(12),
            kind: ContentKind::Revision,
            status: ContentStatus::Published,
            permalink: "https://site.test/2024/hello-world/".to_string(),
            term_urls: Vec::new(),
            author_url: None,
            parent: Some(ContentId(10)),
        });
        Self { items }
    }
}

impl ContentResolver for Site {
    fn content(&self, id: ContentId) -> Option<ContentItem> {
        self.items.get(&id).cloned()
    }

    fn posts_page_url(&self) -> String {
        "https://site.test/blog/".to_string()
    }
}

const PAGES: [&str; 10] = [
    "https://site.test/",
    "https://site.test/blog/",
    "https://site.test/blog/page/2/",
    "https://site.test/2024/hello-world/",
    "https://site.test/2024/hello-world/amp/",
    "https://site.test/2024/other/",
    "https://site.test/category/news/",
    "https://site.test/category/news/page/2/",
    "https://site.test/tag/rust/",
    "https://site.test/author/ann/",
];

fn seeded_store(root: &std::path::Path) -> Arc<ArtifactStore> {
    let store = Arc::new(ArtifactStore::new(root, "Quire Test"));
    for url in PAGES {
        let key = CacheKey::from_url(url).expect("key");
        store
            .write(&store.artifact_path(&key), b"<html>page</html>")
            .expect("seed");
    }
    store
}

#[test]
fn content_change_purges_exactly_the_related_pages() {
    let dir = tempfile::tempdir().expect("tempdir");
    let invalidator = Invalidator::new(seeded_store(dir.path()));
    let site = Site::new();

    let outcome =
        invalidator.purge_for_content_change(ContentId(10), &site, &mut PurgeScope::new());
    assert!(outcome.is_success());

    assert_eq!(
        invalidator.cached_urls(true),
        vec![
            "https://site.test/".to_string(),
            "https://site.test/2024/other/".to_string(),
            "https://site.test/blog/page/2/".to_string(),
        ]
    );
}

#[test]
fn trashed_and_revision_content_is_skipped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let invalidator = Invalidator::new(seeded_store(dir.path()));
    let site = Site::new();
    let mut scope = PurgeScope::new();

    for id in [ContentId(11), ContentId(12)] {
        assert!(invalidator.purge_for_content_change(id, &site, &mut scope).is_success());
    }
    assert_eq!(invalidator.cached_urls(true).len(), PAGES.len());
}

#[test]
fn event_burst_in_one_scope_purges_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = seeded_store(dir.path());
    let trigger = quire::cache::CacheTrigger::new(Invalidator::new(Arc::clone(&store)), Arc::new(Site::new()));
    let mut scope = PurgeScope::new();

    assert!(trigger.dispatch(ContentEvent::PrePostUpdate(ContentId(10)), &mut scope));

    // Re-rendered between events; the memo keeps the fresh copy.
    let key = CacheKey::from_url("https://site.test/2024/hello-world/").expect("key");
    store
        .write(&store.artifact_path(&key), b"<html>fresh</html>")
        .expect("rewrite");
    assert!(trigger.dispatch(ContentEvent::PostPublished(ContentId(10)), &mut scope));
    assert!(store.artifact_path(&key).exists());

    assert!(trigger.dispatch(ContentEvent::NavMenuUpdated, &mut scope));
    assert!(trigger.invalidator().cached_urls(true).is_empty());
}

#[test]
fn write_then_read_returns_body_and_trailer() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = ArtifactStore::new(dir.path(), "Quire Test");
    let key = CacheKey::from_url("https://site.test/a/b/c").expect("key");
    let path = store.artifact_path(&key);

    store.write(&path, b"<html>body</html>").expect("write");
    let bytes = store.read(&path).expect("read").expect("present");
    let text = std::str::from_utf8(&bytes).expect("utf8");

    let expected_len = "<html>body</html>".len()
        + trailer("Quire Test", time::OffsetDateTime::now_utc()).len();
    assert!(text.starts_with("<html>body</html>\n<!-- Cache served by Quire Test"));
    assert_eq!(text.len(), expected_len);
}

#[test]
fn readers_never_observe_partial_artifacts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(ArtifactStore::new(dir.path(), "Quire Test"));
    let key = CacheKey::from_url("https://site.test/busy/").expect("key");
    let path = store.artifact_path(&key);

    let small = "<html>a</html>".to_string();
    let large = format!("<html>{}</html>", "b".repeat(256 * 1024));
    store.write(&path, small.as_bytes()).expect("seed");

    let done = Arc::new(AtomicBool::new(false));
    let writer = {
        let store = Arc::clone(&store);
        let path = path.clone();
        let done = Arc::clone(&done);
        let (small, large) = (small.clone(), large.clone());
        thread::spawn(move || {
            for round in 0..50 {
                let body = if round % 2 == 0 { &large } else { &small };
                store.write(&path, body.as_bytes()).expect("write");
            }
            done.store(true, Ordering::SeqCst);
        })
    };

    while !done.load(Ordering::SeqCst) {
        if let Some(bytes) = store.read(&path).expect("read") {
            let text = std::str::from_utf8(&bytes).expect("utf8");
            assert!(
                text.starts_with(&small) || text.starts_with(&large),
                "observed a torn artifact of {} bytes",
                bytes.len()
            );
            assert!(text.ends_with(" GMT -->\n"));
        }
    }
    writer.join().expect("writer thread");
}
