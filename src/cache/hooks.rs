//! Contracts the host application implements.
//!
//! The cache never looks at the host's content model directly. It asks these
//! traits for the few facts it needs: whether a URL may be cached, and which
//! URLs a piece of content appears on.

use std::fmt;

/// Extension point consulted for every cacheability decision.
pub trait CacheHooks: Send + Sync {
    /// Return `false` to keep `url` out of the cache.
    fn allow_caching(&self, _url: &str) -> bool {
        true
    }
}

/// Hooks that never veto anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl CacheHooks for NoHooks {}

/// Host-side identifier of a content item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId(pub u64);

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Post,
    Page,
    Attachment,
    Revision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentStatus {
    Published,
    Draft,
    Pending,
    Private,
    Scheduled,
    Trashed,
}

/// What the cache needs to know about one content item.
#[derive(Debug, Clone)]
pub struct ContentItem {
    pub id: ContentId,
    pub kind: ContentKind,
    pub status: ContentStatus,
    /// Canonical URL of the item itself.
    pub permalink: String,
    /// Archive URLs of every taxonomy term attached to the item.
    pub term_urls: Vec<String>,
    /// Archive URL of the item's author.
    pub author_url: Option<String>,
    /// Owning item, for attachments.
    pub parent: Option<ContentId>,
}

/// Resolves content identifiers to URLs.
pub trait ContentResolver: Send + Sync {
    fn content(&self, id: ContentId) -> Option<ContentItem>;

    /// The posts-listing page, or the home page when the site has none.
    fn posts_page_url(&self) -> String;
}
