//! Host events that invalidate cached pages.

use super::hooks::ContentId;

/// A change in the host application that may make cached pages stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEvent {
    // Content
    /// A content item is about to be updated.
    PrePostUpdate(ContentId),
    /// The host dropped its own cached copy of an item.
    PostCacheCleaned(ContentId),
    /// An item was moved to the trash.
    PostTrashed(ContentId),
    /// An item was published.
    PostPublished(ContentId),

    // Site-wide
    ThemeSwitched,
    NavMenuUpdated,
    UserProfileUpdated,
    TermEdited,
}

/// How much of the cache an event invalidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventReach {
    /// Pages showing one content item.
    Content(ContentId),
    /// Every page.
    Site,
}

impl ContentEvent {
    pub fn reach(self) -> EventReach {
        match self {
            ContentEvent::PrePostUpdate(id)
            | ContentEvent::PostCacheCleaned(id)
            | ContentEvent::PostTrashed(id)
            | ContentEvent::PostPublished(id) => EventReach::Content(id),
            ContentEvent::ThemeSwitched
            | ContentEvent::NavMenuUpdated
            | ContentEvent::UserProfileUpdated
            | ContentEvent::TermEdited => EventReach::Site,
        }
    }

    /// Stable name for logs.
    pub fn name(self) -> &'static str {
        match self {
            ContentEvent::PrePostUpdate(_) => "pre_post_update",
            ContentEvent::PostCacheCleaned(_) => "post_cache_cleaned",
            ContentEvent::PostTrashed(_) => "post_trashed",
            ContentEvent::PostPublished(_) => "post_published",
            ContentEvent::ThemeSwitched => "theme_switched",
            ContentEvent::NavMenuUpdated => "nav_menu_updated",
            ContentEvent::UserProfileUpdated => "user_profile_updated",
            ContentEvent::TermEdited => "term_edited",
        }
    }
}
