//! Quire: a full-page HTTP response cache for content-managed sites.
//!
//! Rendered pages are stored verbatim as files under a cache root, keyed by
//! host and URL path. The directory tree is both the storage and the only
//! invalidation index.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
