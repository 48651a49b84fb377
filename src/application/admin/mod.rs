//! Application services for the administrative surface.

pub mod cache;

pub use cache::{AdminCacheError, AdminCacheService, OptionsView, UpdateOptionsCommand};
