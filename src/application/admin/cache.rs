use std::sync::Arc;

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::cache::{
    CacheOptions, ConfigStore, ConfigStoreError, ContentId, ContentPurge, ContentResolver,
    Invalidator, LoadState, OptionsPatch, PageCache, PurgeInterval, PurgeReport, PurgeScope,
};

#[derive(Debug, Error)]
pub enum AdminCacheError {
    #[error("{0}")]
    ConstraintViolation(&'static str),
    #[error("purge incomplete: {deleted} pages deleted, {failed} could not be deleted")]
    PurgeIncomplete { deleted: usize, failed: usize },
    #[error("content {0} could not be purged")]
    ContentPurgeFailed(ContentId),
    #[error(transparent)]
    Options(#[from] ConfigStoreError),
}

#[derive(Debug, Clone, Default)]
pub struct UpdateOptionsCommand {
    pub purge_interval: Option<PurgeInterval>,
    pub exception_urls: Option<Vec<String>>,
}

/// Current options plus how they were loaded.
#[derive(Debug, Clone)]
pub struct OptionsView {
    pub options: CacheOptions,
    pub state: LoadState,
}

/// Purge, listing and options operations behind the admin surface.
#[derive(Clone)]
pub struct AdminCacheService {
    invalidator: Invalidator,
    options: Arc<ConfigStore>,
    https: bool,
}

impl AdminCacheService {
    pub fn new(cache: &PageCache) -> Self {
        Self {
            invalidator: cache.invalidator.clone(),
            options: Arc::clone(&cache.options),
            https: cache.config.default_https,
        }
    }

    pub fn purge_all(&self) -> Result<PurgeReport, AdminCacheError> {
        ensure_complete(self.invalidator.purge_all())
    }

    pub fn purge_url(&self, url: &str, depth: usize) -> Result<PurgeReport, AdminCacheError> {
        let report = self.invalidator.purge_url(url.trim(), depth);
        if report.unresolved {
            return Err(AdminCacheError::ConstraintViolation(
                "url cannot be mapped to a cache path",
            ));
        }
        ensure_complete(report)
    }

    pub fn purge_content(
        &self,
        id: ContentId,
        resolver: &dyn ContentResolver,
    ) -> Result<ContentPurge, AdminCacheError> {
        let outcome = self
            .invalidator
            .purge_for_content_change(id, resolver, &mut PurgeScope::new());
        if outcome.is_success() {
            Ok(outcome)
        } else {
            Err(AdminCacheError::ContentPurgeFailed(id))
        }
    }

    pub fn cached_urls(&self) -> Vec<String> {
        self.invalidator.cached_urls(self.https)
    }

    pub fn options(&self) -> OptionsView {
        OptionsView {
            options: self.options.options(),
            state: self.options.load_state(),
        }
    }

    pub fn update_options(
        &self,
        command: UpdateOptionsCommand,
    ) -> Result<CacheOptions, AdminCacheError> {
        if let Some(urls) = command.exception_urls.as_ref() {
            for url in urls {
                ensure_absolute_url(url)?;
            }
        }

        let saved = self.options.save(OptionsPatch {
            purge_interval: command.purge_interval,
            exception_urls: command.exception_urls,
        })?;
        info!(
            target = "quire::application::admin::cache",
            op = "update_options",
            purge_interval = %saved.purge_interval,
            exception_urls = saved.exception_urls.len(),
            "Cache options updated"
        );
        Ok(saved)
    }

    pub fn reset_options(&self) -> Result<CacheOptions, AdminCacheError> {
        Ok(self.options.create()?)
    }

    pub fn remove_options(&self) -> Result<(), AdminCacheError> {
        Ok(self.options.delete()?)
    }
}

fn ensure_complete(report: PurgeReport) -> Result<PurgeReport, AdminCacheError> {
    if report.is_success() {
        Ok(report)
    } else {
        Err(AdminCacheError::PurgeIncomplete {
            deleted: report.deleted,
            failed: report.failed.len(),
        })
    }
}

fn ensure_absolute_url(value: &str) -> Result<(), AdminCacheError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(());
    }
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => Ok(()),
        _ => Err(AdminCacheError::ConstraintViolation(
            "exception urls must be absolute http(s) urls",
        )),
    }
}
