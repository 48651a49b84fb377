//! Static engine configuration.
//!
//! Resolved once from deployment settings (`quire.toml`, environment, CLI).
//! The runtime-editable part (purge interval, exception URLs) lives in
//! [`super::ConfigStore`] instead.

use std::path::PathBuf;

use serde::Deserialize;

pub const DEFAULT_CACHE_ROOT: &str = "cache/quire";
pub const DEFAULT_ENGINE_NAME: &str = "Quire Page Cache";
pub const DEFAULT_ADMIN_PREFIX: &str = "/admin";
pub const DEFAULT_LOGIN_PATH: &str = "/login";
pub const DEFAULT_REST_PREFIX: &str = "/api/";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Serve and capture pages at all.
    pub enabled: bool,
    /// Directory holding `<host>/<path>/_index.html` artifacts and `config.toml`.
    pub root: PathBuf,
    /// Name written into artifact trailers and the served-by header.
    pub engine_name: String,
    /// Scheme assumed when neither the request URI nor `X-Forwarded-Proto` says.
    pub default_https: bool,
    /// Requests under this path prefix are administrative.
    pub admin_prefix: String,
    /// Path of the login page.
    pub login_path: String,
    /// Requests under this path prefix are REST API calls.
    pub rest_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root: PathBuf::from(DEFAULT_CACHE_ROOT),
            engine_name: DEFAULT_ENGINE_NAME.to_string(),
            default_https: false,
            admin_prefix: DEFAULT_ADMIN_PREFIX.to_string(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            rest_prefix: DEFAULT_REST_PREFIX.to_string(),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            root: settings.root.clone(),
            engine_name: settings.engine_name.clone(),
            default_https: settings.default_https,
            admin_prefix: settings.admin_prefix.clone(),
            login_path: settings.login_path.clone(),
            rest_prefix: settings.rest_prefix.clone(),
        }
    }
}

impl CacheConfig {
    /// Location of the persisted runtime options.
    pub fn options_path(&self) -> PathBuf {
        self.root.join(super::config_store::CONFIG_FILE)
    }
}
