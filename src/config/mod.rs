//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{path::PathBuf, str::FromStr};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{
    DEFAULT_ADMIN_PREFIX, DEFAULT_CACHE_ROOT, DEFAULT_ENGINE_NAME, DEFAULT_LOGIN_PATH,
    DEFAULT_REST_PREFIX,
};

mod cli;

pub use cli::{
    CliArgs, Command, ConfigArgs, ConfigCommand, ConfigSetArgs, PurgeArgs, PurgeTarget,
    PurgeUrlArgs, SettingsOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "quire";

#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub root: PathBuf,
    pub engine_name: String,
    pub default_https: bool,
    pub admin_prefix: String,
    pub login_path: String,
    pub rest_prefix: String,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("QUIRE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &SettingsOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(root) = overrides.cache_root.as_ref() {
            self.cache.root = Some(root.clone());
        }
        if let Some(https) = overrides.default_https {
            self.cache.default_https = Some(https);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings { logging, cache } = raw;

        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;

        Ok(Self { logging, cache })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let root = cache
        .root
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_ROOT));
    if root.as_os_str().is_empty() {
        return Err(LoadError::invalid("cache.root", "path must not be empty"));
    }

    let engine_name = non_blank(cache.engine_name, DEFAULT_ENGINE_NAME);
    if engine_name.chars().any(char::is_control) {
        return Err(LoadError::invalid(
            "cache.engine_name",
            "must not contain control characters",
        ));
    }

    let admin_prefix = path_prefix(cache.admin_prefix, DEFAULT_ADMIN_PREFIX, "cache.admin_prefix")?;
    let login_path = path_prefix(cache.login_path, DEFAULT_LOGIN_PATH, "cache.login_path")?;
    let rest_prefix = path_prefix(cache.rest_prefix, DEFAULT_REST_PREFIX, "cache.rest_prefix")?;

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        root,
        engine_name,
        default_https: cache.default_https.unwrap_or(false),
        admin_prefix,
        login_path,
        rest_prefix,
    })
}

fn non_blank(value: Option<String>, default: &str) -> String {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn path_prefix(value: Option<String>, default: &str, key: &'static str) -> Result<String, LoadError> {
    let value = non_blank(value, default);
    if !value.starts_with('/') {
        return Err(LoadError::invalid(key, "must start with `/`"));
    }
    Ok(value)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    root: Option<PathBuf>,
    engine_name: Option<String>,
    default_https: Option<bool>,
    admin_prefix: Option<String>,
    login_path: Option<String>,
    rest_prefix: Option<String>,
}
