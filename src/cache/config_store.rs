//! Runtime cache options persisted under the cache root.
//!
//! Holds the purge interval and the exception URL list. Loaded at start,
//! kept in memory, and rewritten wholesale on save. Long-running readers call
//! [`ConfigStore::reload`] to pick up saves made by other processes. A save merges the changed
//! fields into the current options; fields the caller does not mention keep
//! their value.

use std::fmt;
use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use super::lock::{rw_read, rw_write};

pub const CONFIG_FILE: &str = "config.toml";

const SOURCE: &str = "cache::config_store";

/// How often the scheduled full purge runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurgeInterval {
    Hourly,
    TwiceDaily,
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl PurgeInterval {
    pub const ALL: [PurgeInterval; 5] = [
        PurgeInterval::Hourly,
        PurgeInterval::TwiceDaily,
        PurgeInterval::Daily,
        PurgeInterval::Weekly,
        PurgeInterval::Monthly,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PurgeInterval::Hourly => "hourly",
            PurgeInterval::TwiceDaily => "twicedaily",
            PurgeInterval::Daily => "daily",
            PurgeInterval::Weekly => "weekly",
            PurgeInterval::Monthly => "monthly",
        }
    }

    /// Six-field cron expression (seconds first) firing at this interval.
    pub fn cron_expression(self) -> &'static str {
        match self {
            PurgeInterval::Hourly => "0 0 * * * *",
            PurgeInterval::TwiceDaily => "0 0 0,12 * * *",
            PurgeInterval::Daily => "0 0 0 * * *",
            PurgeInterval::Weekly => "0 0 0 * * Sun",
            PurgeInterval::Monthly => "0 0 0 1 * *",
        }
    }
}

impl fmt::Display for PurgeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown purge interval `{0}` (expected hourly, twicedaily, daily, weekly or monthly)")]
pub struct ParseIntervalError(String);

impl FromStr for PurgeInterval {
    type Err = ParseIntervalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim().to_ascii_lowercase();
        PurgeInterval::ALL
            .into_iter()
            .find(|interval| interval.as_str() == wanted)
            .ok_or_else(|| ParseIntervalError(value.to_string()))
    }
}

/// Persisted runtime options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    pub purge_interval: PurgeInterval,
    /// Full URLs never served from or written to the cache. Exact match.
    pub exception_urls: Vec<String>,
}

/// Fields to change on save; `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct OptionsPatch {
    pub purge_interval: Option<PurgeInterval>,
    pub exception_urls: Option<Vec<String>>,
}

impl OptionsPatch {
    /// A patch that resets every field to its default.
    pub fn defaults() -> Self {
        let defaults = CacheOptions::default();
        Self {
            purge_interval: Some(defaults.purge_interval),
            exception_urls: Some(defaults.exception_urls),
        }
    }
}

impl CacheOptions {
    fn merged(&self, patch: OptionsPatch) -> Self {
        let exception_urls = match patch.exception_urls {
            Some(urls) => urls
                .into_iter()
                .map(|url| url.trim().to_string())
                .filter(|url| !url.is_empty())
                .collect(),
            None => self.exception_urls.clone(),
        };

        Self {
            purge_interval: patch.purge_interval.unwrap_or(self.purge_interval),
            exception_urls,
        }
    }
}

/// Outcome of reading the options file at start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Loaded,
    Missing,
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum ConfigStoreError {
    #[error("failed to serialize cache options: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("failed to write cache options to `{path}`: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to remove cache options file `{path}`: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// File-backed store for [`CacheOptions`].
pub struct ConfigStore {
    path: PathBuf,
    current: RwLock<CacheOptions>,
    state: RwLock<LoadState>,
}

impl ConfigStore {
    /// Load options from `path`. A missing or unreadable file leaves the
    /// defaults in place and is reported through [`ConfigStore::load_state`].
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (options, state) = read_options(&path);
        Self {
            path,
            current: RwLock::new(options),
            state: RwLock::new(state),
        }
    }

    /// Store seeded with `options`, as if loaded from `path`.
    pub fn with_options(path: impl Into<PathBuf>, options: CacheOptions) -> Self {
        Self {
            path: path.into(),
            current: RwLock::new(options),
            state: RwLock::new(LoadState::Loaded),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load_state(&self) -> LoadState {
        rw_read(&self.state, SOURCE, "load_state").clone()
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.load_state(), LoadState::Loaded)
    }

    pub fn options(&self) -> CacheOptions {
        rw_read(&self.current, SOURCE, "options").clone()
    }

    pub fn purge_interval(&self) -> PurgeInterval {
        rw_read(&self.current, SOURCE, "purge_interval").purge_interval
    }

    /// Exact string comparison against the exception list.
    pub fn is_exception(&self, url: &str) -> bool {
        rw_read(&self.current, SOURCE, "is_exception")
            .exception_urls
            .iter()
            .any(|candidate| candidate == url)
    }

    /// Merge `patch` into the current options and persist the result.
    ///
    /// The in-memory copy only changes once the file has been replaced.
    pub fn save(&self, patch: OptionsPatch) -> Result<CacheOptions, ConfigStoreError> {
        let merged = self.options().merged(patch);
        let text = toml::to_string(&merged)?;

        write_atomic(&self.path, text.as_bytes()).map_err(|source| ConfigStoreError::Write {
            path: self.path.clone(),
            source,
        })?;

        *rw_write(&self.current, SOURCE, "save") = merged.clone();
        *rw_write(&self.state, SOURCE, "save.state") = LoadState::Loaded;

        info!(
            target = "quire::cache::config_store",
            path = %self.path.display(),
            purge_interval = %merged.purge_interval,
            exception_urls = merged.exception_urls.len(),
            "Cache options saved"
        );

        Ok(merged)
    }

    /// Re-read the options file, picking up saves made by another process.
    ///
    /// A missing file means defaults. A corrupt or unreadable file keeps the
    /// options already in memory.
    pub fn reload(&self) -> LoadState {
        let (options, state) = read_options(&self.path);
        if !matches!(state, LoadState::Invalid(_)) {
            *rw_write(&self.current, SOURCE, "reload") = options;
        }
        *rw_write(&self.state, SOURCE, "reload.state") = state.clone();
        state
    }

    /// Write the default options file.
    pub fn create(&self) -> Result<CacheOptions, ConfigStoreError> {
        self.save(OptionsPatch::defaults())
    }

    /// Remove the options file. A missing file is not an error.
    pub fn delete(&self) -> Result<(), ConfigStoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(source) => {
                return Err(ConfigStoreError::Remove {
                    path: self.path.clone(),
                    source,
                });
            }
        }
        *rw_write(&self.state, SOURCE, "delete") = LoadState::Missing;
        Ok(())
    }
}

fn read_options(path: &Path) -> (CacheOptions, LoadState) {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return (CacheOptions::default(), LoadState::Missing);
        }
        Err(err) => {
            warn!(
                target = "quire::cache::config_store",
                path = %path.display(),
                error = %err,
                "Failed to read cache options; using defaults"
            );
            return (CacheOptions::default(), LoadState::Invalid(err.to_string()));
        }
    };

    match toml::from_str::<CacheOptions>(&text) {
        Ok(options) => (options, LoadState::Loaded),
        Err(err) => {
            warn!(
                target = "quire::cache::config_store",
                path = %path.display(),
                error = %err,
                "Cache options file is corrupt; using defaults"
            );
            (CacheOptions::default(), LoadState::Invalid(err.to_string()))
        }
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut file = tempfile::Builder::new()
        .prefix(".config-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    file.write_all(contents)?;
    file.flush()?;
    file.persist(path).map_err(|err| err.error)?;
    Ok(())
}
