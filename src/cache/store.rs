//! Artifact storage on the local filesystem.
//!
//! One file per cached page, at `<root>/<host>/<segments>/_index.html`. The
//! file's existence is the hit signal; there is no side index or metadata
//! file. Writes go through a temp file in the target directory and a rename,
//! so a concurrent reader sees either the previous artifact or the new one.

use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use metrics::counter;
use thiserror::Error;
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::warn;
use walkdir::WalkDir;

use super::keys::{ARTIFACT_FILE, CacheKey};

const METRIC_PURGE_DELETED: &str = "quire_page_cache_purge_deleted_total";
const METRIC_PURGE_FAILED: &str = "quire_page_cache_purge_failed_total";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("artifact path `{0}` has no parent directory")]
    NoParent(PathBuf),
    #[error("failed to create cache directory `{path}`: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write artifact `{path}`: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read artifact `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Aggregate result of deleting a set of artifacts.
///
/// Missing files count as already deleted. Success means every deletion that
/// was attempted on an existing file went through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub deleted: usize,
    pub missing: usize,
    pub failed: Vec<PathBuf>,
    /// The purge target could not be mapped to a cache path at all.
    pub unresolved: bool,
}

impl PurgeReport {
    pub fn unresolved() -> Self {
        Self {
            unresolved: true,
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !self.unresolved
    }

    pub fn merge(&mut self, other: PurgeReport) {
        self.deleted += other.deleted;
        self.missing += other.missing;
        self.failed.extend(other.failed);
        self.unresolved |= other.unresolved;
    }
}

/// Filesystem-backed artifact store rooted at the cache directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    engine_name: String,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>, engine_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            engine_name: engine_name.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn engine_name(&self) -> &str {
        &self.engine_name
    }

    /// Absolute directory of a key.
    pub fn key_dir(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.relative_dir())
    }

    /// Absolute artifact path of a key.
    pub fn artifact_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.relative_artifact())
    }

    /// Store `body` followed by the generated trailer comment.
    ///
    /// Intermediate directories are created as needed. The artifact is
    /// replaced atomically; concurrent writers for one path race and the last
    /// rename wins.
    pub fn write(&self, path: &Path, body: &[u8]) -> Result<(), StoreError> {
        let dir = path
            .parent()
            .ok_or_else(|| StoreError::NoParent(path.to_path_buf()))?;

        fs::create_dir_all(dir).map_err(|source| StoreError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;

        let write_err = |source: io::Error| StoreError::Write {
            path: path.to_path_buf(),
            source,
        };

        let mut file = tempfile::Builder::new()
            .prefix(".quire-")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(write_err)?;

        file.write_all(body).map_err(write_err)?;
        file.write_all(trailer(&self.engine_name, OffsetDateTime::now_utc()).as_bytes())
            .map_err(write_err)?;
        file.flush().map_err(write_err)?;

        // Temp files are created private; artifacts may be served directly by
        // the web server.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.as_file()
                .set_permissions(fs::Permissions::from_mode(0o644))
                .map_err(write_err)?;
        }

        file.persist(path).map_err(|err| write_err(err.error))?;
        Ok(())
    }

    /// Read an artifact. `Ok(None)` is a plain miss.
    pub fn read(&self, path: &Path) -> Result<Option<Bytes>, StoreError> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Delete every listed path, continuing past failures.
    pub fn delete_many<I>(&self, paths: I) -> PurgeReport
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let mut report = PurgeReport::default();

        for path in paths {
            match fs::remove_file(&path) {
                Ok(()) => report.deleted += 1,
                Err(err) if err.kind() == ErrorKind::NotFound => report.missing += 1,
                Err(err) => {
                    warn!(
                        target = "quire::cache::store",
                        op = "delete_many",
                        result = "error",
                        path = %path.display(),
                        error = %err,
                        "Failed to delete cached artifact"
                    );
                    report.failed.push(path);
                }
            }
        }

        counter!(METRIC_PURGE_DELETED).increment(report.deleted as u64);
        counter!(METRIC_PURGE_FAILED).increment(report.failed.len() as u64);

        report
    }

    /// Enumerate artifact files at `dir` and in its subdirectories.
    ///
    /// `max_depth` bounds how many directory levels below `dir` are visited;
    /// `None` walks the whole subtree. A missing directory yields nothing.
    pub fn list_artifacts(&self, dir: &Path, max_depth: Option<usize>) -> Vec<PathBuf> {
        if !dir.is_dir() {
            return Vec::new();
        }

        let mut walker = WalkDir::new(dir).min_depth(1);
        if let Some(depth) = max_depth {
            // The artifact sits one level below its own directory.
            walker = walker.max_depth(depth.saturating_add(1));
        }

        walker
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!(
                        target = "quire::cache::store",
                        op = "list_artifacts",
                        result = "skipped",
                        error = %err,
                        "Skipping unreadable cache entry"
                    );
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && entry.file_name() == ARTIFACT_FILE)
            .map(|entry| entry.into_path())
            .collect()
    }
}

/// Trailer appended to every stored page.
pub fn trailer(engine_name: &str, at: OffsetDateTime) -> String {
    let format = format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second]"
    );
    let stamp = at
        .format(&format)
        .unwrap_or_else(|_| at.unix_timestamp().to_string());
    format!("\n<!-- Cache served by {engine_name}, last modified: {stamp} GMT -->\n")
}
