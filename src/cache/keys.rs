//! Cache key definitions and URL ↔ artifact path mapping.
//!
//! A page is keyed by `(host, path)`. The key maps to a directory
//! `<host>/<segment>/<segment>` below the cache root; the artifact itself is a
//! fixed file name inside that directory.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use url::{Host, Url};

/// File name of the stored page inside each key directory.
pub const ARTIFACT_FILE: &str = "_index.html";

/// Identifies one cacheable page.
///
/// Query string and fragment never take part in the key. Empty path segments
/// are dropped, so `/a/b`, `/a/b/` and `//a//b` share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    host: String,
    segments: Vec<String>,
}

impl CacheKey {
    /// Build a key from a host (a `Host` header value is fine, the port is
    /// dropped) and a URL path.
    ///
    /// Returns `None` when the host is not a valid URL host or the path cannot
    /// be mapped to a directory without escaping the cache root.
    pub fn new(host: &str, path: &str) -> Option<Self> {
        let host = normalize_host(host)?;

        let mut segments = Vec::new();
        for segment in path.split('/').filter(|segment| !segment.is_empty()) {
            if !is_safe_segment(segment) {
                return None;
            }
            segments.push(segment.to_string());
        }

        Some(Self { host, segments })
    }

    /// Build a key from a full URL. `None` when the URL has no host.
    pub fn from_url(url: &str) -> Option<Self> {
        let parsed = Url::parse(url).ok()?;
        let host = parsed.host_str()?;
        Self::new(host, parsed.path())
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Directory of this key, relative to the cache root.
    pub fn relative_dir(&self) -> PathBuf {
        let mut dir = PathBuf::from(&self.host);
        for segment in &self.segments {
            dir.push(segment);
        }
        dir
    }

    /// Artifact location, relative to the cache root.
    pub fn relative_artifact(&self) -> PathBuf {
        self.relative_dir().join(ARTIFACT_FILE)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.host)?;
        f.write_str("/")?;
        for segment in &self.segments {
            f.write_str(segment)?;
            f.write_str("/")?;
        }
        Ok(())
    }
}

// ============================================================================
// Path mapping
// ============================================================================

/// Map a URL to its key directory, relative to the cache root.
pub fn url_to_path(url: &str) -> Option<PathBuf> {
    CacheKey::from_url(url).map(|key| key.relative_dir())
}

/// Same construction as [`url_to_path`], sourced from a request's `Host`
/// header and request target. Anything after `?` is ignored.
pub fn request_path(host: Option<&str>, target: &str) -> Option<PathBuf> {
    request_key(host, target).map(|key| key.relative_dir())
}

pub(crate) fn request_key(host: Option<&str>, target: &str) -> Option<CacheKey> {
    let host = host?;
    let path = target.split(['?', '#']).next().unwrap_or_default();
    CacheKey::new(host, path)
}

/// Map an artifact path back to the URL it was stored for.
///
/// For display only: the scheme is whatever the caller says the current
/// connection uses, not what the page was originally served over.
pub fn path_to_url(root: &Path, artifact: &Path, https: bool) -> Option<String> {
    let relative = artifact.strip_prefix(root).ok()?;
    let dir = if relative.file_name().is_some_and(|name| name == ARTIFACT_FILE) {
        relative.parent()?
    } else {
        relative
    };

    let mut parts = Vec::new();
    for component in dir.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }

    let scheme = if https { "https" } else { "http" };
    Some(format!("{scheme}://{}/", parts.join("/")))
}

fn normalize_host(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let host = if let Some(rest) = raw.strip_prefix('[') {
        // IPv6 literal, keep the brackets and drop any port after them.
        let end = rest.find(']')?;
        &raw[..end + 2]
    } else {
        raw.split(':').next().unwrap_or_default()
    };

    let host = host.trim_end_matches('.');
    if host.is_empty() {
        return None;
    }

    // The host becomes one directory name, so anything that is not a valid
    // URL host (separators, userinfo, percent escapes) is unkeyable.
    let host = Host::parse(host).ok()?.to_string();
    is_safe_segment(&host).then_some(host)
}

fn is_safe_segment(segment: &str) -> bool {
    segment != "." && segment != ".." && !segment.contains(['\\', '\0'])
}
