//! Request cacheability decision.
//!
//! A request is eligible to be served from, or written to, the cache only
//! when every rule passes. Rules run in a fixed order and the first failure is
//! reported as a [`MissReason`], which the HTTP layer echoes in a diagnostic
//! header.

use std::fmt;
use std::sync::Arc;

use axum::http::{HeaderMap, Method, Request, header};
use metrics::counter;
use tracing::debug;

use super::config::CacheConfig;
use super::config_store::ConfigStore;
use super::hooks::CacheHooks;
use super::keys::{CacheKey, request_key};

const METRIC_MISS: &str = "quire_page_cache_miss_total";

/// Cookie name fragments that mark a personalised response.
pub const SESSION_COOKIE_MARKERS: [&str; 4] = [
    "comment_author",
    "wp-postpass",
    "wordpress_logged_in",
    "wptouch_switch_toggle",
];

/// Literal that, anywhere in a rendered body, keeps it out of the cache.
pub const DO_NOT_CACHE_MARKER: &str = "DONOTCACHEPAGE";

/// Why a request was not served from or stored in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MissReason {
    MethodNotGet,
    QueryString,
    DoNotCache,
    Installing,
    Ajax,
    Cron,
    Admin,
    PartialBootstrap,
    PublishingProtocol,
    XmlRpc,
    RestFlag,
    CommandLine,
    Session,
    SessionCookie,
    PasswordProtected,
    CacheableOverride,
    LoginPage,
    Vetoed,
    ExceptionUrl,
    NotFound,
    RestRoute,
    Feed,
    // Capture-stage and keying rejections.
    Unkeyable,
    NotHtml,
    DoNotCacheMarker,
    StatusNotOk,
    BodyTooLarge,
    UnsizedBody,
}

impl MissReason {
    /// Stable label for metrics and logs.
    pub fn code(self) -> &'static str {
        match self {
            MissReason::MethodNotGet => "method_not_get",
            MissReason::QueryString => "query_string",
            MissReason::DoNotCache => "do_not_cache",
            MissReason::Installing => "installing",
            MissReason::Ajax => "ajax",
            MissReason::Cron => "cron",
            MissReason::Admin => "admin",
            MissReason::PartialBootstrap => "partial_bootstrap",
            MissReason::PublishingProtocol => "publishing_protocol",
            MissReason::XmlRpc => "xmlrpc",
            MissReason::RestFlag => "rest_flag",
            MissReason::CommandLine => "command_line",
            MissReason::Session => "session",
            MissReason::SessionCookie => "session_cookie",
            MissReason::PasswordProtected => "password_protected",
            MissReason::CacheableOverride => "cacheable_override",
            MissReason::LoginPage => "login_page",
            MissReason::Vetoed => "vetoed",
            MissReason::ExceptionUrl => "exception_url",
            MissReason::NotFound => "not_found",
            MissReason::RestRoute => "rest_route",
            MissReason::Feed => "feed",
            MissReason::Unkeyable => "unkeyable",
            MissReason::NotHtml => "not_html",
            MissReason::DoNotCacheMarker => "do_not_cache_marker",
            MissReason::StatusNotOk => "status_not_ok",
            MissReason::BodyTooLarge => "body_too_large",
            MissReason::UnsizedBody => "unsized_body",
        }
    }

    /// Human-readable text for the diagnostic header.
    pub fn description(self) -> &'static str {
        match self {
            MissReason::MethodNotGet => "request method not GET",
            MissReason::QueryString => "query string not empty",
            MissReason::DoNotCache => "do-not-cache flag set",
            MissReason::Installing => "installation in progress",
            MissReason::Ajax => "background ajax request",
            MissReason::Cron => "scheduled task request",
            MissReason::Admin => "administrative area",
            MissReason::PartialBootstrap => "partial bootstrap request",
            MissReason::PublishingProtocol => "publishing protocol request",
            MissReason::XmlRpc => "xml-rpc request",
            MissReason::RestFlag => "rest api request",
            MissReason::CommandLine => "command line context",
            MissReason::Session => "session active",
            MissReason::SessionCookie => "request has rejected cookies",
            MissReason::PasswordProtected => "content is password protected",
            MissReason::CacheableOverride => "cacheable override is false",
            MissReason::LoginPage => "login page not cacheable",
            MissReason::Vetoed => "cacheable hook returned false",
            MissReason::ExceptionUrl => "url is in exception list",
            MissReason::NotFound => "404 page not found",
            MissReason::RestRoute => "rest route",
            MissReason::Feed => "feed request",
            MissReason::Unkeyable => "url cannot be mapped to a cache path",
            MissReason::NotHtml => "response not html",
            MissReason::DoNotCacheMarker => "response contains DONOTCACHEPAGE string",
            MissReason::StatusNotOk => "response status not 200",
            MissReason::BodyTooLarge => "response too large to capture",
            MissReason::UnsizedBody => "response length unknown",
        }
    }
}

impl fmt::Display for MissReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Environment signals for the current render.
///
/// Hosts put a value into request extensions before the cache layer runs and
/// may add another to response extensions for signals raised while rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeFlags {
    pub do_not_cache: bool,
    pub installing: bool,
    pub ajax: bool,
    pub cron: bool,
    pub admin: bool,
    pub partial_bootstrap: bool,
    pub publishing_protocol: bool,
    pub xmlrpc: bool,
    pub rest_request: bool,
    pub command_line: bool,
    pub session_id: Option<String>,
    pub password_protected: bool,
    /// An explicit `Some(false)` rejects; `None` and `Some(true)` do not.
    pub cacheable: Option<bool>,
    pub login_page: bool,
    pub not_found: bool,
    pub feed: bool,
}

impl RuntimeFlags {
    /// Combine signals; any raised flag stays raised.
    pub fn merge(&mut self, other: &RuntimeFlags) {
        self.do_not_cache |= other.do_not_cache;
        self.installing |= other.installing;
        self.ajax |= other.ajax;
        self.cron |= other.cron;
        self.admin |= other.admin;
        self.partial_bootstrap |= other.partial_bootstrap;
        self.publishing_protocol |= other.publishing_protocol;
        self.xmlrpc |= other.xmlrpc;
        self.rest_request |= other.rest_request;
        self.command_line |= other.command_line;
        if other.session_id.is_some() {
            self.session_id = other.session_id.clone();
        }
        self.password_protected |= other.password_protected;
        self.cacheable = match (self.cacheable, other.cacheable) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (current, next) => next.or(current),
        };
        self.login_page |= other.login_page;
        self.not_found |= other.not_found;
        self.feed |= other.feed;
    }
}

/// Request metadata the rules look at.
#[derive(Debug, Clone)]
pub struct RequestFacts {
    pub method: Method,
    /// Raw `Host` value, port included.
    pub host: Option<String>,
    pub path: String,
    pub query: String,
    pub cookie_names: Vec<String>,
    pub https: bool,
}

impl RequestFacts {
    pub fn from_request<B>(request: &Request<B>, default_https: bool) -> Self {
        let uri = request.uri();
        let headers = request.headers();

        let host = headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .or_else(|| {
                uri.authority().map(|authority| match authority.port_u16() {
                    Some(port) => format!("{}:{port}", authority.host()),
                    None => authority.host().to_string(),
                })
            });

        let https = match uri.scheme_str() {
            Some(scheme) => scheme.eq_ignore_ascii_case("https"),
            None => forwarded_proto(headers).unwrap_or(default_https),
        };

        Self {
            method: request.method().clone(),
            host,
            path: uri.path().to_string(),
            query: uri.query().unwrap_or_default().to_string(),
            cookie_names: cookie_names(headers),
            https,
        }
    }

    /// Full URL as the client asked for it.
    pub fn url(&self) -> Option<String> {
        let host = self.host.as_deref().filter(|host| !host.is_empty())?;
        let scheme = if self.https { "https" } else { "http" };
        if self.query.is_empty() {
            Some(format!("{scheme}://{host}{}", self.path))
        } else {
            Some(format!("{scheme}://{host}{}?{}", self.path, self.query))
        }
    }

    /// Cache key for this request, if it can be keyed.
    pub fn key(&self) -> Option<CacheKey> {
        request_key(self.host.as_deref(), &self.path)
    }

    fn has_session_cookie(&self) -> bool {
        self.cookie_names.iter().any(|name| {
            let name = name.to_ascii_lowercase();
            SESSION_COOKIE_MARKERS
                .iter()
                .any(|marker| name.contains(marker))
        })
    }
}

fn forwarded_proto(headers: &HeaderMap) -> Option<bool> {
    let value = headers.get("x-forwarded-proto")?.to_str().ok()?;
    let first = value.split(',').next()?.trim();
    Some(first.eq_ignore_ascii_case("https"))
}

fn cookie_names(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| {
            let name = pair.split('=').next()?.trim();
            (!name.is_empty()).then(|| name.to_string())
        })
        .collect()
}

/// Evaluates the cacheability rules.
pub struct Classifier {
    admin_prefix: String,
    login_path: String,
    rest_prefix: String,
    options: Arc<ConfigStore>,
    hooks: Arc<dyn CacheHooks>,
}

impl Classifier {
    pub fn new(config: &CacheConfig, options: Arc<ConfigStore>, hooks: Arc<dyn CacheHooks>) -> Self {
        Self {
            admin_prefix: config.admin_prefix.clone(),
            login_path: config.login_path.clone(),
            rest_prefix: config.rest_prefix.clone(),
            options,
            hooks,
        }
    }

    pub fn is_cacheable(&self, facts: &RequestFacts, flags: &RuntimeFlags) -> bool {
        self.check(facts, flags).is_ok()
    }

    /// Run every rule; the first one that fails is returned and recorded.
    pub fn check(&self, facts: &RequestFacts, flags: &RuntimeFlags) -> Result<(), MissReason> {
        let verdict = self.evaluate(facts, flags);
        if let Err(reason) = verdict {
            record_miss(reason, &facts.path);
        }
        verdict
    }

    fn evaluate(&self, facts: &RequestFacts, flags: &RuntimeFlags) -> Result<(), MissReason> {
        reject_if(facts.method != Method::GET, MissReason::MethodNotGet)?;
        reject_if(!facts.query.is_empty(), MissReason::QueryString)?;
        reject_if(flags.do_not_cache, MissReason::DoNotCache)?;
        reject_if(flags.installing, MissReason::Installing)?;
        reject_if(flags.ajax, MissReason::Ajax)?;
        reject_if(flags.cron, MissReason::Cron)?;
        reject_if(
            flags.admin || under_prefix(&facts.path, &self.admin_prefix),
            MissReason::Admin,
        )?;
        reject_if(flags.partial_bootstrap, MissReason::PartialBootstrap)?;
        reject_if(flags.publishing_protocol, MissReason::PublishingProtocol)?;
        reject_if(flags.xmlrpc, MissReason::XmlRpc)?;
        reject_if(flags.rest_request, MissReason::RestFlag)?;
        reject_if(flags.command_line, MissReason::CommandLine)?;
        reject_if(
            flags.session_id.as_deref().is_some_and(|sid| !sid.is_empty()),
            MissReason::Session,
        )?;
        reject_if(facts.has_session_cookie(), MissReason::SessionCookie)?;
        reject_if(flags.password_protected, MissReason::PasswordProtected)?;
        reject_if(flags.cacheable == Some(false), MissReason::CacheableOverride)?;
        reject_if(
            flags.login_page || same_path(&facts.path, &self.login_path),
            MissReason::LoginPage,
        )?;

        if let Some(url) = facts.url() {
            reject_if(!self.hooks.allow_caching(&url), MissReason::Vetoed)?;
            reject_if(self.options.is_exception(&url), MissReason::ExceptionUrl)?;
        }

        reject_if(flags.not_found, MissReason::NotFound)?;
        // Kept apart from the host's REST flag; the two signals can disagree.
        reject_if(under_prefix(&facts.path, &self.rest_prefix), MissReason::RestRoute)?;
        reject_if(flags.feed, MissReason::Feed)?;

        Ok(())
    }
}

pub(crate) fn record_miss(reason: MissReason, path: &str) {
    debug!(
        target = "quire::cache::classifier",
        reason = reason.code(),
        path,
        "page cache bypassed"
    );
    counter!(METRIC_MISS, "reason" => reason.code()).increment(1);
}

fn reject_if(condition: bool, reason: MissReason) -> Result<(), MissReason> {
    if condition { Err(reason) } else { Ok(()) }
}

fn under_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return false;
    }
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn same_path(path: &str, target: &str) -> bool {
    let target = target.trim_end_matches('/');
    !target.is_empty() && path.trim_end_matches('/') == target
}
