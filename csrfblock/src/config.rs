//! Middleware configuration
//!
//! One immutable [`CsrfConfig`] per layer instance, built once and shared
//! across requests via `Arc`. There is no global configuration: the config is
//! passed into the validator and each per-response rewriter explicitly.

use crate::error::CsrfError;
use crate::token::MAX_TOKEN_LENGTH;
use async_trait::async_trait;
use axum::body::Body;
use axum::response::{IntoResponse, Response};
use http::{header, HeaderName, HeaderValue, Request, StatusCode};
use std::fmt;
use std::sync::Arc;

/// Default form parameter carrying the token.
pub const DEFAULT_PARAMETER_NAME: &str = "SEC";

/// Default request header carrying the token.
pub const DEFAULT_HEADER_NAME: HeaderName = HeaderName::from_static("x-csrf-token");

/// Default session key the token is stored under.
pub const DEFAULT_SESSION_KEY: &str = "csrfblock.token";

/// Default `name` attribute of the injected meta tag.
pub const DEFAULT_META_NAME: &str = "csrftoken";

/// Default token length in hex characters.
pub const DEFAULT_TOKEN_LENGTH: usize = 16;

/// Body of the default rejection response.
pub const BLOCKED_BODY: &str = "CSRF detected";

/// Predicate deciding whether a request bypasses token validation.
///
/// Whitelisted requests are accepted without a token check, so the predicate
/// should match only endpoints that carry their own request authentication
/// (signed webhooks and the like). Any `Fn(&Request<Body>) -> bool` closure
/// works:
///
/// ```rust
/// use axum::{body::Body, http::Request};
/// use csrfblock::CsrfConfig;
///
/// let config = CsrfConfig::default()
///     .with_whitelist(|request: &Request<Body>| request.uri().path() == "/webhook");
/// ```
pub trait Whitelist: Send + Sync {
    /// Return `true` to skip token validation for this request.
    fn is_whitelisted(&self, request: &Request<Body>) -> bool;
}

impl<F> Whitelist for F
where
    F: Fn(&Request<Body>) -> bool + Send + Sync,
{
    fn is_whitelisted(&self, request: &Request<Body>) -> bool {
        self(request)
    }
}

/// The default whitelist: nothing is whitelisted.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoWhitelist;

impl Whitelist for NoWhitelist {
    fn is_whitelisted(&self, _request: &Request<Body>) -> bool {
        false
    }
}

/// Handler invoked when a request is rejected.
///
/// The handler receives the rejected request with a re-readable body, so it
/// may inspect the posted data while building its response. It must not
/// trust that data: the request failed CSRF validation.
#[async_trait]
pub trait BlockedHandler: Send + Sync {
    /// Build the response returned to the client instead of running the
    /// wrapped application.
    async fn handle(&self, request: Request<Body>) -> Response;
}

/// The default rejection response: `403`, `text/plain`, `"CSRF detected"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultBlocked;

#[async_trait]
impl BlockedHandler for DefaultBlocked {
    async fn handle(&self, _request: Request<Body>) -> Response {
        (
            StatusCode::FORBIDDEN,
            [
                (header::CONTENT_TYPE, HeaderValue::from_static("text/plain")),
                (header::CONTENT_LENGTH, HeaderValue::from(BLOCKED_BODY.len())),
            ],
            BLOCKED_BODY,
        )
            .into_response()
    }
}

/// CSRF middleware configuration
///
/// # Example
///
/// ```rust
/// use csrfblock::CsrfConfig;
///
/// let config = CsrfConfig::default()
///     .with_token_length(24)
///     .with_meta("csrftoken")
///     .with_onetime(true);
/// ```
#[derive(Clone)]
pub struct CsrfConfig {
    pub(crate) parameter_name: String,
    pub(crate) header_name: HeaderName,
    pub(crate) token_length: usize,
    pub(crate) session_key: String,
    pub(crate) add_meta: bool,
    pub(crate) meta_name: String,
    pub(crate) onetime: bool,
    pub(crate) blocked: Arc<dyn BlockedHandler>,
    pub(crate) whitelisted: Arc<dyn Whitelist>,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            parameter_name: DEFAULT_PARAMETER_NAME.to_string(),
            header_name: DEFAULT_HEADER_NAME,
            token_length: DEFAULT_TOKEN_LENGTH,
            session_key: DEFAULT_SESSION_KEY.to_string(),
            add_meta: false,
            meta_name: DEFAULT_META_NAME.to_string(),
            onetime: false,
            blocked: Arc::new(DefaultBlocked),
            whitelisted: Arc::new(NoWhitelist),
        }
    }
}

impl CsrfConfig {
    /// Create a configuration with the documented defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the form parameter name carrying the token (default `SEC`).
    #[must_use]
    pub fn with_parameter_name(mut self, name: impl Into<String>) -> Self {
        self.parameter_name = name.into();
        self
    }

    /// Set the request header carrying the token (default `X-CSRF-Token`).
    ///
    /// The name is normalized: lookups are case-insensitive and underscores
    /// are accepted in place of hyphens, so `X_CSRF_TOKEN` and `x-csrf-token`
    /// configure the same header.
    ///
    /// # Errors
    ///
    /// Returns [`CsrfError::Config`] when the normalized name is not a legal
    /// HTTP field name.
    pub fn with_header_name(mut self, name: &str) -> Result<Self, CsrfError> {
        let normalized = name.to_ascii_lowercase().replace('_', "-");
        self.header_name = HeaderName::try_from(normalized.as_str())
            .map_err(|e| CsrfError::Config(format!("invalid header name {name:?}: {e}")))?;
        Ok(self)
    }

    /// Set the token length in hex characters (default 16).
    ///
    /// Clamped to `1..=40`; 40 is the full SHA1 hex digest and the hard
    /// upper bound.
    #[must_use]
    pub fn with_token_length(mut self, length: usize) -> Self {
        if length > MAX_TOKEN_LENGTH {
            tracing::warn!(
                requested = length,
                max = MAX_TOKEN_LENGTH,
                "token length clamped"
            );
        }
        self.token_length = length.clamp(1, MAX_TOKEN_LENGTH);
        self
    }

    /// Set the session key the token is stored under (default
    /// `csrfblock.token`).
    #[must_use]
    pub fn with_session_key(mut self, key: impl Into<String>) -> Self {
        self.session_key = key.into();
        self
    }

    /// Enable meta-tag injection after `<head>` with the given `name`
    /// attribute (disabled by default).
    #[must_use]
    pub fn with_meta(mut self, meta_name: impl Into<String>) -> Self {
        self.add_meta = true;
        self.meta_name = meta_name.into();
        self
    }

    /// Enable or disable single-use tokens (disabled by default).
    ///
    /// With `onetime` enabled the stored token is deleted immediately after
    /// one successful validation and a fresh token is issued on the next
    /// HTML response.
    #[must_use]
    pub fn with_onetime(mut self, onetime: bool) -> Self {
        self.onetime = onetime;
        self
    }

    /// Replace the rejection handler (default: 403 `"CSRF detected"`).
    #[must_use]
    pub fn with_blocked(mut self, blocked: impl BlockedHandler + 'static) -> Self {
        self.blocked = Arc::new(blocked);
        self
    }

    /// Replace the whitelist predicate (default: nothing whitelisted).
    #[must_use]
    pub fn with_whitelist(mut self, whitelisted: impl Whitelist + 'static) -> Self {
        self.whitelisted = Arc::new(whitelisted);
        self
    }

    /// The configured form parameter name.
    #[must_use]
    pub fn parameter_name(&self) -> &str {
        &self.parameter_name
    }

    /// The configured token header.
    #[must_use]
    pub fn header_name(&self) -> &HeaderName {
        &self.header_name
    }

    /// The configured token length.
    #[must_use]
    pub fn token_length(&self) -> usize {
        self.token_length
    }

    /// The configured session key.
    #[must_use]
    pub fn session_key(&self) -> &str {
        &self.session_key
    }
}

impl fmt::Debug for CsrfConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsrfConfig")
            .field("parameter_name", &self.parameter_name)
            .field("header_name", &self.header_name)
            .field("token_length", &self.token_length)
            .field("session_key", &self.session_key)
            .field("add_meta", &self.add_meta)
            .field("meta_name", &self.meta_name)
            .field("onetime", &self.onetime)
            .field("blocked", &"dyn BlockedHandler")
            .field("whitelisted", &"dyn Whitelist")
            .finish()
    }
}
