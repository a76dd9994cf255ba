//! Request validation
//!
//! For POST requests the presented token is read from the configured header
//! or, failing that, from the body parameters (url-encoded or multipart).
//! The validator takes ownership of the request so it can buffer the body,
//! and always hands back a request whose body is still readable downstream:
//! a rejection handler may inspect the posted data, it just must not trust
//! it.

use crate::config::CsrfConfig;
use crate::error::CsrfError;
use crate::session::Session;
use axum::body::Body;
use axum::http::{header, request::Parts, Method, Request};
use bytes::Bytes;
use std::sync::Arc;

/// Validation outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The request may proceed to the wrapped application.
    Accept,
    /// Missing or mismatched token; the blocked handler responds.
    Reject,
    /// No session on the request. A configuration error, never a silent
    /// pass-through.
    NoSession,
}

/// Per-layer request validator.
#[derive(Debug, Clone)]
pub struct Validator {
    config: Arc<CsrfConfig>,
}

impl Validator {
    /// Create a validator sharing the layer's configuration.
    #[must_use]
    pub fn new(config: Arc<CsrfConfig>) -> Self {
        Self { config }
    }

    /// Validate one request.
    ///
    /// Non-POST and whitelisted requests are accepted without a token check.
    /// On `Reject` the stored token is left untouched; on `Accept` with
    /// `onetime` enabled the stored token is deleted immediately, before the
    /// response is generated.
    ///
    /// # Errors
    ///
    /// Returns [`CsrfError::Body`] when the request body cannot be buffered.
    pub async fn validate(
        &self,
        request: Request<Body>,
        session: Option<&Session>,
    ) -> Result<(Outcome, Request<Body>), CsrfError> {
        let Some(session) = session else {
            return Ok((Outcome::NoSession, request));
        };

        if request.method() != Method::POST
            || self.config.whitelisted.is_whitelisted(&request)
        {
            return Ok((Outcome::Accept, request));
        }

        // A POST before any HTML response has issued a token cannot be
        // validated.
        let Some(stored) = session.get(&self.config.session_key).await else {
            return Ok((Outcome::Reject, request));
        };

        if let Some(presented) = header_token(&request, &self.config) {
            if constant_time_eq(presented.as_bytes(), stored.as_bytes()) {
                self.invalidate_if_onetime(session).await;
                return Ok((Outcome::Accept, request));
            }
        }

        let (parts, body) = request.into_parts();
        let bytes = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(|e| CsrfError::Body(e.to_string()))?;
        let presented = body_token(&parts, &bytes, &self.config.parameter_name).await;
        let request = Request::from_parts(parts, Body::from(bytes));

        match presented {
            Some(p) if constant_time_eq(p.as_bytes(), stored.as_bytes()) => {
                self.invalidate_if_onetime(session).await;
                Ok((Outcome::Accept, request))
            }
            _ => Ok((Outcome::Reject, request)),
        }
    }

    async fn invalidate_if_onetime(&self, session: &Session) {
        if self.config.onetime {
            session.remove(&self.config.session_key).await;
            tracing::debug!("onetime token invalidated after successful validation");
        }
    }
}

fn header_token(request: &Request<Body>, config: &CsrfConfig) -> Option<String> {
    request
        .headers()
        .get(&config.header_name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

/// Extract the configured parameter from a buffered request body, decoding
/// by Content-Type. Unsupported encodings yield `None`.
async fn body_token(parts: &Parts, bytes: &Bytes, parameter_name: &str) -> Option<String> {
    let content_type = parts.headers.get(header::CONTENT_TYPE)?.to_str().ok()?;

    if starts_with_ignore_case(content_type, "application/x-www-form-urlencoded") {
        serde_urlencoded::from_bytes::<Vec<(String, String)>>(bytes)
            .ok()?
            .into_iter()
            .find(|(name, _)| name == parameter_name)
            .map(|(_, value)| value)
    } else if starts_with_ignore_case(content_type, "multipart/form-data") {
        let boundary = multer::parse_boundary(content_type).ok()?;
        let chunk = bytes.clone();
        let stream =
            futures_util::stream::once(async move { Ok::<Bytes, std::io::Error>(chunk) });
        let mut multipart = multer::Multipart::new(stream, boundary);
        while let Ok(Some(field)) = multipart.next_field().await {
            if field.name() == Some(parameter_name) {
                return field.text().await.ok();
            }
        }
        None
    } else {
        None
    }
}

/// Exact equality in constant time; no normalization of either side.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len() && s.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}
