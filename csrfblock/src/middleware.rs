//! Middleware orchestrator
//!
//! [`CsrfLayer`] wires the validator and the rewriter into the
//! request/response lifecycle: validation runs before the wrapped service,
//! and HTML response bodies are streamed through a fresh
//! [`HtmlRewriter`](crate::rewrite::HtmlRewriter) chunk by chunk — the
//! document is never buffered in full.
//!
//! The host's session layer must run before this one; it provides the
//! [`Session`] handle via request extensions.

use crate::config::CsrfConfig;
use crate::error::CsrfError;
use crate::rewrite::HtmlRewriter;
use crate::session::Session;
use crate::token::generate_token;
use crate::validate::{Outcome, Validator};
use axum::body::{Body, BodyDataStream};
use axum::http::{header, Request, Response};
use axum::response::IntoResponse;
use bytes::Bytes;
use futures_util::Stream;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// CSRF protection layer.
///
/// # Example
///
/// ```rust,no_run
/// use axum::{routing::get, Router};
/// use csrfblock::{CsrfConfig, CsrfLayer};
///
/// let app: Router = Router::new()
///     .route("/", get(|| async { axum::response::Html("<form method=\"post\"></form>") }))
///     .layer(CsrfLayer::new(CsrfConfig::default()));
/// // A session layer must be applied outside the CsrfLayer.
/// ```
#[derive(Debug, Clone)]
pub struct CsrfLayer {
    config: Arc<CsrfConfig>,
}

impl CsrfLayer {
    /// Create a layer from a configuration.
    #[must_use]
    pub fn new(config: CsrfConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl Default for CsrfLayer {
    fn default() -> Self {
        Self::new(CsrfConfig::default())
    }
}

impl<S> Layer<S> for CsrfLayer {
    type Service = CsrfService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CsrfService {
            inner,
            config: self.config.clone(),
        }
    }
}

/// Service produced by [`CsrfLayer`].
#[derive(Debug, Clone)]
pub struct CsrfService<S> {
    inner: S,
    config: Arc<CsrfConfig>,
}

impl<S> Service<Request<Body>> for CsrfService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let config = self.config.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let host = request_host(&request);
            let session = request.extensions().get::<Session>().cloned();

            let validator = Validator::new(config.clone());
            let (outcome, request) = match validator.validate(request, session.as_ref()).await {
                Ok(validated) => validated,
                Err(error) => {
                    tracing::warn!(%error, "could not buffer request body for token validation");
                    return Ok(error.into_response());
                }
            };

            match outcome {
                Outcome::NoSession => {
                    tracing::error!(
                        "no session on request; a session layer must run before CsrfLayer"
                    );
                    return Ok(CsrfError::MissingSession.into_response());
                }
                Outcome::Reject => {
                    tracing::warn!(
                        method = %request.method(),
                        path = %request.uri().path(),
                        "request rejected: missing or mismatched token"
                    );
                    return Ok(config.blocked.handle(request).await);
                }
                Outcome::Accept => {}
            }

            let response = inner.call(request).await?;

            // NoSession short-circuited above, so a session is present here.
            let Some(session) = session else {
                return Ok(response);
            };
            if !is_html(&response) {
                return Ok(response);
            }

            // Lazy issuance: the token is created on the first HTML response
            // for a session (or re-created after a onetime invalidation).
            let token = match session.get(&config.session_key).await {
                Some(token) => token,
                None => {
                    let token = generate_token(config.token_length);
                    session.set(&config.session_key, token.clone()).await;
                    token
                }
            };

            let meta_name = config.add_meta.then(|| config.meta_name.clone());
            let rewriter = HtmlRewriter::new(
                token,
                config.parameter_name.clone(),
                meta_name,
                host,
            );

            let (mut parts, body) = response.into_parts();
            // Injection changes the body length.
            parts.headers.remove(header::CONTENT_LENGTH);
            let stream = RewriteStream::new(body.into_data_stream(), rewriter);
            Ok(Response::from_parts(parts, Body::from_stream(stream)))
        })
    }
}

/// Response body stream feeding each data frame through the rewriter and
/// flushing it at end-of-stream.
struct RewriteStream {
    inner: BodyDataStream,
    rewriter: HtmlRewriter,
    queue: VecDeque<Bytes>,
    inner_done: bool,
}

impl RewriteStream {
    fn new(inner: BodyDataStream, rewriter: HtmlRewriter) -> Self {
        Self {
            inner,
            rewriter,
            queue: VecDeque::new(),
            inner_done: false,
        }
    }
}

impl Stream for RewriteStream {
    type Item = Result<Bytes, axum::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(fragment) = this.queue.pop_front() {
                return Poll::Ready(Some(Ok(fragment)));
            }
            if this.inner_done {
                return Poll::Ready(None);
            }
            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.queue.extend(this.rewriter.write(&chunk));
                }
                Poll::Ready(Some(Err(error))) => return Poll::Ready(Some(Err(error))),
                Poll::Ready(None) => {
                    this.inner_done = true;
                    this.queue.extend(this.rewriter.finish());
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Request host, lowercased and without the port, from the Host header or
/// the URI authority.
fn request_host(request: &Request<Body>) -> Option<String> {
    let raw = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| request.uri().host())?;
    let host = raw.split(':').next().unwrap_or(raw);
    Some(host.to_ascii_lowercase())
}

/// Case-insensitive prefix match on the HTML content types.
fn is_html<B>(response: &Response<B>) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|content_type| {
            let content_type = content_type.trim_start();
            starts_with_ignore_case(content_type, "text/html")
                || starts_with_ignore_case(content_type, "application/xhtml+xml")
        })
}

fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len() && s.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}
