//! csrfblock: streaming CSRF protection middleware for axum
//!
//! Rejects state-changing (POST) requests that do not present the
//! per-session secret token, and injects that token into every outgoing
//! HTML form — rewriting the response body incrementally, chunk by chunk,
//! without ever buffering the whole document.
//!
//! # How it works
//!
//! 1. The host's session layer attaches a [`Session`] handle to each request
//! 2. On POST, the presented token (header or form parameter, url-encoded or
//!    multipart) is compared against the token stored in the session; a
//!    mismatch short-circuits with a 403 before the application runs
//! 3. On HTML responses a token is issued lazily into the session and a
//!    hidden input is spliced into every same-origin POST `<form>` (plus an
//!    optional meta tag after `<head>`) as the body streams out
//!
//! # Design Principles
//!
//! 1. **Streaming first**: the rewriter is an incremental byte-level state
//!    machine; per-response memory is bounded by the longest single tag
//! 2. **Pass-through fidelity**: every response byte reaches the client
//!    unchanged and in order; injected fragments are the only additions,
//!    and malformed markup is forwarded rather than rejected
//! 3. **Fail loudly on misconfiguration**: a request without a session is a
//!    deployment error and produces a 500, never a silent bypass
//! 4. **External session ownership**: sessions belong to the host; this
//!    crate reads and writes exactly one key through the [`SessionStore`]
//!    seam
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use axum::{extract::Request, middleware, middleware::Next, response::{Html, Response}, routing::{get, post}, Router};
//! use csrfblock::{CsrfConfig, CsrfLayer, MemoryStore, Session};
//!
//! // Demo session layer: a single shared session. Real applications resolve
//! // a per-client session from a cookie and insert its handle here.
//! async fn attach_session(session: Session, mut request: Request, next: Next) -> Response {
//!     request.extensions_mut().insert(session);
//!     next.run(request).await
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let session = Session::new(Arc::new(MemoryStore::default()));
//!
//!     let app = Router::new()
//!         .route("/", get(|| async { Html("<html><body><form method=\"post\" action=\"/submit\"><button>go</button></form></body></html>") }))
//!         .route("/submit", post(|| async { "accepted" }))
//!         .layer(CsrfLayer::new(CsrfConfig::default().with_meta("csrftoken")))
//!         .layer(middleware::from_fn(move |request, next| {
//!             let session = session.clone();
//!             attach_session(session, request, next)
//!         }));
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Token lifecycle
//!
//! Tokens are fixed-length hex strings (default 16 characters, maximum 40)
//! created lazily on the first HTML response for a session. With
//! [`CsrfConfig::with_onetime`] each token is deleted immediately after one
//! successful validation and re-issued on the next HTML response.
//!
//! # Scope
//!
//! This crate does not manage sessions, terminate TLS, or route requests;
//! those belong to the host application. Non-HTML endpoints are covered by
//! the header/parameter check only.

pub mod config;
pub mod error;
pub mod middleware;
pub mod rewrite;
pub mod session;
pub mod token;
pub mod validate;

pub use config::{
    BlockedHandler, CsrfConfig, DefaultBlocked, NoWhitelist, Whitelist, BLOCKED_BODY,
    DEFAULT_HEADER_NAME, DEFAULT_META_NAME, DEFAULT_PARAMETER_NAME, DEFAULT_SESSION_KEY,
    DEFAULT_TOKEN_LENGTH,
};
pub use error::CsrfError;
pub use middleware::{CsrfLayer, CsrfService};
pub use rewrite::HtmlRewriter;
pub use session::{MemoryStore, Session, SessionStore};
pub use token::{generate_token, MAX_TOKEN_LENGTH};
pub use validate::{Outcome, Validator};
