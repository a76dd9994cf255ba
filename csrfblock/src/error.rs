//! Error types
//!
//! Token absence and token mismatch are not errors; they surface as
//! [`Outcome::Reject`](crate::validate::Outcome) and produce the configured
//! blocked response. The variants here cover the cases the middleware cannot
//! recover from locally.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Middleware error type
#[derive(Debug, Error)]
pub enum CsrfError {
    /// No session handle on the request. CSRF protection is meaningless
    /// without session affinity, so this is a deployment error and never a
    /// silent pass-through.
    #[error("no session on request; a session layer must run before CsrfLayer")]
    MissingSession,

    /// The request body could not be buffered for token extraction.
    #[error("failed to read request body: {0}")]
    Body(String),

    /// Invalid construction-time configuration, e.g. a header name that is
    /// not a legal HTTP field name.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl IntoResponse for CsrfError {
    fn into_response(self) -> Response {
        match self {
            Self::MissingSession | Self::Config(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "CSRF middleware misconfigured").into_response()
            }
            Self::Body(_) => {
                (StatusCode::BAD_REQUEST, "unable to read request body").into_response()
            }
        }
    }
}
