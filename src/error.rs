//! Error types.
//!
//! Two families live here. [`ConfigError`] is raised while the application is
//! being assembled (bad route definitions, bad role tables, unreadable config)
//! and is fatal: startup aborts. [`Error`] is raised per request by the
//! middleware chain and is translated into a response at the outer boundary
//! via [`Error::status`] / [`IntoResponse`].

use std::fmt;

use http::StatusCode;
use thiserror::Error;

use crate::response::{IntoResponse, Response};

/// Startup-time configuration fault. Never recoverable.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("route name must not be empty")]
    EmptyRouteName,

    #[error("route `{0}` is already defined")]
    DuplicateRoute(String),

    #[error("route `{name}` declares no HTTP method")]
    NoMethods { name: String },

    #[error("route `{name}`: unknown HTTP method `{method}`")]
    InvalidMethod { name: String, method: String },

    #[error("route `{name}`: path `{path}` must start with `/`")]
    InvalidPath { name: String, path: String },

    #[error("route `{name}`: malformed optional segment in `{path}`")]
    OptionalSegment { name: String, path: String },

    #[error("route `{name}`: parameter `{param}` would overwrite a reserved request attribute")]
    ReservedParam { name: String, param: String },

    #[error("route `{name}`: pattern `{pattern}` rejected: {source}")]
    Pattern {
        name: String,
        pattern: String,
        #[source]
        source: matchit::InsertError,
    },

    #[error("route `{name}`: {method} {pattern} is already handled by route `{other}`")]
    MethodConflict {
        name: String,
        method: String,
        pattern: String,
        other: String,
    },

    #[error("role `{0}` has no entry in the role permission table")]
    UnmappedRole(String),

    #[error("role permission table names undeclared role `{0}`")]
    UndeclaredRole(String),

    #[error("invalid socket address `{0}`")]
    Address(String),

    #[error("config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a CSRF check failed.
///
/// Every variant maps to the same 403 fault; the distinction exists for logs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CsrfRejection {
    /// State-changing request without a name or value field.
    MissingToken,
    /// A value was submitted but could not be unmasked.
    MalformedToken,
    /// The unmasked value did not match the token stored under the name.
    TokenMismatch,
    /// A safe request (GET, HEAD, ...) carried a token name.
    TokenOnSafeMethod,
}

impl CsrfRejection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingToken      => "missing token",
            Self::MalformedToken    => "malformed token",
            Self::TokenMismatch     => "token mismatch",
            Self::TokenOnSafeMethod => "token submitted on safe method",
        }
    }
}

impl fmt::Display for CsrfRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A CSRF name / masked value pair, as rendered into the next form.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CsrfToken {
    pub name: String,
    pub value: String,
}

/// Request-scoped fault raised by the middleware chain.
#[derive(Debug, Error)]
pub enum Error {
    #[error("route `{0}` not found")]
    RouteNotFound(String),

    #[error("method `{0}` is not allowed")]
    MethodNotAllowed(String),

    /// The replacement `token` has already been stored in the session; render
    /// it so the client can retry.
    #[error("failed CSRF check: {reason}")]
    CsrfFailure { reason: CsrfRejection, token: CsrfToken },

    #[error("no handler was resolved for this request")]
    MissingHandler,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Transport-level status for this fault.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::RouteNotFound(_)       => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed(_)    => StatusCode::METHOD_NOT_ALLOWED,
            Self::CsrfFailure { .. }     => StatusCode::FORBIDDEN,
            Self::MissingHandler
            | Self::Config(_)
            | Self::Io(_)                => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// The outer boundary: faults become plain-text responses with their status.
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = if status.is_server_error() {
            // Internal details stay in the logs.
            status.canonical_reason().unwrap_or("error").to_owned()
        } else {
            self.to_string()
        };
        Response::builder().status(status).text(body)
    }
}
