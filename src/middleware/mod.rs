//! Middleware layer.
//!
//! Middleware intercepts requests on their way to the handler and is the
//! place for cross-cutting concerns: routing, authentication, CSRF.
//!
//! # Dispatch model
//!
//! An [`Executor`] holds an ordered list of middleware and a cursor. Each call
//! to [`Next::handle`] advances the cursor by one and runs the middleware
//! found there, handing it the executor itself as its continuation:
//!
//! ```text
//! executor.handle(ctx)
//!   └─ routing.process(ctx, executor)      cursor = 0
//!        └─ executor.handle(ctx)
//!             └─ auth.process(ctx, executor)  cursor = 1
//!                  └─ …
//! ```
//!
//! A middleware that returns without calling `next.handle` ends the chain
//! there. A middleware that returns an [`Error`] does the same, and the error
//! travels back up to whoever called the executor first.
//!
//! The cursor makes an executor single-use: build a fresh one per request.

mod action;
mod auth;
mod csrf;
mod routing;

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::error::Error;
use crate::request::RequestContext;
use crate::response::Response;

pub use action::ActionMiddleware;
pub use auth::AuthMiddleware;
pub use csrf::{CsrfMiddleware, DEFAULT_NAME_KEY, DEFAULT_VALUE_KEY};
pub use routing::RoutingMiddleware;

/// A unit of request processing.
pub trait Middleware: Send + Sync {
    /// Inspect or amend `ctx`, then either call `next.handle(ctx)` to continue
    /// or produce a response (or error) to stop here.
    fn process(&self, ctx: RequestContext, next: &mut dyn Next) -> Result<Response, Error>;
}

/// The continuation handed to each middleware.
pub trait Next {
    fn handle(&mut self, ctx: RequestContext) -> Result<Response, Error>;
}

/// A registered middleware and its id.
#[derive(Clone)]
pub struct MiddlewareEntry {
    id: String,
    middleware: Arc<dyn Middleware>,
}

impl MiddlewareEntry {
    pub fn new(id: impl Into<String>, middleware: Arc<dyn Middleware>) -> Self {
        Self { id: id.into(), middleware }
    }

    pub fn id(&self) -> &str { &self.id }
}

impl fmt::Debug for MiddlewareEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareEntry").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Sequential, single-pass middleware runner for one request.
pub struct Executor {
    entries: Vec<MiddlewareEntry>,
    /// Index of the next entry to run; only ever increases.
    next: usize,
    last_response: Response,
}

impl Executor {
    /// `default_response` is what [`handle`](Next::handle) returns if the
    /// chain runs out before any middleware produced a response.
    pub fn new(default_response: Response) -> Self {
        Self { entries: Vec::new(), next: 0, last_response: default_response }
    }

    pub fn from_entries(entries: Vec<MiddlewareEntry>, default_response: Response) -> Self {
        Self { entries, next: 0, last_response: default_response }
    }

    /// Appends a middleware. Registration order is execution order.
    pub fn with(mut self, id: impl Into<String>, middleware: impl Middleware + 'static) -> Self {
        self.entries.push(MiddlewareEntry::new(id, Arc::new(middleware)));
        self
    }

    pub fn push(&mut self, entry: MiddlewareEntry) {
        self.entries.push(entry);
    }

    /// The position the cursor last advanced to, `None` before the first
    /// call. Past the end once the chain is exhausted.
    pub fn cursor(&self) -> Option<usize> {
        self.next.checked_sub(1)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(MiddlewareEntry::id)
    }

    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

impl Next for Executor {
    fn handle(&mut self, ctx: RequestContext) -> Result<Response, Error> {
        let index = self.next;
        self.next = self.next.saturating_add(1);

        let Some(entry) = self.entries.get(index) else {
            return Ok(self.last_response.clone());
        };
        trace!(middleware = %entry.id, index, "entering middleware");
        let middleware = Arc::clone(&entry.middleware);

        let response = middleware.process(ctx, self)?;
        self.last_response = response.clone();
        Ok(response)
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("entries", &self.entries)
            .field("cursor", &self.cursor())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use http::StatusCode;

    use super::*;
    use crate::request::Request;

    /// Records its id, then continues.
    struct Recorder {
        id: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Middleware for Recorder {
        fn process(&self, ctx: RequestContext, next: &mut dyn Next) -> Result<Response, Error> {
            self.log.lock().unwrap().push(self.id);
            next.handle(ctx)
        }
    }

    /// Answers without continuing.
    struct Stop(&'static str);

    impl Middleware for Stop {
        fn process(&self, _ctx: RequestContext, _next: &mut dyn Next) -> Result<Response, Error> {
            Ok(Response::text(self.0))
        }
    }

    struct Fail;

    impl Middleware for Fail {
        fn process(&self, ctx: RequestContext, _next: &mut dyn Next) -> Result<Response, Error> {
            Err(Error::RouteNotFound(ctx.path().to_owned()))
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::new(Request::new("GET", "/"))
    }

    fn recorder(id: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Recorder {
        Recorder { id, log: Arc::clone(log) }
    }

    #[test]
    fn each_middleware_runs_once_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut exec = Executor::new(Response::status(StatusCode::NO_CONTENT))
            .with("a", recorder("a", &log))
            .with("b", recorder("b", &log))
            .with("c", recorder("c", &log));

        let res = exec.handle(ctx()).unwrap();
        assert_eq!(*log.lock().unwrap(), ["a", "b", "c"]);
        // Nobody produced a response: the default comes back.
        assert_eq!(res.status_code(), StatusCode::NO_CONTENT);
        assert_eq!(exec.cursor(), Some(3));
    }

    #[test]
    fn exhausted_chain_returns_last_response_without_side_effects() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut exec = Executor::new(Response::default())
            .with("a", recorder("a", &log))
            .with("stop", Stop("done"));

        assert_eq!(exec.handle(ctx()).unwrap().body(), b"done");
        let again = exec.handle(ctx()).unwrap();
        assert_eq!(again.body(), b"done");
        assert_eq!(*log.lock().unwrap(), ["a"]);
    }

    #[test]
    fn short_circuit_skips_the_rest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut exec = Executor::new(Response::default())
            .with("a", recorder("a", &log))
            .with("stop", Stop("early"))
            .with("c", recorder("c", &log));

        assert_eq!(exec.handle(ctx()).unwrap().body(), b"early");
        assert_eq!(*log.lock().unwrap(), ["a"]);
    }

    #[test]
    fn errors_propagate_to_the_caller() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut exec = Executor::new(Response::default())
            .with("a", recorder("a", &log))
            .with("fail", Fail)
            .with("c", recorder("c", &log));

        assert!(matches!(exec.handle(ctx()), Err(Error::RouteNotFound(p)) if p == "/"));
        assert_eq!(*log.lock().unwrap(), ["a"]);
    }

    #[test]
    fn empty_chain_returns_default() {
        let mut exec = Executor::new(Response::text("default"));
        assert!(exec.is_empty());
        assert_eq!(exec.handle(ctx()).unwrap().body(), b"default");
        assert_eq!(exec.ids().count(), 0);
    }
}
