use std::sync::Arc;

use tracing::debug;

use super::{Middleware, Next};
use crate::dispatcher::DispatchOutcome;
use crate::error::Error;
use crate::request::{Attribute, DEFAULT_ACTION_ATTRIBUTE, DEFAULT_ROUTE_ATTRIBUTE, RequestContext};
use crate::response::Response;
use crate::router::Router;

/// Resolves the request's route and records what it found.
///
/// Path parameters become text attributes, the handler is stored under the
/// action attribute and the route name under the route attribute. An unknown
/// path fails with [`Error::RouteNotFound`], a known path with the wrong
/// method with [`Error::MethodNotAllowed`].
///
/// Parameters are written before the reserved keys, so a placeholder named
/// like one of them would be overwritten. [`App::new`](crate::App::new)
/// refuses such routes at startup.
pub struct RoutingMiddleware {
    router: Arc<Router>,
    action_attribute: String,
    route_attribute: String,
}

impl RoutingMiddleware {
    pub fn new(router: Arc<Router>) -> Self {
        Self::with_attributes(router, DEFAULT_ACTION_ATTRIBUTE, DEFAULT_ROUTE_ATTRIBUTE)
    }

    pub fn with_attributes(router: Arc<Router>, action_attribute: &str, route_attribute: &str) -> Self {
        Self {
            router,
            action_attribute: action_attribute.to_owned(),
            route_attribute: route_attribute.to_owned(),
        }
    }
}

impl Middleware for RoutingMiddleware {
    fn process(&self, mut ctx: RequestContext, next: &mut dyn Next) -> Result<Response, Error> {
        match self.router.dispatch(ctx.method(), ctx.path())? {
            DispatchOutcome::NotFound => {
                debug!(method = %ctx.method(), path = %ctx.path(), "no route");
                Err(Error::RouteNotFound(ctx.path().to_owned()))
            }
            DispatchOutcome::MethodNotAllowed { method } => {
                debug!(method = %method, path = %ctx.path(), "method not allowed");
                Err(Error::MethodNotAllowed(method))
            }
            DispatchOutcome::Found { route, handler, params } => {
                debug!(route = %route, path = %ctx.path(), "route resolved");
                for (name, value) in params {
                    ctx.set_text(name, value);
                }
                ctx.set_attribute(self.action_attribute.as_str(), Attribute::Handler(handler));
                ctx.set_text(self.route_attribute.as_str(), route);
                next.handle(ctx)
            }
        }
    }
}
