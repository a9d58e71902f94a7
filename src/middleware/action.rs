use tracing::error;

use super::{Middleware, Next};
use crate::error::Error;
use crate::request::{DEFAULT_ACTION_ATTRIBUTE, RequestContext};
use crate::response::Response;

/// End of the chain: calls the handler the routing middleware resolved.
///
/// Never continues. Register it last.
pub struct ActionMiddleware {
    action_attribute: String,
}

impl ActionMiddleware {
    pub fn new() -> Self {
        Self::with_attribute(DEFAULT_ACTION_ATTRIBUTE)
    }

    pub fn with_attribute(action_attribute: &str) -> Self {
        Self { action_attribute: action_attribute.to_owned() }
    }
}

impl Default for ActionMiddleware {
    fn default() -> Self { Self::new() }
}

impl Middleware for ActionMiddleware {
    fn process(&self, ctx: RequestContext, _next: &mut dyn Next) -> Result<Response, Error> {
        let Some(handler) = ctx.handler(&self.action_attribute) else {
            error!(path = %ctx.path(), attribute = %self.action_attribute, "no handler attribute; is routing registered first?");
            return Err(Error::MissingHandler);
        };
        Ok(handler.call(&ctx))
    }
}
