//! The assembled application: compiled routes, auth settings and the
//! middleware order.
//!
//! An [`App`] is built once at startup and shared by every request. It never
//! holds an [`Executor`]: each request gets a fresh one from
//! [`App::executor`], wired to that request's session.
//!
//! ```text
//! routing → auth → csrf → (layers, in registration order) → action
//! ```

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::auth::{AuthModel, AuthProviderConfig};
use crate::config::Config;
use crate::error::{ConfigError, Error};
use crate::middleware::{
    ActionMiddleware, AuthMiddleware, CsrfMiddleware, Executor, Middleware, MiddlewareEntry, Next,
    RoutingMiddleware,
};
use crate::request::{Request, RequestContext};
use crate::response::{IntoResponse, Response};
use crate::router::{RouteTable, Router};
use crate::session::SharedSession;

pub struct App {
    config: Config,
    router: Arc<Router>,
    routing: Arc<RoutingMiddleware>,
    action: Arc<ActionMiddleware>,
    provider: Arc<AuthProviderConfig>,
    model: Arc<dyn AuthModel>,
    layers: Vec<MiddlewareEntry>,
}

impl App {
    /// Validates `config`, freezes `routes` under `config.base_path` and
    /// compiles them. Any fault here is a startup fault.
    pub fn new(config: Config, routes: RouteTable, model: Arc<dyn AuthModel>) -> Result<Self, ConfigError> {
        config.validate()?;
        check_params(&config, &routes)?;

        let router = Arc::new(Router::new(routes, &config.base_path));
        router.compile()?;
        debug!(routes = router.table().len(), prefix = %router.prefix(), "routes compiled");

        let routing = Arc::new(RoutingMiddleware::with_attributes(
            Arc::clone(&router),
            &config.routing.action_attribute,
            &config.routing.route_attribute,
        ));
        let action = Arc::new(ActionMiddleware::with_attribute(&config.routing.action_attribute));
        let provider = Arc::new(config.auth.provider.clone());

        Ok(Self { config, router, routing, action, provider, model, layers: Vec::new() })
    }

    /// Adds a middleware between CSRF protection and the handler.
    pub fn layer(mut self, id: &str, middleware: impl Middleware + 'static) -> Self {
        self.layers.push(MiddlewareEntry::new(id, Arc::new(middleware)));
        self
    }

    pub fn config(&self) -> &Config { &self.config }
    pub fn router(&self) -> &Router { &self.router }
    pub fn provider(&self) -> &AuthProviderConfig { &self.provider }

    /// A single-use executor for one request from the client owning `session`.
    pub fn executor(&self, session: SharedSession) -> Executor {
        let auth = AuthMiddleware::new(Arc::clone(&self.provider), Arc::clone(&self.model), Arc::clone(&session))
            .with_keys(self.config.auth.keys.clone())
            .with_user_attribute(&self.config.auth.user_attribute);
        let csrf = CsrfMiddleware::with_keys(session, &self.config.csrf.name_key, &self.config.csrf.value_key);

        let mut entries = Vec::with_capacity(self.layers.len() + 4);
        entries.push(MiddlewareEntry::new("routing", self.routing.clone()));
        entries.push(MiddlewareEntry::new("auth", Arc::new(auth)));
        entries.push(MiddlewareEntry::new("csrf", Arc::new(csrf)));
        entries.extend(self.layers.iter().cloned());
        entries.push(MiddlewareEntry::new("action", self.action.clone()));

        Executor::from_entries(entries, Response::default())
    }

    /// Runs `request` through the whole chain.
    pub fn handle(&self, request: Request, session: SharedSession) -> Result<Response, Error> {
        self.executor(session).handle(RequestContext::new(request))
    }

    /// Like [`handle`](Self::handle), with faults turned into responses.
    ///
    /// A CSRF rejection also carries the replacement pair as headers named
    /// after the configured CSRF keys.
    pub fn respond(&self, request: Request, session: SharedSession) -> Response {
        let method = request.method().to_owned();
        let path = request.path().to_owned();

        let err = match self.handle(request, session) {
            Ok(response) => return response,
            Err(err) => err,
        };

        let status = err.status();
        if status.is_server_error() {
            error!(%method, %path, error = %err, "request failed");
        } else {
            warn!(%method, %path, %status, error = %err, "request rejected");
        }

        let retry = match &err {
            Error::CsrfFailure { token, .. } => Some(token.clone()),
            _ => None,
        };
        let mut response = err.into_response();
        if let Some(token) = retry {
            response.push_header(&self.config.csrf.name_key, &token.name);
            response.push_header(&self.config.csrf.value_key, &token.value);
        }
        response
    }
}

/// Path parameters share the attribute bag with the keys the pipeline writes,
/// so a placeholder named like one of them is refused.
fn check_params(config: &Config, routes: &RouteTable) -> Result<(), ConfigError> {
    let reserved = [
        config.routing.action_attribute.as_str(),
        config.routing.route_attribute.as_str(),
        config.auth.user_attribute.as_str(),
        config.csrf.name_key.as_str(),
        config.csrf.value_key.as_str(),
    ];
    for route in routes.iter() {
        if let Some(param) = route.params().find(|p| reserved.contains(p)) {
            return Err(ConfigError::ReservedParam {
                name: route.name().to_owned(),
                param: param.to_owned(),
            });
        }
    }
    Ok(())
}
