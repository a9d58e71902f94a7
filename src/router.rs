//! Named route table.
//!
//! Routes are registered by name once at startup. The table is then handed
//! to a [`Router`], which compiles it lazily into a [`Dispatcher`] the first
//! time a request needs one. Once inside a `Router` the table can no longer be
//! changed: additions happen before the first dispatch or not at all.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::OnceLock;

use tracing::debug;

use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::error::ConfigError;
use crate::handler::{BoxedHandler, Handler};
use crate::method::Method;

// ── Methods ───────────────────────────────────────────────────────────────────

/// The HTTP methods a route answers to, as written in the route definition.
///
/// A single string, a [`Method`], or a list of either. Strings are checked
/// when the route is added.
#[derive(Clone, Debug, Default)]
pub struct Methods(Vec<String>);

impl From<&str> for Methods {
    fn from(m: &str) -> Self { Self(vec![m.to_owned()]) }
}

impl From<String> for Methods {
    fn from(m: String) -> Self { Self(vec![m]) }
}

impl From<Method> for Methods {
    fn from(m: Method) -> Self { Self(vec![m.as_str().to_owned()]) }
}

impl<const N: usize> From<[&str; N]> for Methods {
    fn from(ms: [&str; N]) -> Self { Self(ms.iter().map(|m| (*m).to_owned()).collect()) }
}

impl<const N: usize> From<[Method; N]> for Methods {
    fn from(ms: [Method; N]) -> Self { Self(ms.iter().map(|m| m.as_str().to_owned()).collect()) }
}

impl From<&[&str]> for Methods {
    fn from(ms: &[&str]) -> Self { Self(ms.iter().map(|m| (*m).to_owned()).collect()) }
}

impl From<Vec<String>> for Methods {
    fn from(ms: Vec<String>) -> Self { Self(ms) }
}

// ── Route ─────────────────────────────────────────────────────────────────────

/// A named mapping from (method set, path pattern) to a handler.
#[derive(Clone)]
pub struct Route {
    name: String,
    methods: BTreeSet<Method>,
    path: String,
    handler: BoxedHandler,
}

impl Route {
    pub fn name(&self) -> &str { &self.name }
    pub fn methods(&self) -> &BTreeSet<Method> { &self.methods }
    pub fn path(&self) -> &str { &self.path }
    pub fn handler(&self) -> &BoxedHandler { &self.handler }

    /// Placeholder names in the path, `{id}` and `{*rest}` alike, in order.
    pub fn params(&self) -> impl Iterator<Item = &str> {
        self.path
            .split('{')
            .skip(1)
            .filter_map(|rest| rest.split_once('}'))
            .map(|(name, _)| name.trim_start_matches('*'))
            .filter(|name| !name.is_empty())
    }

    /// The path up to the first optional group or placeholder.
    fn literal_prefix(&self) -> &str {
        let end = self.path.find(['[', '{']).unwrap_or(self.path.len());
        &self.path[..end]
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("name", &self.name)
            .field("methods", &self.methods)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// One entry of a static route definition list.
pub struct RouteDefinition {
    name: String,
    methods: Methods,
    path: String,
    handler: BoxedHandler,
}

impl RouteDefinition {
    pub fn new(
        name: impl Into<String>,
        methods: impl Into<Methods>,
        path: impl Into<String>,
        handler: impl Handler,
    ) -> Self {
        Self {
            name: name.into(),
            methods: methods.into(),
            path: path.into(),
            handler: handler.into_boxed_handler(),
        }
    }
}

// ── RouteTable ────────────────────────────────────────────────────────────────

/// Ordered, name-keyed registry of routes.
#[derive(Clone, Debug, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
    index: HashMap<String, usize>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from a static definition list.
    ///
    /// The whole list is validated: a single bad entry fails the call and no
    /// table is produced.
    pub fn from_definitions<I>(definitions: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = RouteDefinition>,
    {
        let mut table = Self::new();
        for def in definitions {
            table.insert(def.name, def.methods, def.path, def.handler)?;
        }
        Ok(table)
    }

    /// Registers a route. Fails if the name is empty or taken, if any method
    /// is unknown, or if the path does not start with `/`.
    pub fn add(
        &mut self,
        name: &str,
        methods: impl Into<Methods>,
        path: &str,
        handler: impl Handler,
    ) -> Result<(), ConfigError> {
        self.insert(name.to_owned(), methods.into(), path.to_owned(), handler.into_boxed_handler())
    }

    /// Chaining form of [`add`](Self::add).
    ///
    /// ```rust
    /// # use tollgate::{RequestContext, RouteTable};
    /// # fn list(_: &RequestContext) -> &'static str { "" }
    /// # fn show(_: &RequestContext) -> &'static str { "" }
    /// # fn main() -> Result<(), tollgate::ConfigError> {
    /// let table = RouteTable::new()
    ///     .route("user.list", "GET",           "/users",      list)?
    ///     .route("user.show", ["GET", "HEAD"], "/users/{id}", show)?;
    /// assert!(table.exists("user.show"));
    /// # Ok(())
    /// # }
    /// ```
    pub fn route(
        mut self,
        name: &str,
        methods: impl Into<Methods>,
        path: &str,
        handler: impl Handler,
    ) -> Result<Self, ConfigError> {
        self.add(name, methods, path, handler)?;
        Ok(self)
    }

    fn insert(
        &mut self,
        name: String,
        methods: Methods,
        path: String,
        handler: BoxedHandler,
    ) -> Result<(), ConfigError> {
        if name.is_empty() {
            return Err(ConfigError::EmptyRouteName);
        }
        if self.index.contains_key(&name) {
            return Err(ConfigError::DuplicateRoute(name));
        }
        if methods.0.is_empty() {
            return Err(ConfigError::NoMethods { name });
        }
        let mut parsed = BTreeSet::new();
        for m in &methods.0 {
            match m.parse::<Method>() {
                Ok(method) => { parsed.insert(method); }
                Err(_) => return Err(ConfigError::InvalidMethod { name, method: m.clone() }),
            }
        }
        if !path.starts_with('/') {
            return Err(ConfigError::InvalidPath { name, path });
        }

        debug!(route = %name, path = %path, "route registered");
        self.index.insert(name.clone(), self.routes.len());
        self.routes.push(Route { name, methods: parsed, path, handler });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Route> {
        self.index.get(name).map(|&i| &self.routes[i])
    }

    pub fn exists(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Routes in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize { self.routes.len() }
    pub fn is_empty(&self) -> bool { self.routes.is_empty() }
}

// ── Router ────────────────────────────────────────────────────────────────────

/// A frozen route table plus a path prefix, with a lazily compiled
/// [`Dispatcher`].
///
/// Shared read-only across every request for the life of the process.
pub struct Router {
    table: RouteTable,
    prefix: String,
    dispatcher: OnceLock<Dispatcher>,
}

impl Router {
    /// `prefix` is prepended to every route path (a trailing `/` is ignored).
    pub fn new(table: RouteTable, prefix: &str) -> Self {
        Self {
            table,
            prefix: prefix.trim_end_matches('/').to_owned(),
            dispatcher: OnceLock::new(),
        }
    }

    pub fn table(&self) -> &RouteTable { &self.table }
    pub fn prefix(&self) -> &str { &self.prefix }

    /// Compiles the dispatcher now. Call at startup so ambiguous or
    /// conflicting patterns abort initialization instead of the first request.
    pub fn compile(&self) -> Result<&Dispatcher, ConfigError> {
        if let Some(d) = self.dispatcher.get() {
            return Ok(d);
        }
        let compiled = Dispatcher::compile(&self.table, &self.prefix)?;
        Ok(self.dispatcher.get_or_init(|| compiled))
    }

    pub fn dispatch(&self, method: &str, path: &str) -> Result<DispatchOutcome, ConfigError> {
        Ok(self.compile()?.dispatch(method, path))
    }

    /// Reverse routing: the named route's literal prefix under this router's
    /// prefix, followed by `suffix`.
    ///
    /// `url_for("user.show", "42")` on `/users/{id}` gives `/users/42`.
    pub fn url_for(&self, name: &str, suffix: &str) -> Option<String> {
        let route = self.table.get(name)?;
        Some(format!("{}{}{}", self.prefix, route.literal_prefix(), suffix))
    }

    /// Whether `current_path` belongs to the named route: an exact match for
    /// fully literal paths, a prefix match for parameterised ones.
    pub fn is_route(&self, name: &str, current_path: &str) -> bool {
        let Some(route) = self.table.get(name) else { return false };
        let literal = format!("{}{}", self.prefix, route.literal_prefix());
        if route.literal_prefix().len() == route.path().len() {
            current_path == literal
        } else {
            current_path.starts_with(&literal)
        }
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("prefix", &self.prefix)
            .field("routes", &self.table.len())
            .field("compiled", &self.dispatcher.get().is_some())
            .finish()
    }
}
