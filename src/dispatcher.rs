//! Path dispatcher: (method, path) → handler + path parameters.
//!
//! One radix tree over all paths, O(path-length) lookup via [`matchit`]. Each
//! leaf holds the handlers for that pattern keyed by method, which is what
//! lets the dispatcher tell "no such path" apart from "path exists, wrong
//! method".
//!
//! Pattern syntax is `matchit`'s (`{param}`, `{*rest}`) plus trailing
//! optional groups: `/posts[/{page}[/{size}]]` registers `/posts`,
//! `/posts/{page}` and `/posts/{page}/{size}` for the same route. Patterns
//! the tree cannot tell apart are rejected when the dispatcher is compiled.

use std::collections::HashMap;
use std::fmt;

use matchit::Router as MatchitRouter;
use tracing::debug;

use crate::error::ConfigError;
use crate::handler::BoxedHandler;
use crate::method::Method;
use crate::router::RouteTable;

/// Result of resolving one request.
#[derive(Clone)]
pub enum DispatchOutcome {
    Found {
        route: String,
        handler: BoxedHandler,
        params: HashMap<String, String>,
    },
    NotFound,
    /// The path exists but not for this method. Carries the attempted method,
    /// not the allowed set.
    MethodNotAllowed { method: String },
}

impl fmt::Debug for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Found { route, params, .. } => f
                .debug_struct("Found")
                .field("route", route)
                .field("params", params)
                .finish_non_exhaustive(),
            Self::NotFound => f.write_str("NotFound"),
            Self::MethodNotAllowed { method } => f
                .debug_struct("MethodNotAllowed")
                .field("method", method)
                .finish(),
        }
    }
}

struct Endpoint {
    route: String,
    handler: BoxedHandler,
}

/// Handlers for one concrete pattern.
#[derive(Default)]
struct Slot {
    endpoints: HashMap<Method, Endpoint>,
}

impl Slot {
    fn endpoint(&self, method: Method) -> Option<&Endpoint> {
        self.endpoints.get(&method).or_else(|| {
            // HEAD is answered by GET unless a route claims HEAD itself.
            if method == Method::Head {
                self.endpoints.get(&Method::Get)
            } else {
                None
            }
        })
    }
}

/// Compiled matcher over a [`RouteTable`].
pub struct Dispatcher {
    tree: MatchitRouter<usize>,
    slots: Vec<Slot>,
}

impl Dispatcher {
    /// Compiles `table` with every path prefixed by `prefix`.
    pub fn compile(table: &RouteTable, prefix: &str) -> Result<Self, ConfigError> {
        let mut by_pattern: HashMap<String, usize> = HashMap::new();
        let mut slots: Vec<Slot> = Vec::new();
        let mut tree = MatchitRouter::new();

        for route in table.iter() {
            let variants = expand_optional(route.path()).ok_or_else(|| ConfigError::OptionalSegment {
                name: route.name().to_owned(),
                path: route.path().to_owned(),
            })?;

            for variant in variants {
                let pattern = format!("{prefix}{variant}");
                let slot_id = match by_pattern.get(&pattern) {
                    Some(&id) => id,
                    None => {
                        let id = slots.len();
                        tree.insert(pattern.clone(), id).map_err(|source| ConfigError::Pattern {
                            name: route.name().to_owned(),
                            pattern: pattern.clone(),
                            source,
                        })?;
                        slots.push(Slot::default());
                        by_pattern.insert(pattern.clone(), id);
                        id
                    }
                };

                let slot = &mut slots[slot_id];
                for &method in route.methods() {
                    if let Some(other) = slot.endpoints.get(&method) {
                        return Err(ConfigError::MethodConflict {
                            name: route.name().to_owned(),
                            method: method.to_string(),
                            pattern,
                            other: other.route.clone(),
                        });
                    }
                    slot.endpoints.insert(method, Endpoint {
                        route: route.name().to_owned(),
                        handler: route.handler().clone(),
                    });
                }
            }
        }

        debug!(patterns = slots.len(), "dispatcher compiled");
        Ok(Self { tree, slots })
    }

    pub fn dispatch(&self, method: &str, path: &str) -> DispatchOutcome {
        let Ok(matched) = self.tree.at(path) else {
            return DispatchOutcome::NotFound;
        };
        let slot = &self.slots[*matched.value];

        // An unknown method string can still hit an existing path.
        let endpoint = method.parse::<Method>().ok().and_then(|m| slot.endpoint(m));
        let Some(endpoint) = endpoint else {
            return DispatchOutcome::MethodNotAllowed { method: method.to_owned() };
        };

        DispatchOutcome::Found {
            route: endpoint.route.clone(),
            handler: endpoint.handler.clone(),
            params: matched.params.iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect(),
        }
    }
}

/// Expands trailing optional groups into their nested prefixes.
///
/// Returns `None` if brackets are unbalanced, appear anywhere but the tail,
/// or enclose nothing.
fn expand_optional(path: &str) -> Option<Vec<String>> {
    let body = path.trim_end_matches(']');
    let depth = path.len() - body.len();
    if body.contains(']') {
        return None;
    }
    let parts: Vec<&str> = body.split('[').collect();
    if parts.len() != depth + 1 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }

    let mut acc = String::new();
    Some(parts.into_iter().map(|p| {
        acc.push_str(p);
        acc.clone()
    }).collect())
}
