//! Incoming request and the per-request attribute bag.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::auth::UserPrincipal;
use crate::handler::BoxedHandler;

/// Attribute key under which the resolved handler is stored by default.
pub const DEFAULT_ACTION_ATTRIBUTE: &str = "__action";
/// Attribute key under which the matched route name is stored by default.
pub const DEFAULT_ROUTE_ATTRIBUTE: &str = "__route";
/// Attribute key under which the user principal is stored by default.
pub const DEFAULT_USER_ATTRIBUTE: &str = "__user";

/// An incoming HTTP request as handed over by the transport.
#[derive(Clone, Debug, Default)]
pub struct Request {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    form: Option<HashMap<String, String>>,
}

impl Request {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    /// Attaches a raw body and parses it according to the request's
    /// `content-type` header (add headers first).
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self.form = parse_body(self.header("content-type"), &self.body);
        self
    }

    /// Attaches an already-parsed body.
    pub fn with_form<I, K, V>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.form = Some(fields.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        self
    }

    pub fn method(&self) -> &str { &self.method }
    pub fn path(&self) -> &str { &self.path }
    pub fn headers(&self) -> &[(String, String)] { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The parsed body, if the body was a form or a JSON object.
    pub fn form(&self) -> Option<&HashMap<String, String>> {
        self.form.as_ref()
    }

    /// A single field of the parsed body.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.form.as_ref()?.get(name).map(String::as_str)
    }

    /// The `User-Agent` header, or the empty string.
    pub fn user_agent(&self) -> &str {
        self.header("user-agent").unwrap_or("")
    }
}

/// Parses urlencoded forms and flat JSON objects. Anything else has no
/// parsed body.
pub(crate) fn parse_body(content_type: Option<&str>, body: &[u8]) -> Option<HashMap<String, String>> {
    let mime = content_type?.split(';').next()?.trim();
    if mime.eq_ignore_ascii_case("application/x-www-form-urlencoded") {
        return Some(
            url::form_urlencoded::parse(body)
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
        );
    }
    if mime.eq_ignore_ascii_case("application/json") {
        let value: serde_json::Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(e) => {
                debug!("unparseable json body: {e}");
                return None;
            }
        };
        let serde_json::Value::Object(map) = value else { return None };
        return Some(
            map.into_iter()
                .filter_map(|(k, v)| match v {
                    serde_json::Value::String(s) => Some((k, s)),
                    serde_json::Value::Number(n) => Some((k, n.to_string())),
                    serde_json::Value::Bool(b) => Some((k, b.to_string())),
                    _ => None,
                })
                .collect(),
        );
    }
    None
}

// ── Attributes ────────────────────────────────────────────────────────────────

/// A value in the request's attribute bag.
#[derive(Clone)]
pub enum Attribute {
    Text(String),
    Handler(BoxedHandler),
    User(Arc<UserPrincipal>),
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Self::Handler(_) => f.write_str("Handler(..)"),
            Self::User(u) => f.debug_tuple("User").field(u).finish(),
        }
    }
}

/// The request plus everything middleware learned about it.
///
/// Created fresh for every request and dropped once the response is ready.
#[derive(Debug)]
pub struct RequestContext {
    request: Request,
    attributes: HashMap<String, Attribute>,
}

impl RequestContext {
    pub fn new(request: Request) -> Self {
        Self { request, attributes: HashMap::new() }
    }

    pub fn request(&self) -> &Request { &self.request }
    pub fn method(&self) -> &str { self.request.method() }
    pub fn path(&self) -> &str { self.request.path() }

    pub fn attribute(&self, key: &str) -> Option<&Attribute> {
        self.attributes.get(key)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: Attribute) {
        self.attributes.insert(key.into(), value);
    }

    pub fn set_text(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.set_attribute(key, Attribute::Text(value.into()));
    }

    /// A text attribute: path parameters and CSRF fields are stored this way.
    pub fn text(&self, key: &str) -> Option<&str> {
        match self.attributes.get(key)? {
            Attribute::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `ctx.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.text(key)
    }

    pub fn handler(&self, key: &str) -> Option<&BoxedHandler> {
        match self.attributes.get(key)? {
            Attribute::Handler(h) => Some(h),
            _ => None,
        }
    }

    pub fn user_at(&self, key: &str) -> Option<&UserPrincipal> {
        match self.attributes.get(key)? {
            Attribute::User(u) => Some(u),
            _ => None,
        }
    }

    /// The principal stored under [`DEFAULT_USER_ATTRIBUTE`].
    pub fn user(&self) -> Option<&UserPrincipal> {
        self.user_at(DEFAULT_USER_ATTRIBUTE)
    }
}

impl From<Request> for RequestContext {
    fn from(request: Request) -> Self {
        Self::new(request)
    }
}
