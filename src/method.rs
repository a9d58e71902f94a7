//! HTTP method as a typed enum.
//!
//! Covers RFC 9110 standard methods, WebDAV extensions (RFC 4918 / 4791 / 3253 / 5323),
//! and `PURGE` used by nginx and Varnish for cache invalidation.
//!
//! Route definitions name their methods as strings; every string is checked
//! against this table when the route table is built, so a typo in a route
//! definition is a startup error rather than a route that never matches.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// A known HTTP method.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Method {
    // RFC 9110 ─────────────────────────────────────────────────────────────────
    Connect,
    Delete,
    Get,
    Head,
    Options,
    Patch,
    Post,
    Put,
    Trace,
    // WebDAV RFC 4918 ──────────────────────────────────────────────────────────
    Copy,
    Lock,
    Mkcol,
    Move,
    Propfind,
    Proppatch,
    Unlock,
    // WebDAV extensions ────────────────────────────────────────────────────────
    Mkcalendar, // RFC 4791 (CalDAV)
    Report,     // RFC 3253
    Search,     // RFC 5323
    // Cache invalidation ───────────────────────────────────────────────────────
    Purge, // nginx / Varnish
}

/// Wire names, one row per variant.
const TABLE: [(Method, &str); 20] = [
    (Method::Connect,    "CONNECT"),
    (Method::Copy,       "COPY"),
    (Method::Delete,     "DELETE"),
    (Method::Get,        "GET"),
    (Method::Head,       "HEAD"),
    (Method::Lock,       "LOCK"),
    (Method::Mkcalendar, "MKCALENDAR"),
    (Method::Mkcol,      "MKCOL"),
    (Method::Move,       "MOVE"),
    (Method::Options,    "OPTIONS"),
    (Method::Patch,      "PATCH"),
    (Method::Post,       "POST"),
    (Method::Propfind,   "PROPFIND"),
    (Method::Proppatch,  "PROPPATCH"),
    (Method::Purge,      "PURGE"),
    (Method::Put,        "PUT"),
    (Method::Report,     "REPORT"),
    (Method::Search,     "SEARCH"),
    (Method::Trace,      "TRACE"),
    (Method::Unlock,     "UNLOCK"),
];

/// Returned when a string is not one of the methods in [`Method`].
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[error("unknown HTTP method `{0}`")]
pub struct UnknownMethod(pub String);

impl Method {
    /// Returns the uppercase wire representation (e.g. `"GET"`).
    pub fn as_str(self) -> &'static str {
        TABLE
            .iter()
            .find(|(m, _)| *m == self)
            .map_or("", |(_, name)| name)
    }

    /// Methods that must carry a valid CSRF token.
    pub fn is_state_changing(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Delete | Self::Patch)
    }
}

/// Parses an uppercase method string (e.g. `"GET"`). Case-sensitive per RFC 9110 §9.1.
impl FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TABLE
            .iter()
            .find(|(_, name)| *name == s)
            .map(|(m, _)| *m)
            .ok_or_else(|| UnknownMethod(s.to_owned()))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_parse_back() {
        for (method, name) in TABLE {
            assert_eq!(method.as_str(), name);
            assert_eq!(name.parse::<Method>(), Ok(method));
        }
    }

    #[test]
    fn parsing_is_case_sensitive() {
        assert_eq!("get".parse::<Method>(), Err(UnknownMethod("get".into())));
        assert!("BREW".parse::<Method>().is_err());
    }

    #[test]
    fn only_writes_are_state_changing() {
        let writes: Vec<Method> = TABLE
            .iter()
            .map(|(m, _)| *m)
            .filter(|m| m.is_state_changing())
            .collect();
        assert_eq!(writes, [Method::Delete, Method::Patch, Method::Post, Method::Put]);
    }
}
