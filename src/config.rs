//! Application configuration.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration:
//!
//! ```toml
//! base_path = "/app"
//!
//! [csrf]
//! name_key = "csrf-name"
//! value_key = "csrf-value"
//!
//! [auth.provider]
//! login_uri = "/login"
//! roles = ["admin", "editor"]
//!
//! [auth.provider.role_permissions]
//! admin = ["users.manage"]
//! editor = ["posts.edit"]
//!
//! [server]
//! addr = "0.0.0.0:3000"
//! max_body_bytes = 65536
//! session_idle_secs = 900
//! ```

use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::auth::{AuthKeys, AuthProviderConfig};
use crate::error::ConfigError;
use crate::middleware::{DEFAULT_NAME_KEY, DEFAULT_VALUE_KEY};
use crate::request::{DEFAULT_ACTION_ATTRIBUTE, DEFAULT_ROUTE_ATTRIBUTE, DEFAULT_USER_ATTRIBUTE};

/// Root configuration.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Prefix prepended to every route path.
    pub base_path: String,
    pub routing: RoutingConfig,
    pub csrf: CsrfConfig,
    pub auth: AuthConfig,
    pub server: ServerConfig,
}

/// Attribute keys written by the routing middleware.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RoutingConfig {
    pub action_attribute: String,
    pub route_attribute: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            action_attribute: DEFAULT_ACTION_ATTRIBUTE.to_owned(),
            route_attribute: DEFAULT_ROUTE_ATTRIBUTE.to_owned(),
        }
    }
}

/// Field names carrying the CSRF pair, in bodies and headers alike.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct CsrfConfig {
    pub name_key: String,
    pub value_key: String,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            name_key: DEFAULT_NAME_KEY.to_owned(),
            value_key: DEFAULT_VALUE_KEY.to_owned(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    #[serde(flatten)]
    pub keys: AuthKeys,
    pub user_attribute: String,
    pub provider: AuthProviderConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            keys: AuthKeys::default(),
            user_attribute: DEFAULT_USER_ATTRIBUTE.to_owned(),
            provider: AuthProviderConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// `host:port` to listen on.
    pub addr: String,
    /// Name of the cookie holding the session id.
    pub session_cookie: String,
    /// Request bodies larger than this are refused with 413.
    pub max_body_bytes: usize,
    /// Seconds a session may sit unused before it is dropped.
    pub session_idle_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:3000".to_owned(),
            session_cookie: "tollgate_session".to_owned(),
            max_body_bytes: 1024 * 1024,
            session_idle_secs: 30 * 60,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.addr.parse().map_err(|_| ConfigError::Address(self.addr.clone()))
    }

    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }
}

impl Config {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.auth.provider.validate()?;
        self.server.socket_addr()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_all_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.routing.action_attribute, "__action");
        assert_eq!(config.csrf.name_key, "csrf-name");
        assert_eq!(config.auth.keys.user_hash_key, "__user_hash");
        assert_eq!(config.auth.user_attribute, "__user");
        assert_eq!(config.server.session_cookie, "tollgate_session");
    }

    #[test]
    fn nested_tables_override_defaults() {
        let config = Config::from_toml_str(
            r#"
            base_path = "/app"

            [auth]
            user_id_key = "uid"

            [auth.provider]
            login_uri = "/login"
            roles = ["admin"]

            [auth.provider.role_permissions]
            admin = ["users.manage"]

            [server]
            addr = "0.0.0.0:8080"
            max_body_bytes = 4096
            "#,
        )
        .unwrap();

        assert_eq!(config.base_path, "/app");
        assert_eq!(config.auth.keys.user_id_key, "uid");
        assert_eq!(config.auth.keys.user_hash_key, "__user_hash");
        assert_eq!(config.auth.provider.permissions_of("admin"), Some(&["users.manage".to_owned()][..]));
        assert_eq!(config.server.socket_addr().unwrap().port(), 8080);
        assert_eq!(config.server.max_body_bytes, 4096);
        assert_eq!(config.server.session_idle(), Duration::from_secs(1800));
    }

    #[test]
    fn inconsistent_role_table_is_rejected() {
        let err = Config::from_toml_str(
            r#"
            [auth.provider]
            roles = ["admin", "editor"]

            [auth.provider.role_permissions]
            admin = []
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnmappedRole(r) if r == "editor"));
    }

    #[test]
    fn bad_address_and_bad_toml_are_rejected() {
        let err = Config::from_toml_str("[server]\naddr = \"nowhere\"").unwrap_err();
        assert!(matches!(err, ConfigError::Address(a) if a == "nowhere"));
        assert!(matches!(Config::from_toml_str("base_path = ["), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(Config::load("/definitely/not/here.toml"), Err(ConfigError::Io(_))));
    }
}
