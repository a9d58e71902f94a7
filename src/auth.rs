//! Users, roles and permissions.
//!
//! A logged-in client's session holds two values: the user id and a hash of
//! the user's unique attribute (e-mail by default) concatenated with the
//! client's user agent. [`AuthMiddleware`](crate::middleware::AuthMiddleware)
//! turns that pair back into a [`UserPrincipal`] on every request.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::ConfigError;
use crate::session::Session;
use crate::token::constant_time_eq;

/// A user record as returned by the data layer.
pub type UserRecord = BTreeMap<String, String>;

// ── Provider configuration ────────────────────────────────────────────────────

/// Static authorization settings, shared read-only by every request.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthProviderConfig {
    pub login_uri: String,
    pub logout_uri: String,
    pub roles: Vec<String>,
    pub role_permissions: HashMap<String, Vec<String>>,
}

impl AuthProviderConfig {
    pub fn provider_name(&self) -> &'static str {
        "User Authentication"
    }

    pub fn permissions_of(&self, role: &str) -> Option<&[String]> {
        self.role_permissions.get(role).map(Vec::as_slice)
    }

    /// Startup check of the role table.
    ///
    /// Every declared role needs a permission entry, and (when roles are
    /// declared at all) every permission entry needs a declared role.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(role) = self.roles.iter().find(|r| !self.role_permissions.contains_key(*r)) {
            return Err(ConfigError::UnmappedRole(role.clone()));
        }
        if !self.roles.is_empty() {
            let mut keys: Vec<&String> = self.role_permissions.keys().collect();
            keys.sort();
            if let Some(role) = keys.into_iter().find(|k| !self.roles.contains(*k)) {
                return Err(ConfigError::UndeclaredRole(role.clone()));
            }
        }
        Ok(())
    }

    /// Union of the permissions of every role in `roles`.
    ///
    /// A role without a table entry contributes nothing.
    pub fn expand(&self, roles: &BTreeSet<String>) -> BTreeSet<String> {
        let mut permissions = BTreeSet::new();
        for role in roles {
            match self.permissions_of(role) {
                Some(list) => permissions.extend(list.iter().cloned()),
                None => warn!(role = %role, "role has no permission entry"),
            }
        }
        permissions
    }
}

// ── Identity and principal ────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UserIdentity {
    id: Option<String>,
    roles: BTreeSet<String>,
    permissions: BTreeSet<String>,
    data: UserRecord,
}

impl UserIdentity {
    pub fn new(
        id: impl Into<String>,
        roles: BTreeSet<String>,
        permissions: BTreeSet<String>,
        data: UserRecord,
    ) -> Self {
        Self { id: Some(id.into()), roles, permissions, data }
    }

    /// No id, no roles, no permissions.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn id(&self) -> Option<&str> { self.id.as_deref() }
    pub fn roles(&self) -> &BTreeSet<String> { &self.roles }
    pub fn permissions(&self) -> &BTreeSet<String> { &self.permissions }
    pub fn data(&self) -> &UserRecord { &self.data }

    pub fn is_authenticated(&self) -> bool {
        self.id.as_deref().is_some_and(|id| !id.is_empty())
    }
}

/// One name, or several of which any may match.
pub trait OneOrMany {
    fn any_in(&self, set: &BTreeSet<String>) -> bool;
}

impl OneOrMany for str {
    fn any_in(&self, set: &BTreeSet<String>) -> bool { set.contains(self) }
}

impl OneOrMany for String {
    fn any_in(&self, set: &BTreeSet<String>) -> bool { set.contains(self) }
}

impl<T: AsRef<str>> OneOrMany for [T] {
    fn any_in(&self, set: &BTreeSet<String>) -> bool {
        self.iter().any(|x| set.contains(x.as_ref()))
    }
}

impl<T: AsRef<str>, const N: usize> OneOrMany for [T; N] {
    fn any_in(&self, set: &BTreeSet<String>) -> bool { self[..].any_in(set) }
}

impl<T: AsRef<str>> OneOrMany for Vec<T> {
    fn any_in(&self, set: &BTreeSet<String>) -> bool { self[..].any_in(set) }
}

/// The resolved user for the current request.
#[derive(Clone, Debug, PartialEq)]
pub struct UserPrincipal {
    provider: Arc<AuthProviderConfig>,
    identity: UserIdentity,
}

impl UserPrincipal {
    pub fn new(provider: Arc<AuthProviderConfig>, identity: UserIdentity) -> Self {
        Self { provider, identity }
    }

    pub fn anonymous(provider: Arc<AuthProviderConfig>) -> Self {
        Self::new(provider, UserIdentity::anonymous())
    }

    pub fn provider(&self) -> &AuthProviderConfig { &self.provider }
    pub fn provider_name(&self) -> &'static str { self.provider.provider_name() }
    pub fn identity(&self) -> &UserIdentity { &self.identity }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_authenticated()
    }

    /// `has_role("admin")`, or `has_role(["admin", "editor"])` for "either".
    pub fn has_role<Q: OneOrMany + ?Sized>(&self, role: &Q) -> bool {
        role.any_in(&self.identity.roles)
    }

    /// Same OR semantics as [`has_role`](Self::has_role).
    pub fn has_permission<Q: OneOrMany + ?Sized>(&self, permission: &Q) -> bool {
        permission.any_in(&self.identity.permissions)
    }
}

// ── Auth model ────────────────────────────────────────────────────────────────

/// `hex(sha256(unique ++ user_agent))`.
pub fn user_hash(unique: &str, user_agent: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(unique.as_bytes());
    hasher.update(user_agent.as_bytes());
    hex::encode(hasher.finalize())
}

/// Where user records come from and how they are interpreted.
///
/// Only [`user`](Self::user) is required; the rest have defaults matching a
/// conventional user table (`email`, `role`, comma-separated roles).
pub trait AuthModel: Send + Sync {
    fn user(&self, id: &str) -> Option<UserRecord>;

    fn unique_attribute(&self) -> &str { "email" }
    fn role_attribute(&self) -> &str { "role" }
    fn role_delimiter(&self) -> char { ',' }

    fn expected_hash(&self, record: &UserRecord, user_agent: &str) -> String {
        let unique = record.get(self.unique_attribute()).map_or("", String::as_str);
        user_hash(unique, user_agent)
    }

    fn validate_hash(&self, record: &UserRecord, user_agent: &str, candidate: &str) -> bool {
        constant_time_eq(self.expected_hash(record, user_agent).as_bytes(), candidate.as_bytes())
    }

    fn roles(&self, record: &UserRecord) -> BTreeSet<String> {
        record.get(self.role_attribute())
            .map(|field| {
                field.split(self.role_delimiter())
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// An [`AuthModel`] over a fixed set of records, keyed by id.
#[derive(Clone, Debug, Default)]
pub struct MemoryUsers {
    users: HashMap<String, UserRecord>,
}

impl MemoryUsers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user<I, K, V>(mut self, id: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let record = fields.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self.users.insert(id.to_owned(), record);
        self
    }
}

impl AuthModel for MemoryUsers {
    fn user(&self, id: &str) -> Option<UserRecord> {
        self.users.get(id).cloned()
    }
}

// ── Session keys ──────────────────────────────────────────────────────────────

/// Session keys holding the logged-in user's credentials.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct AuthKeys {
    pub user_id_key: String,
    pub user_hash_key: String,
}

impl Default for AuthKeys {
    fn default() -> Self {
        Self {
            user_id_key: "__user_id".to_owned(),
            user_hash_key: "__user_hash".to_owned(),
        }
    }
}

/// Stores the credentials a later request will resolve back to `id`.
pub fn sign_in(
    session: &dyn Session,
    keys: &AuthKeys,
    model: &dyn AuthModel,
    id: &str,
    record: &UserRecord,
    user_agent: &str,
) {
    session.set(&keys.user_id_key, id.to_owned());
    session.set(&keys.user_hash_key, model.expected_hash(record, user_agent));
}

pub fn sign_out(session: &dyn Session, keys: &AuthKeys) {
    session.unset(&keys.user_id_key);
    session.unset(&keys.user_hash_key);
}
