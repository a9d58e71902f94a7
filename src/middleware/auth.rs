use std::sync::Arc;

use tracing::{debug, warn};

use super::{Middleware, Next};
use crate::auth::{AuthKeys, AuthModel, AuthProviderConfig, UserIdentity, UserPrincipal};
use crate::error::Error;
use crate::request::{Attribute, DEFAULT_USER_ATTRIBUTE, RequestContext};
use crate::response::Response;
use crate::session::SharedSession;

/// Resolves the session's stored credentials into a [`UserPrincipal`].
///
/// Never rejects a request. An unknown user or a hash that no longer matches
/// (different user agent, changed e-mail, forged cookie) clears the stored
/// credentials and the request continues as anonymous.
pub struct AuthMiddleware {
    provider: Arc<AuthProviderConfig>,
    model: Arc<dyn AuthModel>,
    session: SharedSession,
    keys: AuthKeys,
    user_attribute: String,
}

impl AuthMiddleware {
    pub fn new(provider: Arc<AuthProviderConfig>, model: Arc<dyn AuthModel>, session: SharedSession) -> Self {
        Self {
            provider,
            model,
            session,
            keys: AuthKeys::default(),
            user_attribute: DEFAULT_USER_ATTRIBUTE.to_owned(),
        }
    }

    pub fn with_keys(mut self, keys: AuthKeys) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_user_attribute(mut self, key: &str) -> Self {
        self.user_attribute = key.to_owned();
        self
    }

    fn resolve(&self, ctx: &RequestContext) -> UserPrincipal {
        let id = self.session.get(&self.keys.user_id_key);
        let hash = self.session.get(&self.keys.user_hash_key);
        let (Some(id), Some(hash)) = (id, hash) else {
            debug!(path = %ctx.path(), "no stored credentials");
            return UserPrincipal::anonymous(Arc::clone(&self.provider));
        };

        let user_agent = ctx.request().user_agent();
        match self.model.user(&id) {
            Some(record) if self.model.validate_hash(&record, user_agent, &hash) => {
                let roles = self.model.roles(&record);
                let permissions = self.provider.expand(&roles);
                debug!(user = %id, roles = roles.len(), "user resolved");
                UserPrincipal::new(
                    Arc::clone(&self.provider),
                    UserIdentity::new(id, roles, permissions, record),
                )
            }
            found => {
                warn!(
                    user = %id,
                    reason = if found.is_some() { "hash mismatch" } else { "unknown user" },
                    "clearing stored credentials"
                );
                self.session.unset(&self.keys.user_id_key);
                self.session.unset(&self.keys.user_hash_key);
                UserPrincipal::anonymous(Arc::clone(&self.provider))
            }
        }
    }
}

impl Middleware for AuthMiddleware {
    fn process(&self, mut ctx: RequestContext, next: &mut dyn Next) -> Result<Response, Error> {
        let principal = self.resolve(&ctx);
        ctx.set_attribute(self.user_attribute.as_str(), Attribute::User(Arc::new(principal)));
        next.handle(ctx)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashMap};

    use super::*;
    use crate::auth::{MemoryUsers, sign_in, user_hash};
    use crate::request::Request;
    use crate::session::{MemorySession, Session};

    const AGENT: &str = "Mozilla/5.0 (test)";

    /// Reports who the request was resolved to.
    struct Whoami;

    impl Next for Whoami {
        fn handle(&mut self, ctx: RequestContext) -> Result<Response, Error> {
            let user = ctx.user().ok_or(Error::MissingHandler)?;
            let perms: Vec<&str> = user.identity().permissions().iter().map(String::as_str).collect();
            Ok(Response::text(format!(
                "{}|{}",
                user.identity().id().unwrap_or("anonymous"),
                perms.join(","),
            )))
        }
    }

    fn provider() -> Arc<AuthProviderConfig> {
        Arc::new(AuthProviderConfig {
            roles: vec!["admin".into(), "editor".into()],
            role_permissions: HashMap::from([
                ("admin".into(), vec!["users.manage".into()]),
                ("editor".into(), vec!["posts.edit".into(), "posts.publish".into()]),
            ]),
            ..AuthProviderConfig::default()
        })
    }

    fn users() -> Arc<MemoryUsers> {
        Arc::new(MemoryUsers::new().with_user("42", [("email", "ana@example.com"), ("role", "admin,editor")]))
    }

    fn run(session: &Arc<MemorySession>) -> String {
        let mw = AuthMiddleware::new(provider(), users(), session.clone());
        let ctx = RequestContext::new(Request::new("GET", "/").with_header("User-Agent", AGENT));
        let res = mw.process(ctx, &mut Whoami).unwrap();
        String::from_utf8(res.body().to_vec()).unwrap()
    }

    #[test]
    fn matching_hash_resolves_the_user() {
        let session = Arc::new(MemorySession::new());
        session.set("__user_id", "42".into());
        session.set("__user_hash", user_hash("ana@example.com", AGENT));

        assert_eq!(run(&session), "42|posts.edit,posts.publish,users.manage");
    }

    #[test]
    fn mismatched_hash_clears_credentials() {
        let session = Arc::new(MemorySession::new());
        session.set("__user_id", "42".into());
        session.set("__user_hash", user_hash("ana@example.com", "some other browser"));

        assert_eq!(run(&session), "anonymous|");
        assert!(!session.has("__user_id"));
        assert!(!session.has("__user_hash"));
    }

    #[test]
    fn unknown_user_clears_credentials() {
        let session = Arc::new(MemorySession::new());
        session.set("__user_id", "7".into());
        session.set("__user_hash", "whatever".into());

        assert_eq!(run(&session), "anonymous|");
        assert!(!session.has("__user_id"));
    }

    #[test]
    fn half_stored_credentials_are_left_alone() {
        let session = Arc::new(MemorySession::new());
        session.set("__user_id", "42".into());

        assert_eq!(run(&session), "anonymous|");
        assert!(session.has("__user_id"));
    }

    #[test]
    fn sign_in_round_trips_through_the_middleware() {
        let session = Arc::new(MemorySession::new());
        let model = users();
        let record = model.user("42").unwrap();
        sign_in(session.as_ref(), &AuthKeys::default(), model.as_ref(), "42", &record, AGENT);

        assert!(run(&session).starts_with("42|"));
    }

    #[test]
    fn custom_keys_and_attribute() {
        let session = Arc::new(MemorySession::new());
        session.set("uid", "42".into());
        session.set("uhash", user_hash("ana@example.com", ""));

        let keys = AuthKeys { user_id_key: "uid".into(), user_hash_key: "uhash".into() };
        let mw = AuthMiddleware::new(provider(), users(), session.clone())
            .with_keys(keys)
            .with_user_attribute("principal");

        struct Check;
        impl Next for Check {
            fn handle(&mut self, ctx: RequestContext) -> Result<Response, Error> {
                assert!(ctx.user().is_none());
                let user = ctx.user_at("principal").ok_or(Error::MissingHandler)?;
                assert!(user.has_role(&["editor", "ghost"]));
                assert_eq!(user.identity().roles(), &BTreeSet::from(["admin".to_owned(), "editor".to_owned()]));
                Ok(Response::default())
            }
        }
        mw.process(RequestContext::new(Request::new("GET", "/")), &mut Check).unwrap();
    }
}
