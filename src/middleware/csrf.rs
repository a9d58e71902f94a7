use tracing::{debug, warn};

use super::{Middleware, Next};
use crate::error::{CsrfRejection, CsrfToken, Error};
use crate::method::Method;
use crate::request::RequestContext;
use crate::response::Response;
use crate::session::SharedSession;
use crate::token::{mask, random_hex, unmask};

pub const DEFAULT_NAME_KEY: &str = "csrf-name";
pub const DEFAULT_VALUE_KEY: &str = "csrf-value";

/// Double-submit CSRF protection.
///
/// State-changing requests (POST, PUT, DELETE, PATCH) must send back a
/// name/value pair issued earlier: `name` selects the stored raw token and
/// `value` is that token masked. The stored token is consumed by the lookup,
/// matched or not. Safe requests must not send a name at all.
///
/// Every request, accepted or rejected, leaves with a freshly minted pair:
/// in the context attributes under the configured keys when it continues,
/// inside [`Error::CsrfFailure`] when it does not.
pub struct CsrfMiddleware {
    session: SharedSession,
    name_key: String,
    value_key: String,
}

impl CsrfMiddleware {
    pub fn new(session: SharedSession) -> Self {
        Self::with_keys(session, DEFAULT_NAME_KEY, DEFAULT_VALUE_KEY)
    }

    pub fn with_keys(session: SharedSession, name_key: &str, value_key: &str) -> Self {
        Self {
            session,
            name_key: name_key.to_owned(),
            value_key: value_key.to_owned(),
        }
    }

    /// Reads the submitted pair from the parsed body, or from the headers of
    /// the same names when the body carries neither.
    fn submitted<'a>(&self, ctx: &'a RequestContext) -> (Option<&'a str>, Option<&'a str>) {
        let request = ctx.request();
        match (request.field(&self.name_key), request.field(&self.value_key)) {
            (None, None) => (request.header(&self.name_key), request.header(&self.value_key)),
            pair => pair,
        }
    }

    fn check(&self, ctx: &RequestContext) -> Result<(), CsrfRejection> {
        let (name, value) = self.submitted(ctx);
        let state_changing = ctx.method()
            .parse::<Method>()
            .is_ok_and(Method::is_state_changing);

        // A name field is refused on safe methods even when it is empty.
        if !state_changing {
            return match name {
                Some(_) => Err(CsrfRejection::TokenOnSafeMethod),
                None => Ok(()),
            };
        }

        let value = value.filter(|s| !s.is_empty());
        let Some(name) = name.filter(|s| !s.is_empty()) else {
            return Err(CsrfRejection::MissingToken);
        };
        let candidate = value.map(unmask);
        // The lookup consumes the stored token even if the value is unusable.
        let accepted = self.session.validate_csrf_token(
            name,
            candidate.as_ref().and_then(Option::as_deref).unwrap_or_default(),
        );
        match candidate {
            None => Err(CsrfRejection::MissingToken),
            Some(None) => Err(CsrfRejection::MalformedToken),
            Some(Some(_)) if !accepted => Err(CsrfRejection::TokenMismatch),
            Some(Some(_)) => Ok(()),
        }
    }

    /// Stores a new raw token under a new name and returns the pair to render.
    fn reissue(&self) -> CsrfToken {
        let name = format!("csrf{}", random_hex(8));
        let raw = self.session.csrf_token(&name, true);
        CsrfToken { value: mask(raw.as_bytes()), name }
    }
}

impl Middleware for CsrfMiddleware {
    fn process(&self, mut ctx: RequestContext, next: &mut dyn Next) -> Result<Response, Error> {
        let outcome = self.check(&ctx);
        let token = self.reissue();

        if let Err(reason) = outcome {
            warn!(method = %ctx.method(), path = %ctx.path(), %reason, "csrf check failed");
            return Err(Error::CsrfFailure { reason, token });
        }

        debug!(name = %token.name, "csrf token issued");
        ctx.set_text(self.name_key.as_str(), token.name);
        ctx.set_text(self.value_key.as_str(), token.value);
        next.handle(ctx)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::request::Request;
    use crate::session::{MemorySession, Session};

    /// Echoes the reissued pair as `name=value`.
    struct Echo;

    impl Next for Echo {
        fn handle(&mut self, ctx: RequestContext) -> Result<Response, Error> {
            let name = ctx.text(DEFAULT_NAME_KEY).unwrap_or_default();
            let value = ctx.text(DEFAULT_VALUE_KEY).unwrap_or_default();
            Ok(Response::text(format!("{name}={value}")))
        }
    }

    fn setup() -> (Arc<MemorySession>, CsrfMiddleware) {
        let session = Arc::new(MemorySession::new());
        let mw = CsrfMiddleware::new(session.clone());
        (session, mw)
    }

    fn run(mw: &CsrfMiddleware, req: Request) -> Result<Response, Error> {
        mw.process(RequestContext::new(req), &mut Echo)
    }

    fn rejection(res: Result<Response, Error>) -> CsrfRejection {
        match res {
            Err(Error::CsrfFailure { reason, .. }) => reason,
            other => panic!("expected csrf failure, got {other:?}"),
        }
    }

    /// Issues a pair as a previous render would have.
    fn issue(session: &MemorySession, name: &str) -> String {
        mask(session.csrf_token(name, true).as_bytes())
    }

    #[test]
    fn plain_get_passes_and_receives_a_token() {
        let (session, mw) = setup();
        let res = run(&mw, Request::new("GET", "/form")).unwrap();
        let body = String::from_utf8(res.body().to_vec()).unwrap();
        let (name, value) = body.split_once('=').unwrap();
        assert!(name.starts_with("csrf"));
        assert_eq!(unmask(value).map(String::from_utf8), Some(Ok(session.csrf_token(name, false))));
    }

    #[test]
    fn get_carrying_a_token_name_fails() {
        let (_, mw) = setup();
        let req = Request::new("GET", "/").with_form([("csrf-name", "csrf1")]);
        assert_eq!(rejection(run(&mw, req)), CsrfRejection::TokenOnSafeMethod);
    }

    #[test]
    fn get_carrying_an_empty_token_name_fails() {
        let (_, mw) = setup();
        let req = Request::new("GET", "/")
            .with_header("content-type", "application/x-www-form-urlencoded")
            .with_body("csrf-name=");
        assert_eq!(rejection(run(&mw, req)), CsrfRejection::TokenOnSafeMethod);

        let req = Request::new("HEAD", "/").with_header("csrf-name", "");
        assert_eq!(rejection(run(&mw, req)), CsrfRejection::TokenOnSafeMethod);
    }

    #[test]
    fn empty_fields_on_post_count_as_missing() {
        let (_, mw) = setup();
        let req = Request::new("POST", "/").with_form([("csrf-name", ""), ("csrf-value", "")]);
        assert_eq!(rejection(run(&mw, req)), CsrfRejection::MissingToken);
    }

    #[test]
    fn valid_post_succeeds_once() {
        let (session, mw) = setup();
        let value = issue(&session, "csrf1");
        let form = [("csrf-name", "csrf1"), ("csrf-value", value.as_str())];

        assert!(run(&mw, Request::new("POST", "/save").with_form(form)).is_ok());
        assert_eq!(
            rejection(run(&mw, Request::new("POST", "/save").with_form(form))),
            CsrfRejection::TokenMismatch,
        );
    }

    #[test]
    fn mismatch_consumes_the_stored_token() {
        let (session, mw) = setup();
        let good = issue(&session, "csrf1");
        let bad = mask(b"not the token");

        let req = Request::new("PUT", "/").with_form([("csrf-name", "csrf1"), ("csrf-value", bad.as_str())]);
        assert_eq!(rejection(run(&mw, req)), CsrfRejection::TokenMismatch);

        let req = Request::new("PUT", "/").with_form([("csrf-name", "csrf1"), ("csrf-value", good.as_str())]);
        assert_eq!(rejection(run(&mw, req)), CsrfRejection::TokenMismatch);
    }

    #[test]
    fn missing_and_malformed_values_are_told_apart() {
        let (session, mw) = setup();
        issue(&session, "a");
        issue(&session, "b");

        let req = Request::new("POST", "/").with_form([("csrf-name", "a")]);
        assert_eq!(rejection(run(&mw, req)), CsrfRejection::MissingToken);

        let req = Request::new("POST", "/").with_form([("csrf-name", "b"), ("csrf-value", "!!not base64")]);
        assert_eq!(rejection(run(&mw, req)), CsrfRejection::MalformedToken);

        let req = Request::new("DELETE", "/");
        assert_eq!(rejection(run(&mw, req)), CsrfRejection::MissingToken);

        // Both named tokens were consumed; only the reissued ones remain.
        assert!(!session.validate_csrf_token("a", b""));
        assert!(!session.validate_csrf_token("b", b""));
    }

    #[test]
    fn headers_are_the_fallback() {
        let (session, mw) = setup();
        let value = issue(&session, "csrf1");
        let req = Request::new("DELETE", "/users/1")
            .with_header("csrf-name", "csrf1")
            .with_header("csrf-value", &value);
        assert!(run(&mw, req).is_ok());
    }

    #[test]
    fn failure_still_issues_a_usable_token() {
        let (session, mw) = setup();
        let Err(Error::CsrfFailure { token, .. }) = run(&mw, Request::new("PATCH", "/")) else {
            panic!("expected csrf failure");
        };
        let form = [("csrf-name", token.name.as_str()), ("csrf-value", token.value.as_str())];
        assert!(run(&mw, Request::new("PATCH", "/").with_form(form)).is_ok());
        // One token left: the one minted by the successful retry.
        assert_eq!(session.pending_tokens(), 1);
    }
}
