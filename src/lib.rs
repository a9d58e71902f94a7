//! # tollgate
//!
//! A small HTTP request pipeline: named routes, an ordered middleware chain,
//! CSRF protection and session-backed authentication.
//!
//! ## The request lifecycle
//!
//! Every request runs through the same chain, built fresh for it by
//! [`App::executor`]:
//!
//! - **routing** resolves `(method, path)` to a named route, writes its path
//!   parameters and handler into the request's attributes, or fails with a
//!   404 / 405 fault;
//! - **auth** turns the session's stored user id and hash into a
//!   [`UserPrincipal`], falling back to an anonymous one;
//! - **csrf** checks the submitted token pair on state-changing methods and
//!   issues a new pair for the next form;
//! - any extra [`layer`](App::layer)s run next, in registration order;
//! - **action** calls the handler.
//!
//! Faults travel back up as [`Error`] and become responses in
//! [`App::respond`]. Configuration faults ([`ConfigError`]) abort startup.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use tollgate::{App, Config, MemoryUsers, RequestContext, RouteTable, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let routes = RouteTable::new()
//!         .route("user.show", "GET",  "/users/{id}", show_user)?
//!         .route("user.save", "POST", "/users",      save_user)?;
//!
//!     let config = Config::default();
//!     let server = Server::from_config(&config.server)?;
//!     let app = App::new(config, routes, Arc::new(MemoryUsers::new()))?;
//!
//!     server.serve(app).await?;
//!     Ok(())
//! }
//!
//! fn show_user(ctx: &RequestContext) -> String {
//!     format!("user {}", ctx.param("id").unwrap_or("unknown"))
//! }
//!
//! fn save_user(ctx: &RequestContext) -> String {
//!     // Only reached with a valid CSRF pair.
//!     format!("saved {}", ctx.request().field("name").unwrap_or(""))
//! }
//! ```

mod app;
mod auth;
mod config;
mod dispatcher;
mod error;
mod handler;
mod method;
mod request;
mod response;
mod router;
mod server;
mod session;

pub mod middleware;
pub mod token;

pub use app::App;
pub use auth::{
    AuthKeys, AuthModel, AuthProviderConfig, MemoryUsers, OneOrMany, UserIdentity, UserPrincipal,
    UserRecord, sign_in, sign_out, user_hash,
};
pub use config::{AuthConfig, Config, CsrfConfig, RoutingConfig, ServerConfig};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use error::{ConfigError, CsrfRejection, CsrfToken, Error};
pub use handler::{BoxedHandler, Handler};
pub use method::{Method, UnknownMethod};
pub use request::{
    Attribute, DEFAULT_ACTION_ATTRIBUTE, DEFAULT_ROUTE_ATTRIBUTE, DEFAULT_USER_ATTRIBUTE, Request,
    RequestContext,
};
pub use response::{ContentType, IntoResponse, Response, ResponseBuilder};
pub use router::{Methods, Route, RouteDefinition, RouteTable, Router};
pub use server::Server;
pub use session::{
    DEFAULT_CAPTCHA_LEN, DEFAULT_MAX_CSRF_TOKENS, DEFAULT_SESSION_IDLE, FlashKind, FlashMessage,
    MemorySession, Session, SessionStore, SharedSession,
};
