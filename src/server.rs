//! HTTP server and graceful shutdown.
//!
//! The server owns the transport concerns around an [`App`]: it collects the
//! body (refusing any larger than `max_body_bytes` with 413), finds the client's session from its cookie (issuing one when there
//! is none), runs the pipeline and writes the response.
//!
//! # Graceful shutdown
//!
//! On SIGTERM or Ctrl-C the server:
//! 1. Stops `listener.accept()`. No new connections are made.
//! 2. Lets every in-flight connection task run to completion.
//! 3. Returns from [`Server::serve`], which lets `main` exit cleanly.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http::header::{COOKIE, HeaderMap};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Incoming};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::app::App;
use crate::config::ServerConfig;
use crate::error::{ConfigError, Error};
use crate::request::Request;
use crate::response::Response;
use crate::session::SessionStore;

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
    session_cookie: String,
    max_body_bytes: usize,
    sessions: Arc<SessionStore>,
}

/// What every connection task shares.
struct Shared {
    app: App,
    sessions: Arc<SessionStore>,
    session_cookie: String,
    max_body_bytes: usize,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// ```rust
    /// use tollgate::Server;
    /// assert!(Server::bind("0.0.0.0:3000").is_ok());
    /// assert!(Server::bind("nowhere").is_err());
    /// ```
    pub fn bind(addr: &str) -> Result<Self, ConfigError> {
        Self::from_config(&ServerConfig { addr: addr.to_owned(), ..ServerConfig::default() })
    }

    pub fn from_config(config: &ServerConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            addr: config.socket_addr()?,
            session_cookie: config.session_cookie.clone(),
            max_body_bytes: config.max_body_bytes,
            sessions: Arc::new(SessionStore::with_idle_timeout(config.session_idle())),
        })
    }

    /// Uses `sessions` instead of a private store, so sessions outlive this
    /// server or can be inspected from outside.
    pub fn with_sessions(mut self, sessions: Arc<SessionStore>) -> Self {
        self.sessions = sessions;
        self
    }

    /// Starts accepting connections and running them through `app`.
    ///
    /// Returns only after a full graceful shutdown (SIGTERM or Ctrl-C,
    /// followed by all in-flight requests completing).
    pub async fn serve(self, app: App) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;
        let shared = Arc::new(Shared {
            app,
            sessions: self.sessions,
            session_cookie: self.session_cookie,
            max_body_bytes: self.max_body_bytes,
        });

        info!(addr = %self.addr, routes = shared.app.router().table().len(), "tollgate listening");

        let mut tasks = tokio::task::JoinSet::new();

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Check shutdown first so a signal stops accepting at once,
                // even if more connections are queued.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let shared = Arc::clone(&shared);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        let svc = service_fn(move |req| {
                            let shared = Arc::clone(&shared);
                            async move { dispatch(&shared, req).await }
                        });

                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished tasks so the set does not grow on long runs.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("tollgate stopped");
        Ok(())
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// One request in, one response out. Every failure is already a response
/// by the time it gets here, so hyper never sees an error.
async fn dispatch(
    shared: &Shared,
    req: hyper::Request<Incoming>,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match read_body(body, shared.max_body_bytes).await {
        Ok(body) => body,
        Err(status) => {
            warn!(path = %parts.uri.path(), %status, "request body refused");
            return Ok(Response::status(status).into_http());
        }
    };

    let cookie = session_id(&parts.headers, &shared.session_cookie);
    let (id, session, fresh) = shared.sessions.open(cookie);
    if fresh {
        debug!(path = %parts.uri.path(), "issuing session cookie");
    }

    let mut request = Request::new(parts.method.as_str(), parts.uri.path());
    for (name, value) in &parts.headers {
        match value.to_str() {
            Ok(v) => request = request.with_header(name.as_str(), v),
            Err(_) => debug!(header = %name, "skipping non-ascii header"),
        }
    }
    let request = request.with_body(body.to_vec());

    let mut response = shared.app.respond(request, session);
    if fresh {
        response.push_header(
            "set-cookie",
            &format!("{}={id}; Path=/; HttpOnly; SameSite=Lax", shared.session_cookie),
        );
    }
    Ok(response.into_http())
}

/// Collects at most `limit` bytes of `body`. Anything longer is 413, any
/// transport error is 400.
async fn read_body<B>(body: B, limit: usize) -> Result<Bytes, StatusCode>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            debug!(limit, "request body over limit");
            Err(StatusCode::PAYLOAD_TOO_LARGE)
        }
        Err(e) => {
            debug!("failed to read request body: {e}");
            Err(StatusCode::BAD_REQUEST)
        }
    }
}

/// The value of cookie `name`, from any `Cookie` header.
fn session_id<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v)
        .filter(|v| !v.is_empty())
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM or SIGINT (Ctrl-C). On Windows only Ctrl-C
/// is available. A handler that cannot be installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => { signal.recv().await; }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;

    #[test]
    fn session_cookie_is_found_among_others() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("theme=dark; tollgate_session=abc123"));
        headers.append(COOKIE, HeaderValue::from_static("other=1"));
        assert_eq!(session_id(&headers, "tollgate_session"), Some("abc123"));
        assert_eq!(session_id(&headers, "missing"), None);
    }

    #[test]
    fn empty_cookie_value_is_no_session() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("tollgate_session="));
        assert_eq!(session_id(&headers, "tollgate_session"), None);
    }

    #[test]
    fn bad_address_is_a_config_fault() {
        assert!(matches!(Server::bind("300.0.0.1:80"), Err(ConfigError::Address(_))));
        let server = Server::from_config(&ServerConfig::default()).unwrap();
        assert_eq!(server.addr.port(), 3000);
        assert_eq!(server.session_cookie, "tollgate_session");
        assert_eq!(server.max_body_bytes, 1024 * 1024);
        assert_eq!(server.sessions.idle_timeout(), ServerConfig::default().session_idle());
    }

    #[tokio::test]
    async fn body_within_limit_is_collected() {
        let body = Full::new(Bytes::from_static(b"csrf-name=a&csrf-value=b"));
        assert_eq!(read_body(body, 64).await, Ok(Bytes::from_static(b"csrf-name=a&csrf-value=b")));

        let exact = Full::new(Bytes::from(vec![b'x'; 64]));
        assert_eq!(read_body(exact, 64).await.map(|b| b.len()), Ok(64));
    }

    #[tokio::test]
    async fn oversized_body_is_refused_with_413() {
        let body = Full::new(Bytes::from(vec![b'x'; 65]));
        assert_eq!(read_body(body, 64).await, Err(StatusCode::PAYLOAD_TOO_LARGE));
    }
}
