//! Handler trait and type erasure.
//!
//! # How handlers are stored
//!
//! The route table holds handlers of *different* types, so each one is hidden
//! behind a trait object (`dyn ErasedHandler`) and shared as an `Arc`. The
//! same `Arc` is what the routing middleware writes into the request's
//! attribute bag, and what the terminal action middleware finally calls.
//!
//! ```text
//! fn show_user(ctx: &RequestContext) -> Response { … }   ← user writes this
//!        ↓ RouteTable::add("user.show", "GET", "/users/{id}", show_user)
//! show_user.into_boxed_handler()                         ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(show_user))                         ← stored as BoxedHandler
//!        ↓
//! handler.call(&ctx)  at request time                    ← one vtable dispatch
//! ```
//!
//! The pipeline is synchronous: a handler runs to completion on the thread
//! that drives the request.

use std::sync::Arc;

use crate::request::RequestContext;
use crate::response::{IntoResponse, Response};

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of the public `Handler` trait's `into_boxed_handler` method.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, ctx: &RequestContext) -> Response;
}

/// A type-erased handler shared between the route table and every request
/// that resolves to it.
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

/// Implemented for every valid route handler.
///
/// Satisfied automatically by any function or closure with the signature:
///
/// ```text
/// fn name(ctx: &RequestContext) -> impl IntoResponse
/// ```
///
/// Sealed: only the blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, R> private::Sealed for F
where
    F: Fn(&RequestContext) -> R + Send + Sync + 'static,
    R: IntoResponse,
{
}

impl<F, R> Handler for F
where
    F: Fn(&RequestContext) -> R + Send + Sync + 'static,
    R: IntoResponse,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Newtype that bridges a concrete `F` to [`ErasedHandler`].
struct FnHandler<F>(F);

impl<F, R> ErasedHandler for FnHandler<F>
where
    F: Fn(&RequestContext) -> R + Send + Sync,
    R: IntoResponse,
{
    fn call(&self, ctx: &RequestContext) -> Response {
        (self.0)(ctx).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Request;

    fn greet(ctx: &RequestContext) -> String {
        format!("hello {}", ctx.param("name").unwrap_or("nobody"))
    }

    #[test]
    fn functions_and_closures_erase_to_the_same_type() {
        let handlers: Vec<BoxedHandler> = vec![
            greet.into_boxed_handler(),
            (|_: &RequestContext| "static").into_boxed_handler(),
        ];
        let mut ctx = RequestContext::new(Request::new("GET", "/hello/ana"));
        ctx.set_text("name", "ana");
        assert_eq!(handlers[0].call(&ctx).body(), b"hello ana");
        assert_eq!(handlers[1].call(&ctx).body(), b"static");
    }
}
