//! Middleware composition.
//!
//! A middleware is a pure function from the next handler to a new handler.
//! [`chain`] folds an ordered sequence of them around a terminal handler,
//! first-registered outermost, producing one composed [`Handler`] that is
//! built once at startup and reused for every request. The composed value
//! holds no per-request state and is safe for unlimited concurrent
//! invocation.

mod access_log;
mod recover;

pub use access_log::AccessLog;
pub use recover::Recover;

use crate::context::Context;
use crate::status::Status;
use futures::future::BoxFuture;
use std::sync::Arc;

pub type Handler = Arc<dyn Fn(Arc<Context>) -> BoxFuture<'static, Status> + Send + Sync>;

pub trait Middleware: Send + Sync {
    fn wrap(&self, next: Handler) -> Handler;
}

impl<F> Middleware for F
where
    F: Fn(Handler) -> Handler + Send + Sync,
{
    fn wrap(&self, next: Handler) -> Handler {
        (self)(next)
    }
}

/// Right fold: the terminal handler is wrapped by the last middleware
/// first, so the first-registered middleware observes the request first.
pub fn chain(middlewares: &[Arc<dyn Middleware>], endpoint: Handler) -> Handler {
    let mut handler = endpoint;
    for middleware in middlewares.iter().rev() {
        handler = middleware.wrap(handler);
    }
    handler
}
