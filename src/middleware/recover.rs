//! Panic containment.
//!
//! [`Recover`] wraps the downstream chain in a scoped unwind boundary. A
//! panic anywhere below it is caught, combined with a panic-site backtrace,
//! the client address, and a head-only request dump into one structured
//! error, logged, and converted into a definite 500 response. Any body
//! bytes buffered before the panic are discarded, so the client never sees
//! a truncated mix. The panic does not propagate and the process does not
//! crash.

use crate::context::Context;
use crate::error::ServerError;
use crate::logger::Logger;
use crate::middleware::{Handler, Middleware};
use crate::status::Status;
use futures::FutureExt;
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::Once;

const REQUEST_DUMP_LIMIT: usize = 2048;

static HOOK: Once = Once::new();

thread_local! {
    static BACKTRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

// The hook runs at the panic site, before unwinding destroys the frames a
// post-catch capture would miss. It is the one process-global this crate
// installs; std offers no per-instance panic hooks.
fn install_hook() {
    HOOK.call_once(|| {
        std::panic::set_hook(Box::new(|_info| {
            BACKTRACE.with(|slot| *slot.borrow_mut() = Some(Backtrace::force_capture()));
        }));
    });
}

fn take_backtrace() -> Option<Backtrace> {
    BACKTRACE.with(|slot| slot.borrow_mut().take())
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub struct Recover {
    logger: Logger,
}

impl Recover {
    pub fn new(logger: Logger) -> Self {
        install_hook();
        Self { logger }
    }
}

impl Middleware for Recover {
    fn wrap(&self, next: Handler) -> Handler {
        let logger = self.logger.clone();
        Arc::new(move |ctx: Arc<Context>| {
            let logger = logger.clone();
            let next = next.clone();
            Box::pin(async move {
                let outcome = AssertUnwindSafe(next(ctx.clone())).catch_unwind().await;
                let panic = match outcome {
                    Ok(status) => return status,
                    Err(panic) => panic,
                };

                let stack = take_backtrace()
                    .map(|trace| trace.to_string())
                    .unwrap_or_else(|| "backtrace unavailable".to_string());
                let request = ctx.request();

                let error = ServerError::new(panic_message(panic))
                    .describe("client", request.remote_addr.clone())
                    .describe("request", request.dump_head(REQUEST_DUMP_LIMIT))
                    .describe("stack", stack);

                logger.error(
                    Some(&error),
                    &format!("panic while serving {}", ctx.url()),
                );

                let writer = ctx.writer();
                writer.discard_body();
                writer.write_header(500);
                writer.set_header("Content-Type", "application/json");
                writer.write(&ctx.error_payload("internal server error"));

                Status::with_error(500, error)
            })
        })
    }
}
