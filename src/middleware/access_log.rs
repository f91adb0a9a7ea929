//! Access logging.
//!
//! One line per request, whatever happens below: final status code, method,
//! full URL, duration in seconds, remote address. The final code stays
//! observable even when the terminal handler never sets one explicitly,
//! because the context's writer is swapped for a code-capturing wrapper for
//! the duration of the inner chain.

use crate::context::Context;
use crate::logger::Logger;
use crate::middleware::{Handler, Middleware};
use crate::http::ResponseWriter;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// Delegating writer wrapper that remembers the last explicitly written
/// status code.
struct StatusCapture {
    inner: Arc<dyn ResponseWriter>,
    seen: Mutex<u16>,
}

impl StatusCapture {
    fn new(inner: Arc<dyn ResponseWriter>) -> Self {
        Self {
            inner,
            seen: Mutex::new(0),
        }
    }

    fn seen(&self) -> u16 {
        *self.seen.lock()
    }
}

impl ResponseWriter for StatusCapture {
    fn set_header(&self, name: &str, value: &str) {
        self.inner.set_header(name, value);
    }

    fn write_header(&self, code: u16) {
        *self.seen.lock() = code;
        self.inner.write_header(code);
    }

    fn write(&self, bytes: &[u8]) {
        self.inner.write(bytes);
    }

    fn code(&self) -> u16 {
        self.inner.code()
    }

    fn discard_body(&self) {
        self.inner.discard_body();
    }
}

pub struct AccessLog {
    logger: Logger,
}

impl AccessLog {
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }
}

impl Middleware for AccessLog {
    fn wrap(&self, next: Handler) -> Handler {
        let logger = self.logger.clone();
        Arc::new(move |ctx: Arc<Context>| {
            let logger = logger.clone();
            let next = next.clone();
            Box::pin(async move {
                let start = Instant::now();
                let capture = Arc::new(StatusCapture::new(ctx.writer()));
                ctx.set_writer(capture.clone());

                let status = next(ctx.clone()).await;

                let duration = start.elapsed();
                let code = if status.code != 0 {
                    status.code
                } else {
                    capture.seen()
                };

                let request = ctx.request();
                let line = format!(
                    "{{http}} {} {:>4} {} | {:.5} {}",
                    code,
                    request.method,
                    ctx.url(),
                    duration.as_secs_f64(),
                    request.remote_addr,
                );

                match &status.error {
                    Some(error) if code >= 500 => logger.error(Some(error), &line),
                    Some(error) => logger.warning(Some(error), &line),
                    None => logger.debug(&line),
                }

                status
            })
        })
    }
}
