//! Per-request context.
//!
//! A [`Context`] is created by the dispatcher for exactly one request and
//! never outlives it. It carries the unique request id, an append-only
//! description chain seeded with that id, a data bag for inter-middleware
//! communication, the parsed request, and the active response writer. The
//! status constructors on it (`ok`, `redirect`, `not_found`, `bad_request`,
//! `internal_error`) are the only way handlers produce outcomes, which is
//! what keeps client-visible error payloads uniform.

use crate::error::ServerError;
use crate::http::{Body, Request, ResponseWriter};
use crate::logger::Logger;
use crate::status::Status;
use crate::template::Templates;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use uuid::Uuid;

pub struct Context {
    id: String,
    request: Request,
    templates: Option<Arc<Templates>>,
    logger: Logger,
    state: Mutex<State>,
}

struct State {
    describe: Vec<(String, String)>,
    data: HashMap<String, Value>,
    params: HashMap<String, String>,
    writer: Arc<dyn ResponseWriter>,
}

// The wire contract for error replies. Only the request id and the rendered
// message ever reach a client; the structured error stays server-side.
#[derive(Serialize)]
struct ErrorPayload<'a> {
    request_id: &'a str,
    error: &'a str,
}

impl Context {
    pub fn new(
        writer: Arc<dyn ResponseWriter>,
        request: Request,
        templates: Option<Arc<Templates>>,
        logger: Logger,
    ) -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self {
            request,
            templates,
            logger,
            state: Mutex::new(State {
                describe: vec![("request_id".to_string(), id.clone())],
                data: HashMap::new(),
                params: HashMap::new(),
                writer,
            }),
            id,
        }
    }

    /// The unique request identifier, stable for the whole request.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn url(&self) -> String {
        self.request.url()
    }

    pub fn body(&self) -> &Body {
        &self.request.body
    }

    /// A route parameter extracted by the router, by name.
    pub fn param(&self, key: &str) -> Option<String> {
        self.state.lock().params.get(key).cloned()
    }

    pub fn query_param(&self, key: &str) -> Option<String> {
        self.request.query_param(key).map(str::to_string)
    }

    pub(crate) fn set_params(&self, params: HashMap<String, String>) {
        self.state.lock().params = params;
    }

    /// The active response writer. Middleware may replace it with a wrapper
    /// via [`Context::set_writer`]; handlers stay oblivious.
    pub fn writer(&self) -> Arc<dyn ResponseWriter> {
        self.state.lock().writer.clone()
    }

    pub fn set_writer(&self, writer: Arc<dyn ResponseWriter>) {
        self.state.lock().writer = writer;
    }

    pub fn write(&self, bytes: &[u8]) {
        self.writer().write(bytes);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.state.lock().data.get(key).cloned()
    }

    pub fn get_typed<T>(&self, key: &str) -> Option<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.state
            .lock()
            .data
            .get(key)
            .and_then(|value| serde_json::from_value(value.to_owned()).ok())
    }

    /// Stores a value in the data bag; last write wins.
    pub fn set<T>(&self, key: &str, value: T) -> &Self
    where
        T: Serialize,
    {
        if let Ok(value) = serde_json::to_value(value) {
            self.state.lock().data.insert(key.to_string(), value);
        }
        self
    }

    /// Appends a description entry for error correlation. Entries are never
    /// removed or deduplicated; duplicate keys are all retained.
    pub fn describe(&self, key: impl Into<String>, value: impl Into<String>) -> &Self {
        self.state.lock().describe.push((key.into(), value.into()));
        self
    }

    pub fn ok(&self) -> Status {
        Status::new(200)
    }

    pub fn redirect(&self, location: &str) -> Status {
        self.writer().set_header("Location", location);
        Status::new(302)
    }

    pub fn not_found(&self) -> Status {
        self.describe("status", "404");
        self.error(404, None, format!("not found: {:?}", self.url()))
    }

    pub fn bad_request(
        &self,
        cause: impl Into<Box<dyn Error + Send + Sync>>,
        message: impl Into<String>,
    ) -> Status {
        self.error(400, Some(cause.into()), message)
    }

    pub fn internal_error(
        &self,
        cause: impl Into<Box<dyn Error + Send + Sync>>,
        message: impl Into<String>,
    ) -> Status {
        self.error(500, Some(cause.into()), message)
    }

    /// Logs the full structured error, writes `code` and the sanitized JSON
    /// payload to the response, and returns the Status carrying the error
    /// for upstream middleware. The payload write cannot propagate a
    /// failure; a serialization error degrades to a 500 Status.
    pub fn error(
        &self,
        code: u16,
        cause: Option<Box<dyn Error + Send + Sync>>,
        message: impl Into<String>,
    ) -> Status {
        let message = message.into();
        let error = self.fault(cause, message.clone());

        self.logger.error(Some(&error), &message);

        let writer = self.writer();
        writer.write_header(code);

        let payload = ErrorPayload {
            request_id: &self.id,
            error: &message,
        };
        match serde_json::to_vec(&payload) {
            Ok(body) => {
                writer.set_header("Content-Type", "application/json");
                writer.write(&body);
                Status::with_error(code, error)
            }
            Err(err) => Status::with_error(
                500,
                ServerError::because(err, "unable to marshal error"),
            ),
        }
    }

    /// Renders the named template against the data bag. Fails fast with a
    /// descriptive internal error when no template set is configured.
    pub fn render(&self, name: &str) -> Status {
        let templates = match &self.templates {
            Some(templates) => templates.clone(),
            None => {
                return self.internal_error(
                    "no templates",
                    format!("unable to render template: {}", name),
                )
            }
        };

        let data = self.state.lock().data.clone();
        match templates.render(name, &data) {
            Ok(bytes) => {
                let writer = self.writer();
                writer.set_header("Content-Type", "text/html; charset=utf-8");
                writer.write(&bytes);
                self.ok()
            }
            Err(err) => self.internal_error(err, "unable to execute template"),
        }
    }

    pub(crate) fn error_payload(&self, message: &str) -> Vec<u8> {
        let payload = ErrorPayload {
            request_id: &self.id,
            error: message,
        };
        serde_json::to_vec(&payload).unwrap_or_default()
    }

    fn fault(&self, cause: Option<Box<dyn Error + Send + Sync>>, message: String) -> ServerError {
        let mut error = match cause {
            Some(cause) => ServerError::because(cause, message),
            None => ServerError::new(message),
        };
        for (key, value) in self.state.lock().describe.iter() {
            error = error.describe(key.clone(), value.clone());
        }
        error
    }
}
