//! # Strand
//!
//! A small, composable HTTP request pipeline for Rust.
//!
//! Strand is not a full web framework. It is the core of one: ordered
//! middleware composed around request handlers, a request-scoped [`Context`]
//! carrying identity and structured error data, a [`Status`] outcome returned
//! by every handler, and a fully buffered response writer that commits
//! headers and body atomically once the whole chain has unwound.
//!
//! ## Features
//!
//! - Onion-ordered middleware (first registered runs outermost)
//! - Per-request context with a unique id and an append-only description
//!   chain for error correlation
//! - Panic containment: a panicking handler yields a logged 500, never a
//!   crashed process or a truncated response
//! - One structured access-log line per request, panics included
//! - Template rendering and static file serving as thin collaborators
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use strand::app::App;
//! use strand::logger::Logger;
//!
//! let mut app = App::new(Logger::stderr());
//!
//! app.get("/", |ctx| async move {
//!     ctx.write(b"hello");
//!     ctx.ok()
//! });
//!
//! app.listen("127.0.0.1:3000").unwrap();
//! ```
//!
//! ## Middleware Usage
//!
//! ```rust
//! use strand::app::App;
//! use strand::logger::Logger;
//! use strand::middleware::Handler;
//! use std::sync::Arc;
//!
//! let mut app = App::new(Logger::stderr());
//! app.use_middleware(|next: Handler| -> Handler {
//!     Arc::new(move |ctx| {
//!         let next = next.clone();
//!         Box::pin(async move {
//!             ctx.describe("layer", "outer");
//!             next(ctx).await
//!         })
//!     })
//! });
//! ```
//!
//! [`Context`]: context::Context
//! [`Status`]: status::Status

pub mod app;
pub mod assert;
pub mod context;
pub mod error;
pub mod http;
pub mod logger;
pub mod middleware;
pub mod router;
pub mod static_files;
pub mod status;
pub mod template;
pub extern crate serde_json;

// Reexport serde_json
pub use serde_json::{json, Value};
