//! Logging handle injected into the dispatcher, context, and middleware.
//!
//! There is no global logger in this crate. A [`Logger`] is constructed once
//! at startup around any [`log::Log`] sink and passed explicitly to
//! everything that emits log lines, which keeps tests hermetic: hand the
//! app a [`MemoryLog`] and assert on what it captured.

use crate::error::ServerError;
use log::{Level, LevelFilter, Log, Record};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn Log>,
    level: LevelFilter,
}

impl Logger {
    pub fn new(sink: Arc<dyn Log>) -> Self {
        Self {
            sink,
            level: LevelFilter::Debug,
        }
    }

    /// A logger writing plain lines to stderr.
    pub fn stderr() -> Self {
        Self::new(Arc::new(StderrLog))
    }

    pub fn with_level(mut self, level: LevelFilter) -> Self {
        self.level = level;
        self
    }

    pub fn error(&self, error: Option<&ServerError>, message: &str) {
        self.write(Level::Error, error, message);
    }

    pub fn warning(&self, error: Option<&ServerError>, message: &str) {
        self.write(Level::Warn, error, message);
    }

    pub fn info(&self, message: &str) {
        self.write(Level::Info, None, message);
    }

    pub fn debug(&self, message: &str) {
        self.write(Level::Debug, None, message);
    }

    fn write(&self, level: Level, error: Option<&ServerError>, message: &str) {
        if level > self.level {
            return;
        }
        let text = match error {
            Some(error) => format!("{}\n{}", message, error.render()),
            None => message.to_string(),
        };
        self.sink.log(
            &Record::builder()
                .args(format_args!("{}", text))
                .level(level)
                .target("strand")
                .build(),
        );
    }
}

/// Minimal stderr sink. Sink formatting carries no guarantees; swap in any
/// [`log::Log`] implementation for real deployments.
pub struct StderrLog;

impl Log for StderrLog {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        eprintln!("{:<5} {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

/// Capturing sink for tests: records every entry as `(level, text)`.
#[derive(Default)]
pub struct MemoryLog {
    entries: Mutex<Vec<(Level, String)>>,
}

impl MemoryLog {
    pub fn entries(&self) -> Vec<(Level, String)> {
        self.entries.lock().clone()
    }

    /// Number of captured entries whose text contains `needle`.
    pub fn count_containing(&self, needle: &str) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|(_, text)| text.contains(needle))
            .count()
    }

    /// Entries at exactly `level` whose text contains `needle`.
    pub fn count_at(&self, level: Level, needle: &str) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|(l, text)| *l == level && text.contains(needle))
            .count()
    }
}

impl Log for MemoryLog {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        self.entries
            .lock()
            .push((record.level(), record.args().to_string()));
    }

    fn flush(&self) {}
}
