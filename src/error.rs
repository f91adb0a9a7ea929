use std::error::Error;
use std::fmt;

/// A structured error: a message, an ordered chain of key/value description
/// entries, and an optional underlying cause.
///
/// Description entries are append-only and duplicate keys are retained in
/// order; later entries never shadow earlier ones. [`fmt::Display`] renders
/// the message alone (safe to show a client), while [`ServerError::render`]
/// produces the full server-side diagnostic including the description chain
/// and the cause chain.
#[derive(Debug)]
pub struct ServerError {
    message: String,
    describe: Vec<(String, String)>,
    cause: Option<Box<dyn Error + Send + Sync>>,
}

impl ServerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            describe: Vec::new(),
            cause: None,
        }
    }

    pub fn because(
        cause: impl Into<Box<dyn Error + Send + Sync>>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            describe: Vec::new(),
            cause: Some(cause.into()),
        }
    }

    /// Appends a description entry, returning the error for chaining.
    pub fn describe(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.describe.push((key.into(), value.into()));
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.describe
    }

    /// Renders the full diagnostic: message, description entries, and the
    /// cause chain. Logged server-side, never sent to a client.
    pub fn render(&self) -> String {
        let mut out = self.message.clone();
        for (key, value) in &self.describe {
            out.push_str(&format!("\n  {}: {}", key, value));
        }
        let mut source = self.cause.as_deref().map(|cause| cause as &dyn Error);
        while let Some(err) = source {
            out.push_str(&format!("\n  reason: {}", err));
            source = err.source();
        }
        out
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for ServerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause.as_deref().map(|cause| cause as &(dyn Error + 'static))
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
