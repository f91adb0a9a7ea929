//! Buffered response writing.
//!
//! Nothing reaches the transport while the middleware chain is running.
//! Headers, the status code, and the body accumulate in memory and are
//! committed in one [`BufferedResponse::send`] call after the chain has
//! fully unwound, so a panic or a late error can still replace the whole
//! response. The client observes either a complete response or the
//! recovery error response, never a truncated mix.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// The writer seam handlers and middleware see. `write_header` stores the
/// code without forwarding it; the last call wins. `discard_body` empties
/// the buffered body, which is how panic recovery guarantees no partial
/// output survives.
pub trait ResponseWriter: Send + Sync {
    fn set_header(&self, name: &str, value: &str);
    fn write_header(&self, code: u16);
    fn write(&self, bytes: &[u8]);
    fn code(&self) -> u16;
    fn discard_body(&self);
}

struct ResponseState {
    code: u16,
    headers: HashMap<String, String>,
    body: Vec<u8>,
    committed: bool,
}

pub struct BufferedResponse {
    state: Mutex<ResponseState>,
}

impl BufferedResponse {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ResponseState {
                code: 200,
                headers: HashMap::new(),
                body: Vec::new(),
                committed: false,
            }),
        }
    }

    /// Commits the buffered response: status line, headers, Content-Length,
    /// then the body. Invoked exactly once by the dispatcher; a second call
    /// is a no-op so a transport error cannot double-send.
    pub async fn send<S>(&self, stream: &mut S) -> io::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let (code, headers, body) = {
            let mut state = self.state.lock();
            if state.committed {
                return Ok(());
            }
            state.committed = true;
            (state.code, state.headers.clone(), std::mem::take(&mut state.body))
        };

        let mut head = format!("HTTP/1.1 {}\r\n", code);
        for (name, value) in &headers {
            head += &format!("{}: {}\r\n", name, value);
        }
        head += &format!("Content-Length: {}\r\n\r\n", body.len());

        stream.write_all(head.as_bytes()).await?;
        stream.write_all(&body).await?;
        stream.flush().await?;
        Ok(())
    }
}

impl Default for BufferedResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseWriter for BufferedResponse {
    fn set_header(&self, name: &str, value: &str) {
        self.state
            .lock()
            .headers
            .insert(name.to_string(), value.to_string());
    }

    fn write_header(&self, code: u16) {
        self.state.lock().code = code;
    }

    fn write(&self, bytes: &[u8]) {
        self.state.lock().body.extend_from_slice(bytes);
    }

    fn code(&self) -> u16 {
        self.state.lock().code
    }

    fn discard_body(&self) {
        self.state.lock().body.clear();
    }
}
