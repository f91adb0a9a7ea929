use std::collections::HashMap;
use std::fmt;

#[derive(Eq, Hash, PartialEq, Copy, Clone, Debug)]
pub enum Method {
    GET,
    POST,
    PUT,
    DELETE,
    HEAD,
    CONNECT,
    OPTIONS,
    TRACE,
    PATCH,
}

impl Method {
    pub fn from_string(s: &str) -> Method {
        match s {
            "GET" => Method::GET,
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "DELETE" => Method::DELETE,
            "HEAD" => Method::HEAD,
            "CONNECT" => Method::CONNECT,
            "OPTIONS" => Method::OPTIONS,
            "TRACE" => Method::TRACE,
            "PATCH" => Method::PATCH,
            _ => Method::GET,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::CONNECT => "CONNECT",
            Method::OPTIONS => "OPTIONS",
            Method::TRACE => "TRACE",
            Method::PATCH => "PATCH",
        };
        f.pad(name)
    }
}

#[derive(Debug, Default)]
pub struct Body {
    pub(crate) content_type: String,
    pub(crate) data: Vec<u8>,
}

impl Body {
    pub fn new() -> Body {
        Body::default()
    }

    pub fn from_string(s: &str) -> Body {
        Body {
            content_type: "text/plain".to_string(),
            data: s.as_bytes().to_vec(),
        }
    }

    pub fn from_bytes(content_type: &str, data: Vec<u8>) -> Body {
        Body {
            content_type: content_type.to_string(),
            data,
        }
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_string(&self) -> String {
        String::from_utf8_lossy(&self.data).to_string()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn json<T>(&self) -> Option<T>
    where
        T: serde::de::DeserializeOwned,
    {
        if self.content_type == "application/json" {
            serde_json::from_slice(&self.data).ok()
        } else {
            None
        }
    }
}

/// A parsed inbound request. Fields are plain data; the per-request
/// identity, description chain, and data bag live on the context, not here.
#[derive(Debug)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub query_string: String,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub body: Body,
    pub remote_addr: String,
}

impl Request {
    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(|value| value.as_str())
    }

    pub fn get_method(&self) -> &Method {
        &self.method
    }

    /// The full URL string: path plus query, as received.
    pub fn url(&self) -> String {
        if self.query_string.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.query_string)
        }
    }

    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(|value| value.as_str())
    }

    /// Head-only dump for diagnostics: request line plus headers, truncated
    /// to `limit` bytes. The body is always excluded.
    pub fn dump_head(&self, limit: usize) -> String {
        let mut dump = format!("{} {} HTTP/1.1", self.method, self.url());
        for (name, value) in &self.headers {
            dump.push_str(&format!("\n{}: {}", name, value));
        }
        if dump.len() > limit {
            let mut end = limit;
            while !dump.is_char_boundary(end) {
                end -= 1;
            }
            dump.truncate(end);
        }
        dump
    }

    /// Typed JSON body accessor; `None` unless the content type is JSON and
    /// the body deserializes into `T`.
    pub fn json_body<T>(&self) -> Option<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.body.json()
    }
}
