//! Routing capability.
//!
//! The dispatch core does not implement path matching; it talks to a
//! [`Router`] through registration and lookup only, so any matching
//! strategy can be plugged in. [`PathRouter`] is the default: an exact
//! table plus `:name` segment patterns, no wildcard or prefix trees.

use crate::http::Method;
use crate::middleware::Handler;
use std::collections::HashMap;

pub trait Router: Send + Sync {
    fn route(&mut self, method: Method, pattern: &str, handler: Handler);

    /// Matches a request, returning the handler and the extracted route
    /// parameters by name.
    fn find(&self, method: Method, path: &str) -> Option<(Handler, HashMap<String, String>)>;
}

#[derive(Default)]
pub struct PathRouter {
    routes: HashMap<String, HashMap<Method, Handler>>,
    dynamic_routes: Vec<String>,
}

impl PathRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn normalize(pattern: &str) -> String {
        let pattern = pattern.trim_end_matches('/');
        if pattern.is_empty() {
            "/".to_string()
        } else {
            pattern.to_string()
        }
    }

    fn match_dynamic(pattern: &str, path: &str) -> Option<HashMap<String, String>> {
        let pattern_parts: Vec<&str> = pattern.split('/').collect();
        let path_parts: Vec<&str> = path.split('/').collect();

        if pattern_parts.len() != path_parts.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (pattern_part, path_part) in pattern_parts.iter().zip(path_parts.iter()) {
            if let Some(name) = pattern_part.strip_prefix(':') {
                params.insert(name.to_string(), (*path_part).to_string());
            } else if pattern_part != path_part {
                return None;
            }
        }

        Some(params)
    }
}

impl Router for PathRouter {
    fn route(&mut self, method: Method, pattern: &str, handler: Handler) {
        let pattern = Self::normalize(pattern);
        if pattern.contains(':') && !self.dynamic_routes.contains(&pattern) {
            self.dynamic_routes.push(pattern.clone());
        }
        self.routes
            .entry(pattern)
            .or_default()
            .insert(method, handler);
    }

    fn find(&self, method: Method, path: &str) -> Option<(Handler, HashMap<String, String>)> {
        if let Some(routes) = self.routes.get(path) {
            if let Some(handler) = routes.get(&method) {
                return Some((handler.clone(), HashMap::new()));
            }
        }

        for pattern in &self.dynamic_routes {
            if let Some(params) = Self::match_dynamic(pattern, path) {
                if let Some(handler) = self.routes.get(pattern).and_then(|routes| routes.get(&method)) {
                    return Some((handler.clone(), params));
                }
            }
        }

        None
    }
}
