//! Static asset collaborator.
//!
//! Serves files under a URL prefix out of one directory, with the cache
//! headers and gzip handling a browser expects, plus the content-hash
//! helper templates use for cache-busting asset URLs. The pipeline core
//! never inspects file contents beyond this module.

use crate::context::Context;
use crate::error::ServerError;
use crate::logger::Logger;
use crate::status::Status;
use flate2::write::GzEncoder;
use flate2::Compression;
use moka::sync::Cache;
use sha2::{Digest, Sha512};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const GZIP_MIN_SIZE: usize = 1024;
const GZIP_SKIP_TYPES: &[&str] = &["image/", "video/", "audio/"];

#[derive(Clone)]
pub struct StaticFiles {
    base_dir: PathBuf,
    prefix: String,
    logger: Logger,
    digests: Cache<String, String>,
}

impl StaticFiles {
    pub fn new(base_dir: impl Into<PathBuf>, prefix: &str, logger: Logger) -> Self {
        Self {
            base_dir: base_dir.into(),
            prefix: prefix.trim_end_matches('/').to_string(),
            logger,
            digests: Cache::new(1024),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Whether `path` falls under this handler's URL prefix.
    pub fn serves(&self, path: &str) -> bool {
        path.starts_with(&format!("{}/", self.prefix))
    }

    /// Serves the file addressed by the request path. Anything that does
    /// not resolve to a regular file inside the base directory is a 404;
    /// traversal out of the base directory is refused the same way.
    pub fn serve(&self, ctx: &Context) -> Status {
        let path = &ctx.request().path;
        let relative = path
            .strip_prefix(&self.prefix)
            .unwrap_or(path)
            .trim_start_matches('/');

        let base = match fs::canonicalize(&self.base_dir) {
            Ok(base) => base,
            Err(_) => return ctx.not_found(),
        };
        let file_path = match fs::canonicalize(self.base_dir.join(relative)) {
            Ok(file_path) => file_path,
            Err(_) => return ctx.not_found(),
        };
        if !file_path.starts_with(&base) || !file_path.is_file() {
            return ctx.not_found();
        }

        let mut contents = match fs::read(&file_path) {
            Ok(contents) => contents,
            Err(_) => return ctx.not_found(),
        };

        let content_type = content_type_for(&file_path);
        let writer = ctx.writer();
        writer.set_header("Content-Type", content_type);
        writer.set_header("Cache-Control", "public, max-age=31536000");

        if let Ok(metadata) = fs::metadata(&file_path) {
            if let Ok(modified) = metadata.modified() {
                writer.set_header("Last-Modified", &httpdate::fmt_http_date(modified));
                let seconds = modified
                    .duration_since(SystemTime::UNIX_EPOCH)
                    .map(|duration| duration.as_secs())
                    .unwrap_or(0);
                writer.set_header("ETag", &format!("\"{}-{}\"", metadata.len(), seconds));
            }
        }

        if should_compress(content_type, contents.len()) && accepts_gzip(ctx) {
            if let Ok(compressed) = gzip(&contents) {
                contents = compressed;
                writer.set_header("Content-Encoding", "gzip");
                writer.set_header("Vary", "Accept-Encoding");
            }
        }

        writer.write(&contents);
        ctx.ok()
    }

    /// Short content digest for cache-busting asset URLs: the first 6 hex
    /// characters of the SHA-512 of the file bytes. Deterministic and
    /// stable across runs for identical content; memoized per path.
    pub fn hash(&self, filename: &str) -> String {
        if let Some(digest) = self.digests.get(filename) {
            return digest;
        }

        let relative = filename
            .strip_prefix(&self.prefix)
            .unwrap_or(filename)
            .trim_start_matches('/');
        let path = self.base_dir.join(relative);

        match fs::read(&path) {
            Ok(bytes) => {
                let digest = hex::encode(Sha512::digest(&bytes));
                let digest = digest[..6].to_string();
                self.digests.insert(filename.to_string(), digest.clone());
                digest
            }
            Err(err) => {
                self.logger.error(
                    Some(&ServerError::because(
                        err,
                        format!("hashsum: unable to read {} ({})", path.display(), filename),
                    )),
                    &format!("hashsum: unable to read {}", filename),
                );
                "error".to_string()
            }
        }
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("html") => "text/html",
        Some("css") => "text/css",
        Some("js") => "text/javascript",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}

fn should_compress(content_type: &str, length: usize) -> bool {
    if length < GZIP_MIN_SIZE {
        return false;
    }
    !GZIP_SKIP_TYPES
        .iter()
        .any(|skip| content_type.starts_with(skip))
}

fn accepts_gzip(ctx: &Context) -> bool {
    ctx.request()
        .get_header("accept-encoding")
        .map(|value| value.to_lowercase().contains("gzip"))
        .unwrap_or(false)
}

fn gzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}
