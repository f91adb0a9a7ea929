//! Template set collaborator.
//!
//! Compilation happens once at startup: every file under the template
//! directory becomes a template named by its extension-less relative path.
//! The pipeline only ever calls [`Templates::render`], which is
//! deterministic: identical name and data produce byte-identical output.

use crate::error::{ServerError, ServerResult};
use crate::static_files::StaticFiles;
use minijinja::Environment;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub struct Templates {
    env: Environment<'static>,
}

impl Templates {
    pub fn compile(directory: impl AsRef<Path>) -> ServerResult<Self> {
        Self::compile_with(directory, None)
    }

    /// Compiles every file under `directory`. When `assets` is given, the
    /// `hash` template function resolves cache-busting content digests
    /// through it; without assets the function degrades to `"error"`.
    pub fn compile_with(
        directory: impl AsRef<Path>,
        assets: Option<StaticFiles>,
    ) -> ServerResult<Self> {
        let mut env = Environment::new();
        match assets {
            Some(assets) => {
                env.add_function("hash", move |name: String| assets.hash(&name));
            }
            None => {
                env.add_function("hash", |_name: String| "error".to_string());
            }
        }

        let directory = directory.as_ref();
        let mut files = Vec::new();
        collect_files(directory, &mut files).map_err(|err| {
            ServerError::because(
                err,
                format!("unable to read template directory: {}", directory.display()),
            )
        })?;
        files.sort();

        for path in files {
            let source = fs::read_to_string(&path).map_err(|err| {
                ServerError::because(err, format!("unable to read template: {}", path.display()))
            })?;
            env.add_template_owned(template_name(directory, &path), source)
                .map_err(|err| {
                    ServerError::because(
                        err,
                        format!("unable to compile template: {}", path.display()),
                    )
                })?;
        }

        Ok(Self { env })
    }

    pub fn render(&self, name: &str, data: &HashMap<String, Value>) -> ServerResult<Vec<u8>> {
        let template = self
            .env
            .get_template(name)
            .map_err(|err| ServerError::because(err, format!("no such template: {}", name)))?;
        let rendered = template
            .render(data)
            .map_err(|err| ServerError::because(err, format!("unable to render template: {}", name)))?;
        Ok(rendered.into_bytes())
    }
}

fn collect_files(directory: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(directory)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}

// "pages/index.html" -> "pages/index", with forward slashes on every
// platform so template names are stable in rendered links and logs.
fn template_name(base: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path);
    relative
        .with_extension("")
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
