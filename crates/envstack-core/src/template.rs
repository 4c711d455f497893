//! Manifest template rendering.
//!
//! Substitution is literal and single-pass: the template is scanned once and
//! each `{{TOKEN}}` with a declared value is replaced. Substituted values are
//! never rescanned, and undeclared tokens are copied through untouched.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::context::DeployContext;
use crate::error::{DeployError, Result};

pub const ENVIRONMENT_TOKEN: &str = "ENVIRONMENT";
pub const NAMESPACE_TOKEN: &str = "NAMESPACE";
pub const IMAGE_TOKEN: &str = "IMAGE";

/// Ordered token → value pairs. Tokens are stored in `{{NAME}}` form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Substitutions {
    entries: Vec<(String, String)>,
}

impl Substitutions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `{{name}}` → `value`. Re-declaring a name replaces its value.
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        let token = format!("{{{{{}}}}}", name);
        let value = value.into();
        match self.entries.iter_mut().find(|(t, _)| *t == token) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((token, value)),
        }
        self
    }

    /// The three standard tokens for a deployment.
    pub fn for_context(ctx: &DeployContext) -> Self {
        Self::new()
            .with(ENVIRONMENT_TOKEN, ctx.environment().as_str())
            .with(NAMESPACE_TOKEN, ctx.namespace())
            .with(IMAGE_TOKEN, ctx.image())
    }

    fn lookup<'a>(&'a self, text: &str) -> Option<(&'a str, &'a str)> {
        self.entries
            .iter()
            .find(|(token, _)| text.starts_with(token.as_str()))
            .map(|(t, v)| (t.as_str(), v.as_str()))
    }
}

/// Render `template` with `substitutions`.
pub fn render(template: &str, substitutions: &Substitutions) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match substitutions.lookup(tail) {
            Some((token, value)) => {
                out.push_str(value);
                rest = &tail[token.len()..];
            }
            None => {
                // Advance one brace so `{{{TOKEN}}` still matches at the next offset.
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Read a template file, mapping any failure to `TemplateRead`.
pub fn read_template(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| DeployError::TemplateRead {
        path: path.to_path_buf(),
        source,
    })
}

/// `<render_dir>/deployment.<environment>.yaml`
pub fn rendered_path(render_dir: &Path, environment: &str) -> PathBuf {
    render_dir.join(format!("deployment.{}.yaml", environment))
}

/// A manifest written to disk for one environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedManifest {
    pub path: PathBuf,
    pub content: String,
}

impl RenderedManifest {
    /// SHA-256 hex of the rendered content.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.content.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Render the template for `ctx` and overwrite the per-environment file.
pub fn render_to_file(
    template_path: &Path,
    render_dir: &Path,
    ctx: &DeployContext,
) -> Result<RenderedManifest> {
    let template = read_template(template_path)?;
    let content = render(&template, &Substitutions::for_context(ctx));

    fs::create_dir_all(render_dir)?;
    let path = rendered_path(render_dir, ctx.environment().as_str());
    fs::write(&path, &content)?;
    debug!(path = %path.display(), bytes = content.len(), "manifest rendered");

    Ok(RenderedManifest { path, content })
}
