use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::context::DeployContext;

/// Resolved identity exported after a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackOutputs {
    pub environment: String,
    pub image: String,
    pub namespace: String,
}

impl StackOutputs {
    pub fn from_context(ctx: &DeployContext) -> Self {
        StackOutputs {
            environment: ctx.environment().to_string(),
            image: ctx.image().to_string(),
            namespace: ctx.namespace().to_string(),
        }
    }

    /// `(name, value)` pairs in export order.
    pub fn entries(&self) -> [(&'static str, &str); 3] {
        [
            ("environment", self.environment.as_str()),
            ("image", self.image.as_str()),
            ("namespace", self.namespace.as_str()),
        ]
    }
}

/// Render outputs as `name=value` lines, the format `$GITHUB_OUTPUT` expects.
pub fn render_outputs_env(outputs: &StackOutputs) -> String {
    let mut out = String::new();
    for (name, value) in outputs.entries() {
        out.push_str(&format!("{}={}\n", name, value));
    }
    out
}

/// Write outputs as pretty JSON.
pub fn write_outputs_json(path: &Path, outputs: &StackOutputs) -> Result<()> {
    let content = serde_json::to_string_pretty(outputs).context("serialize stack outputs")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Append outputs to a step-output file such as `$GITHUB_OUTPUT`.
pub fn append_outputs_env(path: &Path, outputs: &StackOutputs) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {:?}", path))?;
    file.write_all(render_outputs_env(outputs).as_bytes())
        .with_context(|| format!("append {:?}", path))?;
    Ok(())
}
