//! Process environment + per-environment TOML configuration.
//!
//! Stack configuration lives in `envstack.<environment>.toml` as flat keys:
//!
//! ```toml
//! githubRepository = "acme/widgets"
//! ghcrUsername = "deploy-bot"
//! ```
//!
//! Secrets are read from `ENVSTACK_<SCREAMING_KEY>` first (`ghcrToken` is
//! `ENVSTACK_GHCR_TOKEN`) so CI can inject them without writing files, then
//! from the TOML file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use envstack_state::{ConfigSource, ProviderError, ProviderResult, SecretValue};
use tracing::debug;

/// Prefix of environment variables that carry secret configuration.
pub const SECRET_ENV_PREFIX: &str = "ENVSTACK_";

/// `envstack.<environment>.toml` under `dir`.
pub fn config_file_path(dir: &Path, environment: &str) -> PathBuf {
    dir.join(format!("envstack.{}.toml", environment))
}

/// `ghcrToken` → `GHCR_TOKEN`, `github-token` → `GITHUB_TOKEN`.
pub fn screaming_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    let mut prev_lower = false;
    for c in key.chars() {
        if c.is_ascii_uppercase() && prev_lower {
            out.push('_');
        }
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push('_');
        }
        prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
    }
    out
}

#[derive(Debug, Clone)]
enum EnvLookup {
    Process,
    Fixed(HashMap<String, String>),
}

/// [`ConfigSource`] over the process environment and a TOML file.
#[derive(Debug, Clone)]
pub struct EnvConfigSource {
    values: HashMap<String, String>,
    env: EnvLookup,
}

impl EnvConfigSource {
    /// Load `envstack.<environment>.toml` from `dir`. A missing file yields an
    /// empty configuration.
    pub fn load(dir: &Path, environment: &str) -> ProviderResult<Self> {
        let path = config_file_path(dir, environment);
        let values = if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            let values = parse_flat_toml(&text, &path)?;
            debug!(path = %path.display(), keys = values.len(), "stack config loaded");
            values
        } else {
            debug!(path = %path.display(), "no stack config file");
            HashMap::new()
        };
        Ok(EnvConfigSource {
            values,
            env: EnvLookup::Process,
        })
    }

    /// Configuration from explicit values, still reading the process
    /// environment.
    pub fn from_values(values: HashMap<String, String>) -> Self {
        EnvConfigSource {
            values,
            env: EnvLookup::Process,
        }
    }

    /// Replace the process environment with a fixed map.
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = EnvLookup::Fixed(env);
        self
    }

    fn lookup_env(&self, name: &str) -> Option<String> {
        match &self.env {
            EnvLookup::Process => std::env::var(name).ok(),
            EnvLookup::Fixed(map) => map.get(name).cloned(),
        }
    }
}

fn parse_flat_toml(text: &str, path: &Path) -> ProviderResult<HashMap<String, String>> {
    let table: toml::Table = toml::from_str(text).map_err(|e| ProviderError::InvalidConfig {
        key: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut values = HashMap::with_capacity(table.len());
    for (key, value) in table {
        let value = match value {
            toml::Value::String(s) => s,
            toml::Value::Integer(i) => i.to_string(),
            toml::Value::Boolean(b) => b.to_string(),
            other => {
                return Err(ProviderError::InvalidConfig {
                    key,
                    reason: format!("expected a string, found {}", other.type_str()),
                })
            }
        };
        values.insert(key, value);
    }
    Ok(values)
}

impl ConfigSource for EnvConfigSource {
    fn env_var(&self, name: &str) -> Option<String> {
        self.lookup_env(name)
    }

    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn get_secret(&self, key: &str) -> Option<SecretValue> {
        let var = format!("{}{}", SECRET_ENV_PREFIX, screaming_key(key));
        self.lookup_env(&var)
            .filter(|v| !v.is_empty())
            .or_else(|| self.values.get(key).cloned())
            .map(SecretValue::new)
    }
}
