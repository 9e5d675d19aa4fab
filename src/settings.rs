//! Configuration storage - externally managed key/value settings
//!
//! The engine only ever reads these keys:
//! - `cssUrl` / `jsUrl`: original asset URLs to intercept
//! - `cssRedirect` / `jsRedirect`: redirect templates containing `{{URL}}`
//!
//! Values are read at call time on every operation. Nothing is cached across
//! operations, so edits to the backing store take effect on the next call.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

use crate::rules::{EngineError, Result};

pub const KEY_CSS_URL: &str = "cssUrl";
pub const KEY_JS_URL: &str = "jsUrl";
pub const KEY_CSS_REDIRECT: &str = "cssRedirect";
pub const KEY_JS_REDIRECT: &str = "jsRedirect";

/// Snapshot of the recognized keys from a single storage read
pub type SettingsSnapshot = HashMap<String, String>;

/// Read-only view of configuration storage
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Read every stored key in one round trip
    async fn read_all(&self) -> Result<SettingsSnapshot>;
}

/// In-process settings, used when no settings file is configured and in tests
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: RwLock<SettingsSnapshot>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create settings pre-populated with key/value pairs
    pub fn with_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: RwLock::new(
                values
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    /// Replace a single key (external management, e.g. an options page)
    pub async fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values.write().await.insert(key.into(), value.into());
    }

    pub async fn remove(&self, key: &str) {
        self.values.write().await.remove(key);
    }
}

#[async_trait]
impl SettingsStore for MemorySettings {
    async fn read_all(&self) -> Result<SettingsSnapshot> {
        Ok(self.values.read().await.clone())
    }
}

/// YAML settings file, re-read on every call
///
/// ```yaml
/// cssUrl: https://lms.example.edu/brand/custom.css
/// jsRedirect: http://localhost:3000/test-url?url={{URL}}
/// ```
#[derive(Debug, Clone)]
pub struct YamlSettingsFile {
    path: PathBuf,
}

impl YamlSettingsFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SettingsStore for YamlSettingsFile {
    async fn read_all(&self) -> Result<SettingsSnapshot> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            EngineError::config_read(format!("{}: {}", self.path.display(), e))
        })?;

        if content.trim().is_empty() {
            debug!(path = %self.path.display(), "Settings file is empty");
            return Ok(SettingsSnapshot::new());
        }

        let raw: HashMap<String, serde_yaml::Value> = serde_yaml::from_str(&content)
            .map_err(|e| EngineError::config_read(format!("{}: {}", self.path.display(), e)))?;

        // Non-string scalars are ignored so a typo falls back to the default
        Ok(raw
            .into_iter()
            .filter_map(|(k, v)| match v {
                serde_yaml::Value::String(s) => Some((k, s)),
                _ => None,
            })
            .collect())
    }
}
