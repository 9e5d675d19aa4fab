use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::control::EngineOptions;
use crate::rules::DEFAULT_DEV_HOST;

#[derive(Debug, Clone)]
pub struct Config {
    // Listener
    pub host: String,
    pub port: u16,

    // Dev server the rules redirect to
    pub dev_host: String,
    pub health_timeout_ms: u64,

    // Configuration storage; None keeps settings in memory
    pub settings_path: Option<PathBuf>,

    // Cache invalidation window (0 = clear everything)
    pub cache_clear_window_secs: u64,

    // Logging
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8899,
            dev_host: DEFAULT_DEV_HOST.to_string(),
            health_timeout_ms: 2000,
            settings_path: None,
            cache_clear_window_secs: 0,
            log_json: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // Load .env file if present

        let host = env::var("REROUTED_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("REROUTED_PORT")
            .unwrap_or_else(|_| "8899".to_string())
            .parse()
            .context("Invalid REROUTED_PORT")?;

        let dev_host = env::var("REROUTED_DEV_HOST")
            .unwrap_or_else(|_| DEFAULT_DEV_HOST.to_string())
            .trim_end_matches('/')
            .to_string();
        url::Url::parse(&dev_host).context("Invalid REROUTED_DEV_HOST")?;

        let health_timeout_ms = env::var("REROUTED_HEALTH_TIMEOUT_MS")
            .unwrap_or_else(|_| "2000".to_string())
            .parse()
            .context("Invalid REROUTED_HEALTH_TIMEOUT_MS")?;
        if health_timeout_ms == 0 {
            return Err(anyhow::anyhow!(
                "REROUTED_HEALTH_TIMEOUT_MS must be greater than 0"
            ));
        }

        let settings_path = env::var("REROUTED_SETTINGS_PATH")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        let cache_clear_window_secs = env::var("REROUTED_CACHE_CLEAR_WINDOW_SECS")
            .unwrap_or_else(|_| "0".to_string())
            .parse()
            .context("Invalid REROUTED_CACHE_CLEAR_WINDOW_SECS")?;

        let log_json = env::var("REROUTED_LOG_JSON")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .context("Invalid REROUTED_LOG_JSON")?;

        Ok(Self {
            host,
            port,
            dev_host,
            health_timeout_ms,
            settings_path,
            cache_clear_window_secs,
            log_json,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            dev_host: self.dev_host.clone(),
            health_timeout: Duration::from_millis(self.health_timeout_ms),
            cache_clear_window: Duration::from_secs(self.cache_clear_window_secs),
        }
    }
}
