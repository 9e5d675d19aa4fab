use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

use rerouted::cache::LoggingCacheClearer;
use rerouted::control::Engine;
use rerouted::rules::{InMemoryRuleStore, MatchedRequest, RuleStore};
use rerouted::server::{self, AppState};
use rerouted::settings::{MemorySettings, SettingsStore, YamlSettingsFile};
use rerouted::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if config.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Starting {} {}", rerouted::NAME, rerouted::VERSION);

    let settings: Arc<dyn SettingsStore> = match &config.settings_path {
        Some(path) => {
            info!("Reading redirect settings from {}", path.display());
            Arc::new(YamlSettingsFile::new(path))
        }
        None => {
            info!("No settings file configured, using built-in defaults");
            Arc::new(MemorySettings::new())
        }
    };

    let routes = Arc::new(InMemoryRuleStore::new());
    routes.set_match_observer(Some(Arc::new(|m: &MatchedRequest| {
        info!(
            rule_id = m.rule_id,
            kind = %m.resource_kind,
            url = %m.url,
            "Rule matched"
        );
    })));

    let engine = Engine::new(
        &config.engine_options(),
        settings,
        routes.clone(),
        Arc::new(LoggingCacheClearer),
    )
    .context("Failed to initialize redirect engine")?;

    server::unredirectable_targets(&engine).await;

    let state = Arc::new(AppState {
        engine: Arc::new(engine),
        routes,
    });

    let listener = TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr()))?;
    info!("Listening on {}", config.bind_addr());
    info!("Redirecting to dev server at {}", config.dev_host);

    server::serve(listener, state, shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
