//! Rerouted - redirect live LMS assets to a local dev server
//!
//! Rerouted lets a developer work against a live, unmodified production page
//! while its stylesheet and script are served from a local dev server.
//!
//! ## Features
//!
//! - **Derived state**: enabled/disabled is always computed from which reserved
//!   rule ids are installed, never stored separately
//! - **Idempotent operations**: enable, disable and toggle replace rules by id
//!   and are serialised so a toggle cannot interleave with another change
//! - **Template fallback**: a malformed redirect template still yields a valid,
//!   encoded `<base>?url=<original>` redirect
//! - **Diagnostics**: synthetic match tests and a bounded-timeout dev server health probe
//! - **Metrics**: Prometheus-compatible metrics
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rerouted::cache::LoggingCacheClearer;
//! use rerouted::control::{ControlRequest, Engine, EngineOptions};
//! use rerouted::rules::InMemoryRuleStore;
//! use rerouted::settings::MemorySettings;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::new(
//!         &EngineOptions::default(),
//!         Arc::new(MemorySettings::new()),
//!         Arc::new(InMemoryRuleStore::new()),
//!         Arc::new(LoggingCacheClearer),
//!     )?;
//!
//!     let response = engine.dispatch(ControlRequest::Toggle).await;
//!     println!("{}", serde_json::to_string(&response)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - `rules` - targets, rule compilation, URL matching and the rule store
//! - `settings` - configuration storage
//! - `controller` - enable/disable/toggle over the rule store
//! - `cache` - best-effort cache invalidation
//! - `diagnostics` - match testing and dev server health
//! - `control` - control surface messages
//! - `server` - HTTP front end and redirecting proxy

// Core engine
pub mod cache;
pub mod controller;
pub mod diagnostics;
pub mod rules;
pub mod settings;

// Outer surfaces
pub mod config;
pub mod control;
pub mod server;

// Metrics
pub mod metrics;

/// Configuration types
pub use config::Config;

/// Engine and control surface
pub use control::{ControlRequest, ControlResponse, Engine, EngineOptions};

/// State control
pub use controller::{derive_state, EngineState, RuleSetStatus, StateController};

/// Cache invalidation
pub use cache::{CacheClearer, CacheInvalidator, CacheScope, LoggingCacheClearer};

/// Diagnostics
pub use diagnostics::{DiagnosticsProbe, HealthReport};

/// Rule types and functionality
pub use rules::{
    resolve_redirect_url, EngineError, InMemoryRuleStore, MatchOutcome, RedirectRule,
    RedirectTarget, RedirectTargetResolver, ResourceKind, RuleCompiler, RuleStore,
    RESERVED_RULE_IDS,
};

/// Configuration storage
pub use settings::{MemorySettings, SettingsStore, YamlSettingsFile};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
