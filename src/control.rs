//! Control surface - request/response messages consumed by UI collaborators
//!
//! Each message maps onto exactly one engine operation. Every request gets a
//! JSON-serialisable answer: `{"ok": true, ...}` on success or
//! `{"ok": false, "error": "..."}` on failure.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::{CacheClearer, CacheInvalidator};
use crate::controller::StateController;
use crate::diagnostics::DiagnosticsProbe;
use crate::rules::{RedirectTargetResolver, ResourceKind, Result, RuleStore};
use crate::settings::SettingsStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlRequest {
    Enable,
    Disable,
    Toggle,
    GetState,
    Health,
    ClearCache,
    #[serde(rename_all = "camelCase")]
    TestMatch {
        url: String,
        resource_kind: ResourceKind,
    },
    ListRules,
}

impl ControlRequest {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Enable => "ENABLE",
            Self::Disable => "DISABLE",
            Self::Toggle => "TOGGLE",
            Self::GetState => "GET_STATE",
            Self::Health => "HEALTH",
            Self::ClearCache => "CLEAR_CACHE",
            Self::TestMatch { .. } => "TEST_MATCH",
            Self::ListRules => "LIST_RULES",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl ControlResponse {
    /// Successful response; object payloads are flattened, anything else
    /// lands under `result`
    pub fn success<T: Serialize>(payload: &T) -> Self {
        match serde_json::to_value(payload) {
            Ok(Value::Object(data)) => Self {
                ok: true,
                error: None,
                data,
            },
            Ok(other) => {
                let mut data = Map::new();
                data.insert("result".to_string(), other);
                Self {
                    ok: true,
                    error: None,
                    data,
                }
            }
            Err(e) => Self::failure(format!("failed to encode response: {}", e)),
        }
    }

    pub fn failure(error: impl Display) -> Self {
        Self {
            ok: false,
            error: Some(error.to_string()),
            data: Map::new(),
        }
    }

    fn from_result<T: Serialize>(result: Result<T>) -> Self {
        match result {
            Ok(payload) => Self::success(&payload),
            Err(e) => Self::failure(e),
        }
    }
}

/// Knobs the engine needs from process configuration
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub dev_host: String,
    pub health_timeout: Duration,
    pub cache_clear_window: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            dev_host: crate::rules::DEFAULT_DEV_HOST.to_string(),
            health_timeout: Duration::from_millis(2000),
            cache_clear_window: Duration::ZERO,
        }
    }
}

/// Wires the resolver, controller, invalidator and probe around one store
pub struct Engine {
    store: Arc<dyn RuleStore>,
    controller: Arc<StateController>,
    invalidator: Arc<CacheInvalidator>,
    probe: Arc<DiagnosticsProbe>,
}

impl Engine {
    pub fn new(
        options: &EngineOptions,
        settings: Arc<dyn SettingsStore>,
        store: Arc<dyn RuleStore>,
        clearer: Arc<dyn CacheClearer>,
    ) -> Result<Self> {
        let resolver = Arc::new(RedirectTargetResolver::new(
            settings,
            options.dev_host.clone(),
        ));
        let invalidator = Arc::new(CacheInvalidator::new(
            clearer,
            Arc::clone(&resolver),
            options.cache_clear_window,
        ));
        let controller = Arc::new(
            StateController::new(Arc::clone(&store), resolver)
                .with_cache_invalidator(Arc::clone(&invalidator)),
        );
        let probe = Arc::new(DiagnosticsProbe::new(
            Arc::clone(&store),
            &options.dev_host,
            options.health_timeout,
        )?);

        Ok(Self {
            store,
            controller,
            invalidator,
            probe,
        })
    }

    pub fn controller(&self) -> &Arc<StateController> {
        &self.controller
    }

    pub fn probe(&self) -> &Arc<DiagnosticsProbe> {
        &self.probe
    }

    pub fn store(&self) -> &Arc<dyn RuleStore> {
        &self.store
    }

    /// Run one control message to completion
    pub async fn dispatch(&self, request: ControlRequest) -> ControlResponse {
        debug!(message = request.name(), "Control message received");

        let response = match request {
            ControlRequest::Enable => ControlResponse::from_result(self.controller.enable().await),
            ControlRequest::Disable => {
                ControlResponse::from_result(self.controller.disable().await)
            }
            ControlRequest::Toggle => ControlResponse::from_result(self.controller.toggle().await),
            ControlRequest::GetState => {
                ControlResponse::from_result(self.controller.get_state().await)
            }
            ControlRequest::Health => {
                // The report carries its own ok flag
                let report = self.probe.health().await;
                let mut response = ControlResponse::success(&report);
                response.ok = report.ok;
                response.error = report.error;
                response.data.remove("ok");
                response.data.remove("error");
                response
            }
            ControlRequest::ClearCache => {
                ControlResponse::from_result(self.invalidator.invalidate().await.map(|()| Map::new()))
            }
            ControlRequest::TestMatch { url, resource_kind } => {
                ControlResponse::from_result(self.probe.test_match(&url, resource_kind).await)
            }
            ControlRequest::ListRules => {
                ControlResponse::from_result(self.store.list_rules().await.map(|rules| {
                    let mut data = Map::new();
                    data.insert(
                        "rules".to_string(),
                        serde_json::to_value(rules).unwrap_or(Value::Null),
                    );
                    data
                }))
            }
        };

        if !response.ok {
            warn!(error = ?response.error, "Control message failed");
        }
        response
    }

    /// Decode and run a raw JSON control message
    pub async fn dispatch_json(&self, raw: &[u8]) -> ControlResponse {
        match serde_json::from_slice::<ControlRequest>(raw) {
            Ok(request) => self.dispatch(request).await,
            Err(e) => ControlResponse::failure(format!("invalid control message: {}", e)),
        }
    }
}
