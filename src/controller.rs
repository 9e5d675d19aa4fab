//! State controller - enable, disable and toggle the redirect rules
//!
//! There is no stored on/off flag. Whether redirection is enabled is always a
//! projection of which reserved rule ids the store currently holds. Mutating
//! operations are serialised through a single-slot lock so a toggle is a
//! compare-and-swap against that projection rather than a racy read-then-act.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::CacheInvalidator;
use crate::metrics::EngineMetrics;
use crate::rules::{
    is_reserved, RedirectRule, RedirectTargetResolver, ResolvedTargets, Result, RuleCompiler,
    RuleStore, RESERVED_RULE_IDS,
};

/// Externally observable engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineState {
    pub enabled: bool,
}

/// How many of the reserved rules are installed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSetStatus {
    Absent,
    Partial,
    Complete,
}

/// Classify a rule listing by reserved-id presence
pub fn rule_set_status(rules: &[RedirectRule]) -> RuleSetStatus {
    let present = RESERVED_RULE_IDS
        .iter()
        .filter(|id| rules.iter().any(|r| r.id == **id))
        .count();

    match present {
        0 => RuleSetStatus::Absent,
        n if n == RESERVED_RULE_IDS.len() => RuleSetStatus::Complete,
        _ => RuleSetStatus::Partial,
    }
}

/// Project a rule listing onto the engine state
///
/// A partial rule set counts as enabled, so a toggle from it fully disables.
pub fn derive_state(rules: &[RedirectRule]) -> EngineState {
    EngineState {
        enabled: rules.iter().any(|r| is_reserved(r.id)),
    }
}

pub struct StateController {
    store: Arc<dyn RuleStore>,
    resolver: Arc<RedirectTargetResolver>,
    invalidator: Option<Arc<CacheInvalidator>>,
    op_lock: Mutex<()>,
}

impl StateController {
    pub fn new(store: Arc<dyn RuleStore>, resolver: Arc<RedirectTargetResolver>) -> Self {
        Self {
            store,
            resolver,
            invalidator: None,
            op_lock: Mutex::new(()),
        }
    }

    /// Clear cached originals after every successful enable
    pub fn with_cache_invalidator(mut self, invalidator: Arc<CacheInvalidator>) -> Self {
        self.invalidator = Some(invalidator);
        self
    }

    pub fn store(&self) -> &Arc<dyn RuleStore> {
        &self.store
    }

    pub fn resolver(&self) -> &Arc<RedirectTargetResolver> {
        &self.resolver
    }

    /// Current derived state. Read-only.
    pub async fn get_state(&self) -> Result<EngineState> {
        let result = self.read_state().await;
        Self::record("get_state", &result);
        result
    }

    /// Compile fresh rules from current configuration and install them
    pub async fn enable(&self) -> Result<EngineState> {
        let _slot = self.op_lock.lock().await;
        let result = self.enable_locked().await;
        Self::record("enable", &result);
        result
    }

    /// Remove both reserved rules; a no-op when already absent
    pub async fn disable(&self) -> Result<EngineState> {
        let _slot = self.op_lock.lock().await;
        let result = self.disable_locked().await;
        Self::record("disable", &result);
        result
    }

    /// Flip the derived state while holding the operation slot
    pub async fn toggle(&self) -> Result<EngineState> {
        let _slot = self.op_lock.lock().await;
        let result = match self.read_state().await {
            Ok(EngineState { enabled: true }) => self.disable_locked().await,
            Ok(EngineState { enabled: false }) => self.enable_locked().await,
            Err(e) => Err(e),
        };
        Self::record("toggle", &result);
        result
    }

    /// Rules `enable` would install right now
    pub async fn compile_rules(&self) -> Vec<RedirectRule> {
        let resolved = self.resolver.load().await;
        self.compile_from(&resolved)
    }

    fn compile_from(&self, resolved: &ResolvedTargets) -> Vec<RedirectRule> {
        resolved
            .pairs()
            .iter()
            .map(|(target, template)| {
                let redirect = self
                    .resolver
                    .resolve_redirect_url(template, &target.original_url);
                RuleCompiler::compile(target, &redirect)
            })
            .collect()
    }

    async fn read_state(&self) -> Result<EngineState> {
        let rules = self.store.list_rules().await?;
        if rule_set_status(&rules) == RuleSetStatus::Partial {
            warn!(
                rule_ids = ?rules.iter().map(|r| r.id).collect::<Vec<_>>(),
                "Only some reserved rules are installed, treating as enabled"
            );
        }
        Ok(derive_state(&rules))
    }

    async fn enable_locked(&self) -> Result<EngineState> {
        // One configuration read feeds both the rules and the cache clear
        let resolved = self.resolver.load().await;
        let rules = self.compile_from(&resolved);
        for rule in &rules {
            debug!(
                rule_id = rule.id,
                pattern = %rule.condition.match_pattern,
                redirect_to = %rule.action.redirect_to,
                "Compiled redirect rule"
            );
        }

        self.store
            .apply_diff(rules, RESERVED_RULE_IDS.to_vec())
            .await?;
        info!("Redirect rules enabled");

        if let Some(invalidator) = &self.invalidator {
            invalidator.spawn_invalidate(resolved);
        }

        self.read_state().await
    }

    async fn disable_locked(&self) -> Result<EngineState> {
        self.store
            .apply_diff(Vec::new(), RESERVED_RULE_IDS.to_vec())
            .await?;
        info!("Redirect rules disabled");
        self.read_state().await
    }

    fn record(operation: &str, result: &Result<EngineState>) {
        match result {
            Ok(state) => {
                EngineMetrics::record_operation(operation, None);
                EngineMetrics::record_state(state.enabled);
            }
            Err(e) => {
                warn!(operation = operation, error = %e, "Engine operation failed");
                EngineMetrics::record_operation(operation, Some(e.kind()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{
        InMemoryRuleStore, RuleAction, RuleCondition, ResourceKind, CSS_RULE_ID, DEFAULT_DEV_HOST,
        JS_RULE_ID,
    };
    use crate::cache::{CacheClearer, CacheScope};
    use crate::settings::{MemorySettings, KEY_CSS_URL};
    use async_trait::async_trait;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingClearer {
        scopes: std::sync::Mutex<Vec<CacheScope>>,
    }

    #[async_trait]
    impl CacheClearer for RecordingClearer {
        async fn clear(&self, scope: &CacheScope, _since: i64) -> Result<()> {
            self.scopes.lock().unwrap().push(scope.clone());
            Ok(())
        }
    }

    fn controller() -> (StateController, Arc<InMemoryRuleStore>) {
        let store = Arc::new(InMemoryRuleStore::new());
        let resolver = Arc::new(RedirectTargetResolver::new(
            Arc::new(MemorySettings::new()),
            DEFAULT_DEV_HOST,
        ));
        (StateController::new(store.clone(), resolver), store)
    }

    fn bare_rule(id: u32) -> RedirectRule {
        RedirectRule {
            id,
            priority: 1,
            condition: RuleCondition {
                match_pattern: "|https://h/x".to_string(),
                resource_kind: ResourceKind::Stylesheet,
            },
            action: RuleAction {
                redirect_to: "http://dev/x".to_string(),
            },
        }
    }

    #[test]
    fn test_derive_state_projection() {
        assert!(!derive_state(&[]).enabled);
        assert!(!derive_state(&[bare_rule(42)]).enabled);
        assert!(derive_state(&[bare_rule(CSS_RULE_ID)]).enabled);

        assert_eq!(rule_set_status(&[]), RuleSetStatus::Absent);
        assert_eq!(rule_set_status(&[bare_rule(JS_RULE_ID)]), RuleSetStatus::Partial);
        assert_eq!(
            rule_set_status(&[bare_rule(CSS_RULE_ID), bare_rule(JS_RULE_ID)]),
            RuleSetStatus::Complete
        );
    }

    #[tokio::test]
    async fn test_enable_is_idempotent() {
        let (controller, store) = controller();

        controller.enable().await.unwrap();
        let first = store.list_rules().await.unwrap();
        controller.enable().await.unwrap();
        let second = store.list_rules().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second.len(), 2);
    }

    #[tokio::test]
    async fn test_disable_leaves_foreign_rules() {
        let (controller, store) = controller();
        store.apply_diff(vec![bare_rule(42)], vec![]).await.unwrap();

        controller.enable().await.unwrap();
        let state = controller.disable().await.unwrap();

        assert!(!state.enabled);
        let ids: Vec<u32> = store.list_rules().await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![42]);
    }

    #[tokio::test]
    async fn test_store_failure_is_reported() {
        let (controller, store) = controller();
        store.set_deny_updates(true);

        let err = controller.toggle().await.unwrap_err();
        assert_eq!(err.kind(), "rule_store");
        assert!(!controller.get_state().await.unwrap().enabled);
    }

    #[tokio::test]
    async fn test_concurrent_toggles_stay_consistent() {
        let (controller, store) = controller();
        let controller = Arc::new(controller);

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let c = Arc::clone(&controller);
                tokio::spawn(async move { c.toggle().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // An even number of serialised toggles ends disabled with no stragglers
        assert_eq!(
            rule_set_status(&store.list_rules().await.unwrap()),
            RuleSetStatus::Absent
        );
    }

    #[tokio::test]
    async fn test_cache_clear_uses_installed_targets() {
        let settings = Arc::new(MemorySettings::with_values([(
            KEY_CSS_URL,
            "https://host/v1.css",
        )]));
        let store = Arc::new(InMemoryRuleStore::new());
        let resolver = Arc::new(RedirectTargetResolver::new(settings.clone(), DEFAULT_DEV_HOST));
        let clearer = Arc::new(RecordingClearer::default());
        let invalidator = Arc::new(CacheInvalidator::new(
            clearer.clone(),
            Arc::clone(&resolver),
            Duration::ZERO,
        ));
        let controller =
            StateController::new(store.clone(), resolver).with_cache_invalidator(invalidator);

        controller.enable().await.unwrap();
        // Edit lands before the background clear gets to run
        settings.set(KEY_CSS_URL, "https://host/v2.css").await;

        for _ in 0..50 {
            if !clearer.scopes.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let scopes = clearer.scopes.lock().unwrap();
        assert_eq!(scopes.len(), 1);
        match &scopes[0] {
            CacheScope::Urls(urls) => {
                assert!(urls.contains(&"https://host/v1.css".to_string()));
                assert!(!urls.contains(&"https://host/v2.css".to_string()));
            }
            CacheScope::All => panic!("expected url scope"),
        }
        drop(scopes);

        let css = store
            .list_rules()
            .await
            .unwrap()
            .into_iter()
            .find(|r| r.id == CSS_RULE_ID)
            .unwrap();
        assert_eq!(css.condition.match_pattern, "|https://host/v1.css");
    }
}
