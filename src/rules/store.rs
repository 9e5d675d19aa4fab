//! Rule store - the only place redirect rules physically live
//!
//! The engine treats the store as an idempotent set keyed by rule id. The
//! in-memory implementation doubles as the proxy front end's route table and
//! as a test double for the controller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::compiler::RedirectRule;
use super::error::{EngineError, Result};
use super::matcher::UrlFilter;
use super::target::ResourceKind;
use crate::metrics::EngineMetrics;

/// Details of a request that matched a rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedRequest {
    pub rule_id: u32,
    pub url: String,
    pub resource_kind: ResourceKind,
    pub redirect_to: String,
}

/// Observer invoked for every live request that matches a rule
pub type MatchObserver = Arc<dyn Fn(&MatchedRequest) + Send + Sync>;

/// Result of a synthetic match test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchOutcome {
    pub matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_to: Option<String>,
}

impl MatchOutcome {
    pub fn no_match() -> Self {
        Self {
            matched: false,
            rule_id: None,
            redirect_to: None,
        }
    }

    pub fn from_rule(rule: &RedirectRule) -> Self {
        Self {
            matched: true,
            rule_id: Some(rule.id),
            redirect_to: Some(rule.action.redirect_to.clone()),
        }
    }
}

/// Interception-layer capability holding the active rules
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// All rules currently installed
    async fn list_rules(&self) -> Result<Vec<RedirectRule>>;

    /// Remove `remove` ids, then upsert `add` by id
    async fn apply_diff(&self, add: Vec<RedirectRule>, remove: Vec<u32>) -> Result<()>;

    /// Which rule, if any, a synthetic request would match. No side effects.
    async fn test_match(&self, url: &str, kind: ResourceKind) -> Result<MatchOutcome>;

    /// Install a debug observer for live matches. Returns false when the
    /// store has no such hook.
    fn set_match_observer(&self, _observer: Option<MatchObserver>) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
struct InstalledRule {
    rule: RedirectRule,
    filter: UrlFilter,
}

impl InstalledRule {
    fn matches(&self, url: &str, kind: ResourceKind) -> bool {
        self.rule.condition.resource_kind == kind && self.filter.matches(url)
    }
}

/// In-process rule table
#[derive(Default)]
pub struct InMemoryRuleStore {
    rules: RwLock<BTreeMap<u32, InstalledRule>>,
    observer: StdRwLock<Option<MatchObserver>>,
    deny_updates: AtomicBool,
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `apply_diff` fail, as a platform would when it
    /// refuses a rule update
    pub fn set_deny_updates(&self, deny: bool) {
        self.deny_updates.store(deny, Ordering::SeqCst);
    }

    /// Match a live request, notifying the observer on a hit
    pub async fn evaluate(&self, url: &str, kind: ResourceKind) -> Option<RedirectRule> {
        let rule = {
            let rules = self.rules.read().await;
            Self::best_match(&rules, url, kind).cloned()
        }?;

        EngineMetrics::record_rule_match(kind);
        debug!(rule_id = rule.id, url = %url, kind = %kind, "Redirect rule matched");

        let observer = match self.observer.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        if let Some(observer) = observer {
            observer(&MatchedRequest {
                rule_id: rule.id,
                url: url.to_string(),
                resource_kind: kind,
                redirect_to: rule.action.redirect_to.clone(),
            });
        }

        Some(rule)
    }

    /// Highest priority wins; equal priorities resolve to the lowest id
    fn best_match<'a>(
        rules: &'a BTreeMap<u32, InstalledRule>,
        url: &str,
        kind: ResourceKind,
    ) -> Option<&'a RedirectRule> {
        let mut best: Option<&RedirectRule> = None;
        for installed in rules.values().filter(|r| r.matches(url, kind)) {
            match best {
                Some(current) if current.priority >= installed.rule.priority => {}
                _ => best = Some(&installed.rule),
            }
        }
        best
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn list_rules(&self) -> Result<Vec<RedirectRule>> {
        let rules = self.rules.read().await;
        Ok(rules.values().map(|r| r.rule.clone()).collect())
    }

    async fn apply_diff(&self, add: Vec<RedirectRule>, remove: Vec<u32>) -> Result<()> {
        if self.deny_updates.load(Ordering::SeqCst) {
            return Err(EngineError::rule_store("rule updates are not permitted"));
        }

        // Compile before touching the table so a bad rule leaves it unchanged
        let mut installed = Vec::with_capacity(add.len());
        for rule in add {
            let filter = UrlFilter::parse(&rule.condition.match_pattern)
                .map_err(|e| EngineError::rule_store(format!("rule {}: {}", rule.id, e)))?;
            installed.push(InstalledRule { rule, filter });
        }

        let mut rules = self.rules.write().await;
        let mut removed = 0usize;
        for id in &remove {
            if rules.remove(id).is_some() {
                removed += 1;
            }
        }

        let added = installed.len();
        for entry in installed {
            rules.insert(entry.rule.id, entry);
        }

        info!(
            added = added,
            removed = removed,
            total = rules.len(),
            "Rule store updated"
        );

        Ok(())
    }

    async fn test_match(&self, url: &str, kind: ResourceKind) -> Result<MatchOutcome> {
        let rules = self.rules.read().await;
        Ok(Self::best_match(&rules, url, kind)
            .map(MatchOutcome::from_rule)
            .unwrap_or_else(MatchOutcome::no_match))
    }

    fn set_match_observer(&self, observer: Option<MatchObserver>) -> bool {
        match self.observer.write() {
            Ok(mut guard) => *guard = observer,
            Err(poisoned) => *poisoned.into_inner() = observer,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::compiler::{RuleAction, RuleCondition};
    use std::sync::Mutex;

    fn rule(id: u32, priority: u32, pattern: &str, kind: ResourceKind, to: &str) -> RedirectRule {
        RedirectRule {
            id,
            priority,
            condition: RuleCondition {
                match_pattern: pattern.to_string(),
                resource_kind: kind,
            },
            action: RuleAction {
                redirect_to: to.to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_apply_diff_upserts_by_id() {
        let store = InMemoryRuleStore::new();
        let first = rule(1, 1, "|https://h/a.css", ResourceKind::Stylesheet, "http://dev/1");
        let second = rule(1, 1, "|https://h/a.css", ResourceKind::Stylesheet, "http://dev/2");

        store.apply_diff(vec![first], vec![]).await.unwrap();
        store.apply_diff(vec![second.clone()], vec![]).await.unwrap();

        assert_eq!(store.list_rules().await.unwrap(), vec![second]);
    }

    #[tokio::test]
    async fn test_remove_absent_ids_is_noop() {
        let store = InMemoryRuleStore::new();
        store.apply_diff(vec![], vec![1001, 1002]).await.unwrap();
        assert!(store.list_rules().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_pattern_leaves_table_unchanged() {
        let store = InMemoryRuleStore::new();
        let good = rule(1, 1, "|https://h/a.css", ResourceKind::Stylesheet, "http://dev/1");
        store.apply_diff(vec![good.clone()], vec![]).await.unwrap();

        let bad = rule(2, 1, "", ResourceKind::Script, "http://dev/2");
        let err = store.apply_diff(vec![bad], vec![1]).await.unwrap_err();

        assert_eq!(err.kind(), "rule_store");
        assert_eq!(store.list_rules().await.unwrap(), vec![good]);
    }

    #[tokio::test]
    async fn test_denied_updates_fail() {
        let store = InMemoryRuleStore::new();
        store.set_deny_updates(true);
        assert!(store.apply_diff(vec![], vec![1]).await.is_err());
    }

    #[tokio::test]
    async fn test_match_respects_kind_and_priority() {
        let store = InMemoryRuleStore::new();
        store
            .apply_diff(
                vec![
                    rule(1, 1, "||h/*", ResourceKind::Script, "http://dev/low"),
                    rule(2, 5, "|https://h/b.js", ResourceKind::Script, "http://dev/high"),
                ],
                vec![],
            )
            .await
            .unwrap();

        let outcome = store.test_match("https://h/b.js", ResourceKind::Script).await.unwrap();
        assert_eq!(outcome.rule_id, Some(2));

        let outcome = store
            .test_match("https://h/b.js", ResourceKind::Stylesheet)
            .await
            .unwrap();
        assert!(!outcome.matched);
    }

    #[tokio::test]
    async fn test_evaluate_notifies_observer_but_test_match_does_not() {
        let store = InMemoryRuleStore::new();
        let seen: Arc<Mutex<Vec<MatchedRequest>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        assert!(store.set_match_observer(Some(Arc::new(move |m: &MatchedRequest| {
            sink.lock().unwrap().push(m.clone());
        }))));

        store
            .apply_diff(
                vec![rule(7, 1, "|https://h/a.css", ResourceKind::Stylesheet, "http://dev/a")],
                vec![],
            )
            .await
            .unwrap();

        store
            .test_match("https://h/a.css", ResourceKind::Stylesheet)
            .await
            .unwrap();
        assert!(seen.lock().unwrap().is_empty());

        let hit = store.evaluate("https://h/a.css?v=2", ResourceKind::Stylesheet).await;
        assert_eq!(hit.map(|r| r.id), Some(7));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].redirect_to, "http://dev/a");
    }
}
