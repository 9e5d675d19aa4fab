//! Rule compilation - turns a target and a resolved URL into a RedirectRule

use serde::{Deserialize, Serialize};

use super::target::{RedirectTarget, ResourceKind};

/// Reserved rule id for the stylesheet redirect
pub const CSS_RULE_ID: u32 = 1001;

/// Reserved rule id for the script redirect
pub const JS_RULE_ID: u32 = 1002;

/// Every id the engine owns, in resource-kind order
pub const RESERVED_RULE_IDS: [u32; 2] = [CSS_RULE_ID, JS_RULE_ID];

pub const CSS_RULE_PRIORITY: u32 = 1;
pub const JS_RULE_PRIORITY: u32 = 2;

/// Reserved id for a resource kind
pub fn reserved_rule_id(kind: ResourceKind) -> u32 {
    match kind {
        ResourceKind::Stylesheet => CSS_RULE_ID,
        ResourceKind::Script => JS_RULE_ID,
    }
}

/// Fixed priority for a resource kind
pub fn rule_priority(kind: ResourceKind) -> u32 {
    match kind {
        ResourceKind::Stylesheet => CSS_RULE_PRIORITY,
        ResourceKind::Script => JS_RULE_PRIORITY,
    }
}

pub fn is_reserved(id: u32) -> bool {
    RESERVED_RULE_IDS.contains(&id)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCondition {
    pub match_pattern: String,
    pub resource_kind: ResourceKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleAction {
    pub redirect_to: String,
}

/// Platform-addressable redirect rule
///
/// Rules are never mutated once written; a change is a remove-then-add of
/// the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectRule {
    pub id: u32,
    pub priority: u32,
    pub condition: RuleCondition,
    pub action: RuleAction,
}

/// Builds rules from targets
pub struct RuleCompiler;

impl RuleCompiler {
    /// Compile a target into its reserved rule
    pub fn compile(target: &RedirectTarget, resolved_url: &str) -> RedirectRule {
        RedirectRule {
            id: reserved_rule_id(target.resource_kind),
            priority: rule_priority(target.resource_kind),
            condition: RuleCondition {
                match_pattern: target.match_pattern.clone(),
                resource_kind: target.resource_kind,
            },
            action: RuleAction {
                redirect_to: resolved_url.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::target::resolve_redirect_url;

    #[test]
    fn test_compile_is_deterministic() {
        let target = RedirectTarget::new(ResourceKind::Stylesheet, "https://host/a.css").unwrap();
        let template = "http://dev/test-url?url={{URL}}";

        let first = RuleCompiler::compile(&target, &resolve_redirect_url(template, &target.original_url));
        let second = RuleCompiler::compile(&target, &resolve_redirect_url(template, &target.original_url));

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[test]
    fn test_ids_and_priorities_per_kind() {
        let css = RuleCompiler::compile(&RedirectTarget::default_for(ResourceKind::Stylesheet), "http://dev/a");
        let js = RuleCompiler::compile(&RedirectTarget::default_for(ResourceKind::Script), "http://dev/b");

        assert_eq!(css.id, CSS_RULE_ID);
        assert_eq!(js.id, JS_RULE_ID);
        assert_ne!(css.priority, js.priority);
        assert_eq!(css.condition.resource_kind, ResourceKind::Stylesheet);
        assert_eq!(js.action.redirect_to, "http://dev/b");
    }

    #[test]
    fn test_rule_serializes_camel_case() {
        let rule = RuleCompiler::compile(&RedirectTarget::default_for(ResourceKind::Script), "http://dev/b");
        let json = serde_json::to_value(&rule).unwrap();

        assert_eq!(json["condition"]["resourceKind"], "script");
        assert_eq!(json["action"]["redirectTo"], "http://dev/b");
        assert!(json["condition"]["matchPattern"].is_string());
    }

    #[test]
    fn test_reserved_ids() {
        assert!(is_reserved(1001));
        assert!(is_reserved(1002));
        assert!(!is_reserved(9001));
    }
}
