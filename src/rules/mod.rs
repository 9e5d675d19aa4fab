//! Redirect rules
//!
//! This module provides:
//! - Target resolution from configuration storage, with template fallback
//! - Deterministic compilation of targets into reserved-id rules
//! - URL filter matching
//! - The RuleStore capability and an in-process implementation

pub mod compiler;
pub mod error;
pub mod matcher;
pub mod store;
pub mod target;

pub use compiler::{
    is_reserved, reserved_rule_id, rule_priority, RedirectRule, RuleAction, RuleCompiler,
    RuleCondition, CSS_RULE_ID, CSS_RULE_PRIORITY, JS_RULE_ID, JS_RULE_PRIORITY,
    RESERVED_RULE_IDS,
};
pub use error::{EngineError, Result};
pub use matcher::UrlFilter;
pub use store::{InMemoryRuleStore, MatchObserver, MatchOutcome, MatchedRequest, RuleStore};
pub use target::{
    default_template, resolve_redirect_url, RedirectTarget, RedirectTargetResolver,
    ResolvedTargets, ResourceKind, DEFAULT_CSS_URL, DEFAULT_DEV_HOST, DEFAULT_JS_URL,
    URL_PLACEHOLDER,
};
