//! Redirect engine error types

use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine-level errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Configuration storage could not be read
    #[error("Failed to read configuration: {0}")]
    ConfigRead(String),

    /// Redirect template could not be applied to a target
    #[error("Template substitution failed for {template}: {reason}")]
    TemplateSubstitution { template: String, reason: String },

    /// Rule store rejected or failed an update
    #[error("Rule store failure: {0}")]
    RuleStore(String),

    /// Dev server or interception layer unreachable
    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),

    /// Redirect target URL is not a well-formed absolute URL
    #[error("Invalid redirect target {url}: {reason}")]
    InvalidTarget { url: String, reason: String },

    /// Match pattern could not be compiled
    #[error("Invalid match pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Cache clear capability failed
    #[error("Cache clear failed: {0}")]
    CacheClear(String),
}

impl EngineError {
    /// Create a configuration read error
    pub fn config_read(msg: impl Into<String>) -> Self {
        Self::ConfigRead(msg.into())
    }

    /// Create a template substitution error
    pub fn template(template: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::TemplateSubstitution {
            template: template.into(),
            reason: msg.into(),
        }
    }

    /// Create a rule store error
    pub fn rule_store(msg: impl Into<String>) -> Self {
        Self::RuleStore(msg.into())
    }

    /// Create a network error
    pub fn network(msg: impl Into<String>) -> Self {
        Self::NetworkUnreachable(msg.into())
    }

    /// Create an invalid target error
    pub fn invalid_target(url: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidTarget {
            url: url.into(),
            reason: msg.into(),
        }
    }

    /// Create a cache clear error
    pub fn cache_clear(msg: impl Into<String>) -> Self {
        Self::CacheClear(msg.into())
    }

    /// Short machine-readable label, used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigRead(_) => "config_read",
            Self::TemplateSubstitution { .. } => "template_substitution",
            Self::RuleStore(_) => "rule_store",
            Self::NetworkUnreachable(_) => "network_unreachable",
            Self::InvalidTarget { .. } => "invalid_target",
            Self::InvalidPattern { .. } => "invalid_pattern",
            Self::CacheClear(_) => "cache_clear",
        }
    }
}
