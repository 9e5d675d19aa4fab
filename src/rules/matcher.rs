//! URL filter matching
//!
//! Supports the declarative filter syntax used by browser interception layers:
//! - `*` matches any run of characters
//! - a leading `|` anchors at the start of the URL
//! - a leading `||` anchors at a domain boundary (any scheme, any subdomain)
//! - a trailing `|` anchors at the end of the URL
//!
//! Matching is case-insensitive.

use regex::Regex;

use super::error::{EngineError, Result};

/// Compiled URL filter
#[derive(Debug, Clone)]
pub struct UrlFilter {
    pattern: String,
    regex: Regex,
}

impl UrlFilter {
    pub fn parse(pattern: &str) -> Result<Self> {
        if pattern.is_empty() || pattern == "|" || pattern == "||" {
            return Err(EngineError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "empty filter".to_string(),
            });
        }

        let mut body = pattern;
        let mut expr = String::from("(?i)");

        if let Some(rest) = body.strip_prefix("||") {
            expr.push_str(r"^[a-z][a-z0-9+.\-]*://([^/?#]*\.)?");
            body = rest;
        } else if let Some(rest) = body.strip_prefix('|') {
            expr.push('^');
            body = rest;
        }

        let anchored_end = body.ends_with('|');
        if anchored_end {
            body = &body[..body.len() - 1];
        }

        let segments: Vec<String> = body.split('*').map(regex::escape).collect();
        expr.push_str(&segments.join(".*"));

        if anchored_end {
            expr.push('$');
        }

        let regex = Regex::new(&expr).map_err(|e| EngineError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, url: &str) -> bool {
        self.regex.is_match(url)
    }
}
