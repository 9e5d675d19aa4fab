//! Redirect targets - which remote assets to intercept and where to send them
//!
//! Targets and templates come from configuration storage on every call. The
//! resolver never fails: unreadable storage, missing keys and malformed URLs
//! all fall back to documented defaults, and a broken template falls back to
//! the canonical `<base>?url=<encoded original>` form.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use url::{form_urlencoded, Url};

use super::error::{EngineError, Result};
use crate::settings::{
    SettingsSnapshot, SettingsStore, KEY_CSS_REDIRECT, KEY_CSS_URL, KEY_JS_REDIRECT, KEY_JS_URL,
};

/// Placeholder replaced by the percent-encoded original URL
pub const URL_PLACEHOLDER: &str = "{{URL}}";

/// Local dev server used when nothing else is configured
pub const DEFAULT_DEV_HOST: &str = "http://localhost:3000";

/// Path on the dev server that serves redirected assets
pub const DEFAULT_REDIRECT_PATH: &str = "/test-url";

/// Institution brand stylesheet served by the LMS
pub const DEFAULT_CSS_URL: &str =
    "https://instructure-uploads.s3.amazonaws.com/account_1/attachments/brand/custom.css";

/// Institution brand script served by the LMS
pub const DEFAULT_JS_URL: &str =
    "https://instructure-uploads.s3.amazonaws.com/account_1/attachments/brand/custom.js";

/// Kind of sub-resource a rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Stylesheet,
    Script,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 2] = [ResourceKind::Stylesheet, ResourceKind::Script];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stylesheet => "stylesheet",
            Self::Script => "script",
        }
    }

    /// Guess the kind from a `Sec-Fetch-Dest` value
    pub fn from_fetch_dest(dest: &str) -> Option<Self> {
        match dest.trim().to_ascii_lowercase().as_str() {
            "style" | "stylesheet" => Some(Self::Stylesheet),
            "script" | "worker" | "sharedworker" => Some(Self::Script),
            _ => None,
        }
    }

    /// Guess the kind from the path extension of a URL
    pub fn from_url_path(url: &str) -> Option<Self> {
        let path = Url::parse(url).ok()?.path().to_ascii_lowercase();
        if path.ends_with(".css") {
            Some(Self::Stylesheet)
        } else if path.ends_with(".js") || path.ends_with(".mjs") {
            Some(Self::Script)
        } else {
            None
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stylesheet" | "css" => Ok(Self::Stylesheet),
            "script" | "js" => Ok(Self::Script),
            other => Err(format!("unknown resource kind: {}", other)),
        }
    }
}

/// An original remote asset the engine intends to intercept
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectTarget {
    pub resource_kind: ResourceKind,
    pub original_url: String,
    pub match_pattern: String,
}

impl RedirectTarget {
    /// Build a target, rejecting anything that is not an absolute http(s) URL
    pub fn new(resource_kind: ResourceKind, original_url: &str) -> Result<Self> {
        let original_url = original_url.trim();
        let parsed = Url::parse(original_url)
            .map_err(|e| EngineError::invalid_target(original_url, e.to_string()))?;

        if !matches!(parsed.scheme(), "http" | "https") || !parsed.has_host() {
            return Err(EngineError::invalid_target(
                original_url,
                "expected an absolute http(s) URL",
            ));
        }

        // Match on the serialization clients actually request
        Ok(Self::from_valid_url(resource_kind, parsed.as_str()))
    }

    /// Documented default target for a resource kind
    pub fn default_for(resource_kind: ResourceKind) -> Self {
        let url = match resource_kind {
            ResourceKind::Stylesheet => DEFAULT_CSS_URL,
            ResourceKind::Script => DEFAULT_JS_URL,
        };
        Self::from_valid_url(resource_kind, url)
    }

    fn from_valid_url(resource_kind: ResourceKind, original_url: &str) -> Self {
        Self {
            resource_kind,
            original_url: original_url.to_string(),
            match_pattern: format!("|{}", original_url),
        }
    }
}

/// Default redirect template for a dev host
pub fn default_template(dev_host: &str) -> String {
    format!(
        "{}{}?url={}",
        dev_host.trim_end_matches('/'),
        DEFAULT_REDIRECT_PATH,
        URL_PLACEHOLDER
    )
}

/// Apply a redirect template, falling back to `<base>?url=<encoded>` on failure
///
/// The fallback base is taken from the template itself when it parses as a
/// URL, otherwise from the default dev host.
pub fn resolve_redirect_url(template: &str, original_url: &str) -> String {
    resolve_with_default_base(template, original_url, DEFAULT_DEV_HOST)
}

fn resolve_with_default_base(template: &str, original_url: &str, dev_host: &str) -> String {
    match substitute(template, original_url) {
        Ok(url) => url,
        Err(e) => {
            debug!(error = %e, "Template unusable, building fallback redirect");
            fallback_redirect_url(template, original_url, dev_host)
        }
    }
}

fn encode_component(value: &str) -> String {
    // byte_serialize writes spaces as '+' and literal '+' as %2B
    form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

fn substitute(template: &str, original_url: &str) -> Result<String> {
    match template.matches(URL_PLACEHOLDER).count() {
        1 => {}
        0 => return Err(EngineError::template(template, "placeholder missing")),
        n => {
            return Err(EngineError::template(
                template,
                format!("expected one placeholder, found {}", n),
            ))
        }
    }

    let candidate = template.replacen(URL_PLACEHOLDER, &encode_component(original_url), 1);
    let parsed = Url::parse(candidate.trim())
        .map_err(|e| EngineError::template(template, e.to_string()))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(EngineError::template(
            template,
            format!("unsupported scheme {}", parsed.scheme()),
        ));
    }

    Ok(parsed.into())
}

fn fallback_base(template: &str, dev_host: &str) -> Option<Url> {
    let usable = |u: &Url| matches!(u.scheme(), "http" | "https") && u.has_host();

    let stripped = template.replace(URL_PLACEHOLDER, "");
    if let Ok(url) = Url::parse(stripped.trim()) {
        if usable(&url) {
            return Some(url);
        }
    }

    [default_template(dev_host), default_template(DEFAULT_DEV_HOST)]
        .iter()
        .filter_map(|t| Url::parse(&t.replace(URL_PLACEHOLDER, "")).ok())
        .find(|u| usable(u))
}

fn fallback_redirect_url(template: &str, original_url: &str, dev_host: &str) -> String {
    let Some(mut base) = fallback_base(template, dev_host) else {
        return format!(
            "{}{}?url={}",
            DEFAULT_DEV_HOST,
            DEFAULT_REDIRECT_PATH,
            encode_component(original_url)
        );
    };

    base.set_fragment(None);
    let mut query: Vec<String> = base
        .query_pairs()
        .filter(|(k, _)| k != "url")
        .map(|(k, v)| format!("{}={}", encode_component(&k), encode_component(&v)))
        .collect();
    query.push(format!("url={}", encode_component(original_url)));

    base.set_query(Some(&query.join("&")));
    base.to_string()
}

/// Targets and templates captured from a single storage read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTargets {
    pub css: RedirectTarget,
    pub js: RedirectTarget,
    pub css_template: String,
    pub js_template: String,
}

impl ResolvedTargets {
    /// Target paired with its template, stylesheet first
    pub fn pairs(&self) -> [(&RedirectTarget, &str); 2] {
        [
            (&self.css, self.css_template.as_str()),
            (&self.js, self.js_template.as_str()),
        ]
    }
}

/// Reads redirect targets and templates from configuration storage
pub struct RedirectTargetResolver {
    settings: Arc<dyn SettingsStore>,
    dev_host: String,
}

impl RedirectTargetResolver {
    pub fn new(settings: Arc<dyn SettingsStore>, dev_host: impl Into<String>) -> Self {
        Self {
            settings,
            dev_host: dev_host.into(),
        }
    }

    pub fn dev_host(&self) -> &str {
        &self.dev_host
    }

    /// Read storage once and resolve both targets and templates
    pub async fn load(&self) -> ResolvedTargets {
        let snapshot = match self.settings.read_all().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Configuration read failed, using defaults");
                SettingsSnapshot::new()
            }
        };

        let default_template = default_template(&self.dev_host);

        ResolvedTargets {
            css: Self::target_from(&snapshot, KEY_CSS_URL, ResourceKind::Stylesheet),
            js: Self::target_from(&snapshot, KEY_JS_URL, ResourceKind::Script),
            css_template: Self::value_or(&snapshot, KEY_CSS_REDIRECT, &default_template),
            js_template: Self::value_or(&snapshot, KEY_JS_REDIRECT, &default_template),
        }
    }

    /// Current `(css, js)` targets
    pub async fn get_targets(&self) -> (RedirectTarget, RedirectTarget) {
        let resolved = self.load().await;
        (resolved.css, resolved.js)
    }

    /// Current `(css, js)` templates
    pub async fn get_templates(&self) -> (String, String) {
        let resolved = self.load().await;
        (resolved.css_template, resolved.js_template)
    }

    /// Apply a template, using this resolver's dev host as last-resort base
    pub fn resolve_redirect_url(&self, template: &str, original_url: &str) -> String {
        resolve_with_default_base(template, original_url, &self.dev_host)
    }

    fn value_or(snapshot: &SettingsSnapshot, key: &str, default: &str) -> String {
        snapshot
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .unwrap_or(default)
            .to_string()
    }

    fn target_from(snapshot: &SettingsSnapshot, key: &str, kind: ResourceKind) -> RedirectTarget {
        let Some(raw) = snapshot.get(key).filter(|v| !v.trim().is_empty()) else {
            return RedirectTarget::default_for(kind);
        };

        RedirectTarget::new(kind, raw).unwrap_or_else(|e| {
            warn!(key = key, error = %e, "Ignoring malformed target URL, using default");
            RedirectTarget::default_for(kind)
        })
    }
}
