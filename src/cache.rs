//! Cache invalidation - best-effort clearing of cached original assets
//!
//! A redirect rule only takes effect on a request that actually reaches the
//! interception layer. A cached copy of the original asset bypasses it, so
//! after enabling the engine asks the cache-clear capability to drop cached
//! copies. Failures are logged and counted, never escalated.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::metrics::EngineMetrics;
use crate::rules::{RedirectTargetResolver, ResolvedTargets, Result};

/// What to clear
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "scope", content = "urls")]
pub enum CacheScope {
    /// Cached copies of specific URLs
    Urls(Vec<String>),
    /// The whole HTTP cache
    All,
}

/// Cache-clear capability of the hosting platform
#[async_trait]
pub trait CacheClearer: Send + Sync {
    /// Drop cached entries in `scope` stored at or after `since_epoch_millis`
    async fn clear(&self, scope: &CacheScope, since_epoch_millis: i64) -> Result<()>;
}

/// Clearer for hosts with no cache of their own
///
/// The proxy front end marks every redirect `Cache-Control: no-store`, so
/// there is nothing to drop; the request is only logged.
#[derive(Debug, Default, Clone)]
pub struct LoggingCacheClearer;

#[async_trait]
impl CacheClearer for LoggingCacheClearer {
    async fn clear(&self, scope: &CacheScope, since_epoch_millis: i64) -> Result<()> {
        info!(scope = ?scope, since = since_epoch_millis, "Cache clear requested");
        Ok(())
    }
}

pub struct CacheInvalidator {
    clearer: Arc<dyn CacheClearer>,
    resolver: Arc<RedirectTargetResolver>,
    window: Duration,
}

impl CacheInvalidator {
    /// `window` bounds how far back to clear; zero clears everything
    pub fn new(
        clearer: Arc<dyn CacheClearer>,
        resolver: Arc<RedirectTargetResolver>,
        window: Duration,
    ) -> Self {
        Self {
            clearer,
            resolver,
            window,
        }
    }

    /// Clear cached copies of the current original asset URLs
    pub async fn invalidate(&self) -> Result<()> {
        let targets = self.resolver.load().await;
        self.invalidate_targets(&targets).await
    }

    /// Clear cached copies of exactly these targets
    pub async fn invalidate_targets(&self, targets: &ResolvedTargets) -> Result<()> {
        let scope = CacheScope::Urls(vec![
            targets.css.original_url.clone(),
            targets.js.original_url.clone(),
        ]);
        let since = self.since_epoch_millis();

        match self.clearer.clear(&scope, since).await {
            Ok(()) => {
                EngineMetrics::record_cache_invalidation(true);
                info!(since = since, "Cache invalidated");
                Ok(())
            }
            Err(e) => {
                EngineMetrics::record_cache_invalidation(false);
                warn!(error = %e, "Cache invalidation failed");
                Err(e)
            }
        }
    }

    /// Fire-and-forget invalidation of the targets just installed; the
    /// result is only logged
    pub fn spawn_invalidate(self: &Arc<Self>, targets: ResolvedTargets) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            // Failure already logged inside invalidate_targets()
            let _ = this.invalidate_targets(&targets).await;
        })
    }

    fn since_epoch_millis(&self) -> i64 {
        if self.window.is_zero() {
            return 0;
        }
        let window_ms = i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX);
        (chrono::Utc::now().timestamp_millis() - window_ms).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{EngineError, DEFAULT_CSS_URL, DEFAULT_DEV_HOST};
    use crate::settings::MemorySettings;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingClearer {
        calls: Mutex<Vec<(CacheScope, i64)>>,
        fail: bool,
    }

    #[async_trait]
    impl CacheClearer for RecordingClearer {
        async fn clear(&self, scope: &CacheScope, since_epoch_millis: i64) -> Result<()> {
            self.calls.lock().unwrap().push((scope.clone(), since_epoch_millis));
            if self.fail {
                Err(EngineError::cache_clear("browsing data API unavailable"))
            } else {
                Ok(())
            }
        }
    }

    fn resolver() -> Arc<RedirectTargetResolver> {
        Arc::new(RedirectTargetResolver::new(
            Arc::new(MemorySettings::new()),
            DEFAULT_DEV_HOST,
        ))
    }

    #[tokio::test]
    async fn test_invalidate_clears_original_urls() {
        let clearer = Arc::new(RecordingClearer::default());
        let invalidator = CacheInvalidator::new(clearer.clone(), resolver(), Duration::ZERO);

        invalidator.invalidate().await.unwrap();

        let calls = clearer.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, 0);
        match &calls[0].0 {
            CacheScope::Urls(urls) => assert!(urls.contains(&DEFAULT_CSS_URL.to_string())),
            CacheScope::All => panic!("expected url scope"),
        }
    }

    #[tokio::test]
    async fn test_window_sets_since() {
        let clearer = Arc::new(RecordingClearer::default());
        let invalidator =
            CacheInvalidator::new(clearer.clone(), resolver(), Duration::from_secs(3600));

        invalidator.invalidate().await.unwrap();

        let since = clearer.calls.lock().unwrap()[0].1;
        let expected = chrono::Utc::now().timestamp_millis() - 3_600_000;
        assert!((since - expected).abs() < 60_000);
    }

    #[tokio::test]
    async fn test_spawned_failure_is_contained() {
        let clearer = Arc::new(RecordingClearer {
            fail: true,
            ..Default::default()
        });
        let invalidator = Arc::new(CacheInvalidator::new(
            clearer.clone(),
            resolver(),
            Duration::ZERO,
        ));

        assert!(invalidator.invalidate().await.is_err());
        let targets = invalidator.resolver.load().await;
        invalidator.spawn_invalidate(targets).await.unwrap();
        assert_eq!(clearer.calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_scope_serialization() {
        let json = serde_json::to_value(CacheScope::Urls(vec!["https://h/a.css".into()])).unwrap();
        assert_eq!(json["scope"], "urls");
        assert_eq!(json["urls"][0], "https://h/a.css");
    }
}
