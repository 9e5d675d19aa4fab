//! Diagnostics - synthetic match tests and dev server health
//!
//! Nothing here touches the rule store's contents, so probes can run at any
//! time alongside state changes.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::metrics::EngineMetrics;
use crate::rules::{EngineError, MatchOutcome, ResourceKind, Result, RuleStore};

/// Health bodies are truncated to this many characters
const MAX_HEALTH_BODY_CHARS: usize = 1024;

/// Dev server reachability report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthReport {
    fn offline(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            status: None,
            body: None,
            error: Some(error.into()),
        }
    }
}

pub struct DiagnosticsProbe {
    store: Arc<dyn RuleStore>,
    client: reqwest::Client,
    health_url: String,
    timeout: Duration,
}

impl DiagnosticsProbe {
    /// Probe `<dev_host>/health` with the given timeout
    pub fn new(store: Arc<dyn RuleStore>, dev_host: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| EngineError::network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            store,
            client,
            health_url: format!("{}/health", dev_host.trim_end_matches('/')),
            timeout,
        })
    }

    pub fn health_url(&self) -> &str {
        &self.health_url
    }

    /// Would this request currently be redirected, and by which rule
    pub async fn test_match(&self, url: &str, kind: ResourceKind) -> Result<MatchOutcome> {
        let outcome = self.store.test_match(url, kind).await?;
        debug!(url = %url, kind = %kind, matched = outcome.matched, "Synthetic match test");
        Ok(outcome)
    }

    /// GET the dev server health endpoint; never fails, offline is a report
    pub async fn health(&self) -> HealthReport {
        let start = Instant::now();

        let report = match self.client.get(&self.health_url).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let body = match response.text().await {
                    Ok(text) => text.chars().take(MAX_HEALTH_BODY_CHARS).collect(),
                    Err(e) => {
                        warn!(error = %e, "Failed to read health body");
                        String::new()
                    }
                };

                HealthReport {
                    ok: status == 200,
                    status: Some(status),
                    body: Some(body),
                    error: None,
                }
            }
            Err(e) if e.is_timeout() => {
                warn!(url = %self.health_url, timeout_ms = self.timeout.as_millis() as u64, "Health probe timed out");
                HealthReport::offline(format!(
                    "timed out after {}ms",
                    self.timeout.as_millis()
                ))
            }
            Err(e) => {
                warn!(url = %self.health_url, error = %e, "Dev server unreachable");
                HealthReport::offline(EngineError::network(e.to_string()).to_string())
            }
        };

        EngineMetrics::record_health_probe(start.elapsed().as_secs_f64(), report.ok);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::InMemoryRuleStore;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn one_shot_server(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{}", addr)
    }

    fn probe(dev_host: &str, timeout: Duration) -> DiagnosticsProbe {
        DiagnosticsProbe::new(Arc::new(InMemoryRuleStore::new()), dev_host, timeout).unwrap()
    }

    #[tokio::test]
    async fn test_health_ok() {
        let host = one_shot_server(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 15\r\nConnection: close\r\n\r\n{\"status\":\"ok\"}",
        )
        .await;

        let report = probe(&host, Duration::from_secs(2)).health().await;
        assert!(report.ok);
        assert_eq!(report.status, Some(200));
        assert_eq!(report.body.as_deref(), Some("{\"status\":\"ok\"}"));
    }

    #[tokio::test]
    async fn test_health_non_200_is_offline() {
        let host = one_shot_server(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 8\r\nConnection: close\r\n\r\nstarting",
        )
        .await;

        let report = probe(&host, Duration::from_secs(2)).health().await;
        assert!(!report.ok);
        assert_eq!(report.status, Some(503));
    }

    #[tokio::test]
    async fn test_health_unreachable_is_structured() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let report = probe(&format!("http://{}", addr), Duration::from_secs(2))
            .health()
            .await;
        assert!(!report.ok);
        assert!(report.error.is_some());
        assert!(report.status.is_none());
    }

    #[tokio::test]
    async fn test_health_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept and never answer
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let started = Instant::now();
        let report = probe(&format!("http://{}", addr), Duration::from_millis(200))
            .health()
            .await;

        assert!(!report.ok);
        assert!(report.error.unwrap().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_health_url_strips_trailing_slash() {
        let probe = probe("http://localhost:3000/", Duration::from_secs(1));
        assert_eq!(probe.health_url(), "http://localhost:3000/health");
    }
}
