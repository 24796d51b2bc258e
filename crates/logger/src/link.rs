use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};

/// Delay between association attempts.
const RETRY_EVERY: Duration = Duration::from_millis(500);

/// Longest wait honoured when the requested one does not fit an `Instant`.
const MAX_WAIT: Duration = Duration::from_secs(3600);

/// Network association.  Must be idempotent: calling it while already
/// connected returns `true` without delay.
#[async_trait]
pub trait Link: Send {
    async fn ensure_connected(&mut self, timeout: Duration) -> bool;
}

/// Treats "connected" as "the backend host accepts TCP connections".
pub struct HostLink {
    host: String,
    port: u16,
}

impl HostLink {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn from_url(url: &str) -> Result<Self> {
        let parsed = Url::parse(url).with_context(|| format!("invalid backend url: {url}"))?;
        let host = parsed
            .host_str()
            .with_context(|| format!("backend url has no host: {url}"))?;
        let port = parsed
            .port_or_known_default()
            .with_context(|| format!("backend url has no port: {url}"))?;
        Ok(Self::new(host, port))
    }

    async fn probe(&self, budget: Duration) -> bool {
        matches!(
            timeout(budget, TcpStream::connect((self.host.as_str(), self.port))).await,
            Ok(Ok(_))
        )
    }
}

#[async_trait]
impl Link for HostLink {
    async fn ensure_connected(&mut self, limit: Duration) -> bool {
        let start = Instant::now();
        let deadline = start
            .checked_add(limit)
            .unwrap_or_else(|| start + MAX_WAIT);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if self.probe(remaining.max(Duration::from_millis(1))).await {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::warn!(host = %self.host, port = self.port, "backend unreachable");
                return false;
            }
            tracing::debug!(host = %self.host, port = self.port, "waiting for network");
            sleep(remaining.min(RETRY_EVERY)).await;
        }
    }
}
