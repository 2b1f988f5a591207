use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::StoreConfig;
use crate::error::{AppError, Context, Result};
use crate::fetch::Bar;

/// Persisted form of a [`Bar`]. The `@timestamp` is the capture time,
/// assigned when the document is built for writing, not when the bar was
/// fetched. Documents are append-only; there is no update or delete path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarDocument {
    pub symbol: String,
    #[serde(rename = "@timestamp")]
    pub timestamp: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl BarDocument {
    /// Stamp a fetched bar with the current wall-clock UTC time.
    pub fn from_bar(bar: &Bar) -> Self {
        Self {
            symbol: bar.symbol.clone(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
        }
    }
}

#[async_trait]
pub trait BarSink: Send + Sync {
    async fn write(&self, doc: &BarDocument) -> Result<()>;
}

/// Thin client over the store's REST API: connectivity check, append-only
/// document writes and read-only searches. Credentials travel as basic auth
/// on every request.
pub struct EsStore {
    client: Client,
    config: StoreConfig,
}

impl EsStore {
    pub fn new(config: StoreConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to construct store HTTP client")?;

        Ok(Self { client, config })
    }

    pub fn index(&self) -> &str {
        &self.config.index
    }

    /// Connectivity check used at startup; any transport or auth failure
    /// reads as unreachable.
    pub async fn ping(&self) -> bool {
        let request = self
            .client
            .get(&self.config.url)
            .basic_auth(&self.config.username, Some(&self.config.password));

        match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Issue a read-only `_search` against the configured index and return
    /// the raw response body.
    pub async fn search(&self, body: &Value) -> Result<Value> {
        let url = format!("{}/{}/_search", self.config.url, self.config.index);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .json(body)
            .send()
            .await
            .context("Search request failed")?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::message(format!(
                "Search against {} failed with status {}",
                self.config.index, status
            )));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl BarSink for EsStore {
    async fn write(&self, doc: &BarDocument) -> Result<()> {
        let url = format!("{}/{}/_doc", self.config.url, self.config.index);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .json(doc)
            .send()
            .await
            .with_context(|| format!("Index request failed for {}", doc.symbol))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::message(format!(
                "Indexing {} failed with status {}",
                doc.symbol, status
            )));
        }

        Ok(())
    }
}
