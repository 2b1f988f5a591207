use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use reqwest::Client;
use serde_json::Value;

use crate::error::{AppError, Context, Result};

const CHART_ENDPOINT: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
const CHART_RANGE: &str = "1d";
const CHART_INTERVAL: &str = "1m";
const FETCHER_USER_AGENT: &str = "Mozilla/5.0 (compatible; stock-pipeline/0.1)";

/// One OHLCV sample for a symbol. Prices are floats, volume is a
/// non-negative integer. The store timestamp is assigned at write time,
/// so no exchange timestamp is carried here.
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// Outcome of one provider call. `Empty` means the provider answered but
/// returned no usable samples; it is logged as a warning downstream, not
/// an error.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Bar(Bar),
    Empty,
}

#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn fetch(&self, symbol: &str) -> Result<FetchOutcome>;
}

/// Fetches the most recent intraday bar for one symbol from the Yahoo
/// Finance chart endpoint (1-day window at 1-minute resolution).
pub struct QuoteFetcher {
    client: Client,
}

impl QuoteFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to construct quote HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl QuoteSource for QuoteFetcher {
    async fn fetch(&self, symbol: &str) -> Result<FetchOutcome> {
        let url = format!(
            "{}/{}?range={}&interval={}",
            CHART_ENDPOINT, symbol, CHART_RANGE, CHART_INTERVAL
        );

        let response = self
            .client
            .get(&url)
            .header(USER_AGENT, FETCHER_USER_AGENT)
            .send()
            .await
            .with_context(|| format!("Quote request failed for {}", symbol))?;

        if !response.status().is_success() {
            return Err(AppError::message(format!(
                "Quote request for {} failed with status {}",
                symbol,
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read quote body for {}", symbol))?;

        parse_chart_response(symbol, &body)
    }
}

/// Extract the most recent complete 1-minute sample from a chart payload.
/// Minutes that have not traded yet come back as nulls, so scan backwards
/// for the newest index where every OHLCV field is present.
fn parse_chart_response(symbol: &str, body: &str) -> Result<FetchOutcome> {
    let root: Value =
        serde_json::from_str(body).with_context(|| format!("Failed to parse chart JSON for {}", symbol))?;

    if let Some(error) = root["chart"]["error"].as_object() {
        let description = error
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("unknown provider error");
        return Err(AppError::message(format!(
            "Provider error for {}: {}",
            symbol, description
        )));
    }

    let Some(result) = root["chart"]["result"].get(0) else {
        return Ok(FetchOutcome::Empty);
    };

    let Some(timestamps) = result["timestamp"].as_array() else {
        return Ok(FetchOutcome::Empty);
    };

    let quote = &result["indicators"]["quote"][0];

    for index in (0..timestamps.len()).rev() {
        let open = quote["open"].get(index).and_then(Value::as_f64);
        let high = quote["high"].get(index).and_then(Value::as_f64);
        let low = quote["low"].get(index).and_then(Value::as_f64);
        let close = quote["close"].get(index).and_then(Value::as_f64);
        let volume = quote["volume"].get(index).and_then(json_volume);

        if let (Some(open), Some(high), Some(low), Some(close), Some(volume)) =
            (open, high, low, close, volume)
        {
            return Ok(FetchOutcome::Bar(Bar {
                symbol: symbol.to_string(),
                open,
                high,
                low,
                close,
                volume,
            }));
        }
    }

    Ok(FetchOutcome::Empty)
}

fn json_volume(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().map(|v| v.max(0.0) as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_most_recent_complete_sample() {
        let body = r#"{
            "chart": {
                "result": [{
                    "timestamp": [1700000000, 1700000060, 1700000120],
                    "indicators": {
                        "quote": [{
                            "open": [189.1, 189.4, null],
                            "high": [189.5, 189.9, null],
                            "low": [188.9, 189.2, null],
                            "close": [189.3, 189.8, null],
                            "volume": [120000, 98000, null]
                        }]
                    }
                }],
                "error": null
            }
        }"#;

        let outcome = parse_chart_response("AAPL", body).unwrap();

        let FetchOutcome::Bar(bar) = outcome else {
            panic!("expected a bar");
        };
        assert_eq!(bar.symbol, "AAPL");
        assert!((bar.open - 189.4).abs() < 1e-9);
        assert!((bar.close - 189.8).abs() < 1e-9);
        assert_eq!(bar.volume, 98000);
    }

    #[test]
    fn all_null_samples_are_empty() {
        let body = r#"{
            "chart": {
                "result": [{
                    "timestamp": [1700000000],
                    "indicators": {
                        "quote": [{
                            "open": [null],
                            "high": [null],
                            "low": [null],
                            "close": [null],
                            "volume": [null]
                        }]
                    }
                }],
                "error": null
            }
        }"#;

        assert_eq!(parse_chart_response("TEST", body).unwrap(), FetchOutcome::Empty);
    }

    #[test]
    fn missing_result_is_empty_when_no_error() {
        let body = r#"{"chart": {"result": null, "error": null}}"#;

        assert_eq!(parse_chart_response("TEST", body).unwrap(), FetchOutcome::Empty);
    }

    #[test]
    fn provider_error_is_an_error() {
        let body = r#"{
            "chart": {
                "result": null,
                "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}
            }
        }"#;

        let error = parse_chart_response("GONE", body).unwrap_err();
        assert!(error.to_string().contains("delisted"));
    }

    #[test]
    fn fractional_volume_is_truncated() {
        let body = r#"{
            "chart": {
                "result": [{
                    "timestamp": [1700000000],
                    "indicators": {
                        "quote": [{
                            "open": [10.0],
                            "high": [10.5],
                            "low": [9.8],
                            "close": [10.2],
                            "volume": [1234.9]
                        }]
                    }
                }],
                "error": null
            }
        }"#;

        let FetchOutcome::Bar(bar) = parse_chart_response("FRAC", body).unwrap() else {
            panic!("expected a bar");
        };
        assert_eq!(bar.volume, 1234);
    }
}
