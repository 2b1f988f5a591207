pub mod cache;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::queries::cache::{CacheKey, TtlCache, CACHE_TTL};
use crate::store::{BarDocument, EsStore};

const LATEST_TERMS_SIZE: usize = 10_000;
const TIMESERIES_MAX_HITS: usize = 1_000;
const HEATMAP_TERMS_SIZE: usize = 50;
const HEATMAP_INTERVAL: &str = "5m";
const VOLATILITY_TERMS_SIZE: usize = 50;
const AVG_VOLUME_TERMS_SIZE: usize = 20;
const PRICE_CHANGE_TERMS_SIZE: usize = 50;
const VOLUME_HISTOGRAM_INTERVAL: u64 = 100_000;

/// A raw stored document, as returned by searches. Identical in shape to
/// the write-path [`BarDocument`].
pub type BarRow = BarDocument;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeCell {
    pub symbol: String,
    pub timestamp: String,
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolatilityRow {
    pub symbol: String,
    pub volatility: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AverageVolumeRow {
    pub symbol: String,
    pub avg_volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceChangeRow {
    pub symbol: String,
    pub price_change: f64,
    pub total_volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBin {
    pub volume_bin: f64,
    pub doc_count: u64,
}

/// Fixed catalog of read-only aggregation queries. Each call is a pure
/// mapping from parameters to tabular rows, memoized for [`CACHE_TTL`]
/// keyed by the query name and its rendered arguments.
pub struct QueryCatalog {
    store: EsStore,
    cache: Mutex<TtlCache>,
}

impl QueryCatalog {
    pub fn new(store: EsStore) -> Self {
        Self {
            store,
            cache: Mutex::new(TtlCache::new(CACHE_TTL)),
        }
    }

    /// Latest stored document per symbol: top-1 by `@timestamp` inside a
    /// terms bucket per symbol.
    pub async fn latest_per_symbol(&self) -> Result<Vec<BarRow>> {
        self.cached(CacheKey::new("latest_per_symbol", ""), latest_per_symbol_body(), parse_latest)
            .await
    }

    /// Raw series for a symbol set within a relative window, oldest first.
    pub async fn timeseries(&self, symbols: &[String], hours: i64) -> Result<Vec<BarRow>> {
        let key = CacheKey::new("timeseries", format!("{}|{}", symbols.join(","), hours));
        self.cached(key, timeseries_body(symbols, hours), parse_hits)
            .await
    }

    /// Total volume per symbol per fixed time bucket.
    pub async fn volume_heatmap(&self) -> Result<Vec<VolumeCell>> {
        self.cached(CacheKey::new("volume_heatmap", ""), volume_heatmap_body(), parse_heatmap)
            .await
    }

    /// Close-price spread (max minus min) per symbol.
    pub async fn price_volatility(&self) -> Result<Vec<VolatilityRow>> {
        self.cached(
            CacheKey::new("price_volatility", ""),
            price_volatility_body(),
            parse_volatility,
        )
        .await
    }

    /// Mean volume per symbol.
    pub async fn average_volume(&self) -> Result<Vec<AverageVolumeRow>> {
        self.cached(
            CacheKey::new("average_volume", ""),
            average_volume_body(),
            parse_average_volume,
        )
        .await
    }

    /// Close-price spread paired with total traded volume per symbol.
    pub async fn price_change_vs_volume(&self) -> Result<Vec<PriceChangeRow>> {
        self.cached(
            CacheKey::new("price_change_vs_volume", ""),
            price_change_vs_volume_body(),
            parse_price_change,
        )
        .await
    }

    /// Fixed-width histogram of volume values across all documents.
    pub async fn volume_histogram(&self) -> Result<Vec<HistogramBin>> {
        self.cached(
            CacheKey::new("volume_histogram", ""),
            volume_histogram_body(),
            parse_histogram,
        )
        .await
    }

    /// Newest raw documents, most recent first. Feeds the raw-data panel
    /// and the default symbol selection.
    pub async fn recent_documents(&self, size: usize) -> Result<Vec<BarRow>> {
        let key = CacheKey::new("recent_documents", size.to_string());
        self.cached(key, recent_documents_body(size), parse_hits).await
    }

    async fn cached<T>(
        &self,
        key: CacheKey,
        body: Value,
        parse: fn(&Value) -> Result<Vec<T>>,
    ) -> Result<Vec<T>>
    where
        T: Serialize + for<'de> Deserialize<'de>,
    {
        if let Some(hit) = self.cache.lock().await.get(&key) {
            return Ok(serde_json::from_value(hit)?);
        }

        let response = self.store.search(&body).await?;
        let rows = parse(&response)?;

        self.cache
            .lock()
            .await
            .insert(key, serde_json::to_value(&rows)?);

        Ok(rows)
    }
}

fn latest_per_symbol_body() -> Value {
    json!({
        "query": {"match_all": {}},
        "aggs": {
            "by_symbol": {
                "terms": {"field": "symbol.keyword", "size": LATEST_TERMS_SIZE},
                "aggs": {
                    "latest_doc": {
                        "top_hits": {
                            "sort": [{"@timestamp": {"order": "desc"}}],
                            "size": 1
                        }
                    }
                }
            }
        },
        "size": 0
    })
}

fn timeseries_body(symbols: &[String], hours: i64) -> Value {
    json!({
        "query": {
            "bool": {
                "filter": [
                    {"terms": {"symbol.keyword": symbols}},
                    {"range": {"@timestamp": {"gte": format!("now-{}h", hours)}}}
                ]
            }
        },
        "sort": [{"@timestamp": {"order": "asc"}}],
        "size": TIMESERIES_MAX_HITS
    })
}

fn volume_heatmap_body() -> Value {
    json!({
        "query": {"match_all": {}},
        "aggs": {
            "by_symbol": {
                "terms": {"field": "symbol.keyword", "size": HEATMAP_TERMS_SIZE},
                "aggs": {
                    "by_time": {
                        "date_histogram": {"field": "@timestamp", "fixed_interval": HEATMAP_INTERVAL},
                        "aggs": {"total_volume": {"sum": {"field": "volume"}}}
                    }
                }
            }
        },
        "size": 0
    })
}

fn price_volatility_body() -> Value {
    json!({
        "query": {"match_all": {}},
        "aggs": {
            "by_symbol": {
                "terms": {"field": "symbol.keyword", "size": VOLATILITY_TERMS_SIZE},
                "aggs": {
                    "price_stats": {"stats": {"field": "close"}}
                }
            }
        },
        "size": 0
    })
}

fn average_volume_body() -> Value {
    json!({
        "query": {"match_all": {}},
        "aggs": {
            "by_symbol": {
                "terms": {"field": "symbol.keyword", "size": AVG_VOLUME_TERMS_SIZE},
                "aggs": {"avg_volume": {"avg": {"field": "volume"}}}
            }
        },
        "size": 0
    })
}

fn price_change_vs_volume_body() -> Value {
    json!({
        "query": {"match_all": {}},
        "aggs": {
            "by_symbol": {
                "terms": {"field": "symbol.keyword", "size": PRICE_CHANGE_TERMS_SIZE},
                "aggs": {
                    "price_stats": {"stats": {"field": "close"}},
                    "total_volume": {"sum": {"field": "volume"}}
                }
            }
        },
        "size": 0
    })
}

fn volume_histogram_body() -> Value {
    json!({
        "query": {"match_all": {}},
        "aggs": {
            "by_volume": {
                "histogram": {"field": "volume", "interval": VOLUME_HISTOGRAM_INTERVAL},
                "aggs": {"by_symbol": {"terms": {"field": "symbol.keyword", "size": 10}}}
            }
        },
        "size": 0
    })
}

fn recent_documents_body(size: usize) -> Value {
    json!({
        "query": {"match_all": {}},
        "sort": [{"@timestamp": {"order": "desc"}}],
        "size": size
    })
}

fn buckets<'a>(response: &'a Value, agg: &str) -> &'a [Value] {
    response["aggregations"][agg]["buckets"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn parse_latest(response: &Value) -> Result<Vec<BarRow>> {
    let mut rows = Vec::new();
    for bucket in buckets(response, "by_symbol") {
        let Some(source) = bucket["latest_doc"]["hits"]["hits"]
            .get(0)
            .map(|hit| &hit["_source"])
        else {
            continue;
        };
        rows.push(serde_json::from_value(source.clone())?);
    }
    Ok(rows)
}

fn parse_hits(response: &Value) -> Result<Vec<BarRow>> {
    let hits = response["hits"]["hits"].as_array().map(Vec::as_slice).unwrap_or(&[]);

    let mut rows = Vec::with_capacity(hits.len());
    for hit in hits {
        rows.push(serde_json::from_value(hit["_source"].clone())?);
    }
    Ok(rows)
}

fn parse_heatmap(response: &Value) -> Result<Vec<VolumeCell>> {
    let mut cells = Vec::new();
    for bucket in buckets(response, "by_symbol") {
        let Some(symbol) = bucket["key"].as_str() else {
            continue;
        };
        let time_buckets = bucket["by_time"]["buckets"].as_array().map(Vec::as_slice).unwrap_or(&[]);
        for time_bucket in time_buckets {
            let Some(timestamp) = time_bucket["key_as_string"].as_str() else {
                continue;
            };
            cells.push(VolumeCell {
                symbol: symbol.to_string(),
                timestamp: timestamp.to_string(),
                volume: time_bucket["total_volume"]["value"].as_f64().unwrap_or(0.0),
            });
        }
    }
    Ok(cells)
}

fn parse_volatility(response: &Value) -> Result<Vec<VolatilityRow>> {
    let mut rows = Vec::new();
    for bucket in buckets(response, "by_symbol") {
        let Some(symbol) = bucket["key"].as_str() else {
            continue;
        };
        let (Some(max), Some(min)) = (
            bucket["price_stats"]["max"].as_f64(),
            bucket["price_stats"]["min"].as_f64(),
        ) else {
            continue;
        };
        rows.push(VolatilityRow {
            symbol: symbol.to_string(),
            volatility: max - min,
        });
    }
    Ok(rows)
}

fn parse_average_volume(response: &Value) -> Result<Vec<AverageVolumeRow>> {
    let mut rows = Vec::new();
    for bucket in buckets(response, "by_symbol") {
        let Some(symbol) = bucket["key"].as_str() else {
            continue;
        };
        let Some(avg_volume) = bucket["avg_volume"]["value"].as_f64() else {
            continue;
        };
        rows.push(AverageVolumeRow {
            symbol: symbol.to_string(),
            avg_volume,
        });
    }
    Ok(rows)
}

fn parse_price_change(response: &Value) -> Result<Vec<PriceChangeRow>> {
    let mut rows = Vec::new();
    for bucket in buckets(response, "by_symbol") {
        let Some(symbol) = bucket["key"].as_str() else {
            continue;
        };
        let (Some(max), Some(min)) = (
            bucket["price_stats"]["max"].as_f64(),
            bucket["price_stats"]["min"].as_f64(),
        ) else {
            continue;
        };
        rows.push(PriceChangeRow {
            symbol: symbol.to_string(),
            price_change: max - min,
            total_volume: bucket["total_volume"]["value"].as_f64().unwrap_or(0.0),
        });
    }
    Ok(rows)
}

fn parse_histogram(response: &Value) -> Result<Vec<HistogramBin>> {
    let mut bins = Vec::new();
    for bucket in buckets(response, "by_volume") {
        let Some(volume_bin) = bucket["key"].as_f64() else {
            continue;
        };
        bins.push(HistogramBin {
            volume_bin,
            doc_count: bucket["doc_count"].as_u64().unwrap_or(0),
        });
    }
    Ok(bins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source(symbol: &str, timestamp: &str, close: f64) -> Value {
        json!({
            "symbol": symbol,
            "@timestamp": timestamp,
            "open": close - 0.5,
            "high": close + 0.5,
            "low": close - 1.0,
            "close": close,
            "volume": 120000
        })
    }

    #[test]
    fn latest_returns_one_row_per_symbol_at_max_timestamp() {
        // Two symbols, two timestamps each; the store answers with the
        // top-1 hit per bucket, newest first.
        let response = json!({
            "aggregations": {
                "by_symbol": {
                    "buckets": [
                        {
                            "key": "A",
                            "latest_doc": {"hits": {"hits": [
                                {"_source": source("A", "2026-08-30T10:05:00Z", 11.0)}
                            ]}}
                        },
                        {
                            "key": "B",
                            "latest_doc": {"hits": {"hits": [
                                {"_source": source("B", "2026-08-30T10:05:00Z", 21.0)}
                            ]}}
                        }
                    ]
                }
            }
        });

        let rows = parse_latest(&response).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].symbol, "A");
        assert_eq!(rows[0].timestamp, "2026-08-30T10:05:00Z");
        assert_eq!(rows[1].symbol, "B");
        assert!((rows[1].close - 21.0).abs() < 1e-9);
    }

    #[test]
    fn hits_parse_in_response_order() {
        let response = json!({
            "hits": {"hits": [
                {"_source": source("AAPL", "2026-08-30T10:00:00Z", 190.0)},
                {"_source": source("AAPL", "2026-08-30T10:05:00Z", 191.0)}
            ]}
        });

        let rows = parse_hits(&response).unwrap();

        assert_eq!(rows.len(), 2);
        assert!(rows[0].timestamp < rows[1].timestamp);
    }

    #[test]
    fn heatmap_flattens_nested_buckets() {
        let response = json!({
            "aggregations": {
                "by_symbol": {
                    "buckets": [{
                        "key": "AAPL",
                        "by_time": {"buckets": [
                            {"key_as_string": "2026-08-30T10:00:00Z", "total_volume": {"value": 250000.0}},
                            {"key_as_string": "2026-08-30T10:05:00Z", "total_volume": {"value": 120000.0}}
                        ]}
                    }]
                }
            }
        });

        let cells = parse_heatmap(&response).unwrap();

        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].symbol, "AAPL");
        assert!((cells[0].volume - 250000.0).abs() < 1e-9);
    }

    #[test]
    fn volatility_is_max_minus_min() {
        let response = json!({
            "aggregations": {
                "by_symbol": {
                    "buckets": [{
                        "key": "MSFT",
                        "price_stats": {"min": 410.0, "max": 415.5, "avg": 412.0}
                    }]
                }
            }
        });

        let rows = parse_volatility(&response).unwrap();

        assert_eq!(rows.len(), 1);
        assert!((rows[0].volatility - 5.5).abs() < 1e-9);
    }

    #[test]
    fn average_volume_reads_sub_aggregation() {
        let response = json!({
            "aggregations": {
                "by_symbol": {
                    "buckets": [
                        {"key": "AAPL", "avg_volume": {"value": 98000.5}},
                        {"key": "NEWCO", "avg_volume": {"value": null}}
                    ]
                }
            }
        });

        let rows = parse_average_volume(&response).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol, "AAPL");
    }

    #[test]
    fn price_change_pairs_spread_with_total_volume() {
        let response = json!({
            "aggregations": {
                "by_symbol": {
                    "buckets": [
                        {
                            "key": "TSLA",
                            "price_stats": {"min": 238.0, "max": 244.5, "avg": 241.0},
                            "total_volume": {"value": 1850000.0}
                        },
                        {
                            "key": "HALT",
                            "price_stats": {"min": null, "max": null},
                            "total_volume": {"value": 0.0}
                        }
                    ]
                }
            }
        });

        let rows = parse_price_change(&response).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol, "TSLA");
        assert!((rows[0].price_change - 6.5).abs() < 1e-9);
        assert!((rows[0].total_volume - 1850000.0).abs() < 1e-9);
    }

    #[test]
    fn histogram_reads_bucket_keys_and_counts() {
        let response = json!({
            "aggregations": {
                "by_volume": {
                    "buckets": [
                        {"key": 0.0, "doc_count": 14},
                        {"key": 100000.0, "doc_count": 3}
                    ]
                }
            }
        });

        let bins = parse_histogram(&response).unwrap();

        assert_eq!(bins.len(), 2);
        assert!((bins[1].volume_bin - 100000.0).abs() < 1e-9);
        assert_eq!(bins[0].doc_count, 14);
    }

    #[test]
    fn empty_store_yields_empty_rows_everywhere() {
        // An index with no documents answers without the aggregation
        // buckets; every parser must return an empty row set, not an error.
        let empty = json!({"hits": {"hits": []}, "aggregations": {}});

        assert!(parse_latest(&empty).unwrap().is_empty());
        assert!(parse_hits(&empty).unwrap().is_empty());
        assert!(parse_heatmap(&empty).unwrap().is_empty());
        assert!(parse_volatility(&empty).unwrap().is_empty());
        assert!(parse_average_volume(&empty).unwrap().is_empty());
        assert!(parse_price_change(&empty).unwrap().is_empty());
        assert!(parse_histogram(&empty).unwrap().is_empty());
    }

    #[test]
    fn timeseries_body_renders_relative_window() {
        let body = timeseries_body(&["AAPL".to_string(), "MSFT".to_string()], 6);

        assert_eq!(
            body["query"]["bool"]["filter"][1]["range"]["@timestamp"]["gte"],
            json!("now-6h")
        );
        assert_eq!(
            body["query"]["bool"]["filter"][0]["terms"]["symbol.keyword"],
            json!(["AAPL", "MSFT"])
        );
        assert_eq!(body["size"], json!(TIMESERIES_MAX_HITS));
    }

    #[test]
    fn aggregation_bodies_never_request_documents() {
        for body in [
            latest_per_symbol_body(),
            volume_heatmap_body(),
            price_volatility_body(),
            average_volume_body(),
            price_change_vs_volume_body(),
            volume_histogram_body(),
        ] {
            assert_eq!(body["size"], json!(0));
        }
    }
}
