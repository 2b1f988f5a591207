use std::collections::HashSet;
use std::time::Duration;

use log::info;
use tokio::time::sleep;

use crate::error::{AppError, Result};
use crate::queries::{BarRow, QueryCatalog};

pub const REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// How many raw documents to pull for the raw-data panel and the default
/// symbol selection.
const RECENT_DOCS_SIZE: usize = 1000;
/// Rows shown in the raw-data panel before truncation.
const RAW_PANEL_ROWS: usize = 15;
/// Number of default symbols picked from the freshest documents.
const DEFAULT_SYMBOL_COUNT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Close,
    Open,
    High,
    Low,
    Volume,
}

impl Metric {
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "close" => Ok(Metric::Close),
            "open" => Ok(Metric::Open),
            "high" => Ok(Metric::High),
            "low" => Ok(Metric::Low),
            "volume" => Ok(Metric::Volume),
            other => Err(AppError::message(format!(
                "Unknown metric '{}' (expected close, open, high, low or volume)",
                other
            ))),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Metric::Close => "Close",
            Metric::Open => "Open",
            Metric::High => "High",
            Metric::Low => "Low",
            Metric::Volume => "Volume",
        }
    }

    fn of(&self, row: &BarRow) -> f64 {
        match self {
            Metric::Close => row.close,
            Metric::Open => row.open,
            Metric::High => row.high,
            Metric::Low => row.low,
            Metric::Volume => row.volume as f64,
        }
    }
}

/// Sidebar-style filter inputs, realized as subcommand flags.
#[derive(Debug, Clone)]
pub struct DashboardFilters {
    pub symbols: Vec<String>,
    pub hours: i64,
    pub metric: Metric,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PanelBody {
    Table {
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    Notice(String),
}

/// One rendered dashboard section. A query error or empty result becomes
/// an inline notice for this panel only; sibling panels are unaffected.
#[derive(Debug, Clone, PartialEq)]
pub struct Panel {
    pub title: String,
    pub body: PanelBody,
}

impl Panel {
    pub fn from_rows<T, F>(title: &str, result: Result<Vec<T>>, to_table: F) -> Self
    where
        F: Fn(&[T]) -> (Vec<String>, Vec<Vec<String>>),
    {
        let body = match result {
            Ok(rows) if rows.is_empty() => PanelBody::Notice("No data.".to_string()),
            Ok(rows) => {
                let (headers, rows) = to_table(&rows);
                PanelBody::Table { headers, rows }
            }
            Err(e) => PanelBody::Notice(format!("Error: {}", e)),
        };

        Self {
            title: title.to_string(),
            body,
        }
    }

    pub fn render(&self) -> String {
        let mut out = format!("== {} ==\n", self.title);
        match &self.body {
            PanelBody::Notice(notice) => {
                out.push_str(notice);
                out.push('\n');
            }
            PanelBody::Table { headers, rows } => {
                out.push_str(&render_table(headers, rows));
            }
        }
        out
    }
}

/// One full render pass over the panel catalog. Every panel catches its
/// own query failure, so the pass itself always produces output.
pub async fn render_once(catalog: &QueryCatalog, filters: &DashboardFilters) -> String {
    let recent = catalog.recent_documents(RECENT_DOCS_SIZE).await;
    let chart_symbols = chart_symbols(filters, &recent);

    let mut panels = Vec::new();

    panels.push(Panel::from_rows(
        "Latest Per Symbol",
        catalog.latest_per_symbol().await,
        bar_table,
    ));

    panels.push(Panel::from_rows(
        &format!("{} Trends", filters.metric.label()),
        catalog.timeseries(&chart_symbols, filters.hours).await,
        |rows| metric_table(rows, filters.metric),
    ));

    panels.push(Panel::from_rows(
        "Volume Heatmap",
        catalog.volume_heatmap().await,
        |cells| {
            let headers = to_strings(&["symbol", "@timestamp", "volume"]);
            let rows = cells
                .iter()
                .map(|cell| {
                    vec![
                        cell.symbol.clone(),
                        cell.timestamp.clone(),
                        format!("{:.0}", cell.volume),
                    ]
                })
                .collect();
            (headers, rows)
        },
    ));

    panels.push(Panel::from_rows(
        "Price Volatility",
        catalog.price_volatility().await,
        |rows| {
            let headers = to_strings(&["symbol", "volatility"]);
            let rows = rows
                .iter()
                .map(|row| vec![row.symbol.clone(), format!("{:.4}", row.volatility)])
                .collect();
            (headers, rows)
        },
    ));

    panels.push(Panel::from_rows(
        "Average Volume",
        catalog.average_volume().await,
        |rows| {
            let headers = to_strings(&["symbol", "avg_volume"]);
            let rows = rows
                .iter()
                .map(|row| vec![row.symbol.clone(), format!("{:.1}", row.avg_volume)])
                .collect();
            (headers, rows)
        },
    ));

    panels.push(Panel::from_rows(
        "Price Change vs Volume",
        catalog.price_change_vs_volume().await,
        |rows| {
            let headers = to_strings(&["symbol", "price_change", "total_volume"]);
            let rows = rows
                .iter()
                .map(|row| {
                    vec![
                        row.symbol.clone(),
                        format!("{:.4}", row.price_change),
                        format!("{:.0}", row.total_volume),
                    ]
                })
                .collect();
            (headers, rows)
        },
    ));

    panels.push(Panel::from_rows(
        "Volume Distribution",
        catalog.volume_histogram().await,
        |bins| {
            let headers = to_strings(&["volume_bin", "doc_count"]);
            let rows = bins
                .iter()
                .map(|bin| vec![format!("{:.0}", bin.volume_bin), bin.doc_count.to_string()])
                .collect();
            (headers, rows)
        },
    ));

    panels.push(Panel::from_rows(
        "Raw Ingested Data",
        recent.map(|rows| rows.into_iter().take(RAW_PANEL_ROWS).collect()),
        bar_table,
    ));

    let mut out = String::new();
    for panel in &panels {
        out.push_str(&panel.render());
        out.push('\n');
    }
    out
}

/// Render once, or keep re-rendering on the refresh interval when `watch`
/// is set.
pub async fn run(catalog: &QueryCatalog, filters: &DashboardFilters, watch: bool) {
    loop {
        let output = render_once(catalog, filters).await;
        println!("{}", output);

        if !watch {
            return;
        }
        info!("Next refresh in {:?}", REFRESH_INTERVAL);
        sleep(REFRESH_INTERVAL).await;
    }
}

/// Symbols for the time-series panels. Explicit selections are limited to
/// symbols actually seen in the store so a typo cannot query for nothing;
/// with no selection the first few freshest symbols are used.
fn chart_symbols(filters: &DashboardFilters, recent: &Result<Vec<BarRow>>) -> Vec<String> {
    let seen = seen_symbols(recent);

    if filters.symbols.is_empty() {
        return seen.into_iter().take(DEFAULT_SYMBOL_COUNT).collect();
    }

    filters
        .symbols
        .iter()
        .filter(|symbol| seen.contains(*symbol))
        .cloned()
        .collect()
}

/// Distinct symbols among the freshest documents, newest first. Mirrors the
/// sidebar's dynamic symbol list; an unreadable store just yields none.
fn seen_symbols(recent: &Result<Vec<BarRow>>) -> Vec<String> {
    let Ok(rows) = recent else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut symbols = Vec::new();
    for row in rows {
        if seen.insert(row.symbol.clone()) {
            symbols.push(row.symbol.clone());
        }
    }
    symbols
}

fn bar_table(rows: &[BarRow]) -> (Vec<String>, Vec<Vec<String>>) {
    let headers = to_strings(&["symbol", "@timestamp", "open", "high", "low", "close", "volume"]);
    let rows = rows
        .iter()
        .map(|row| {
            vec![
                row.symbol.clone(),
                row.timestamp.clone(),
                format!("{:.2}", row.open),
                format!("{:.2}", row.high),
                format!("{:.2}", row.low),
                format!("{:.2}", row.close),
                row.volume.to_string(),
            ]
        })
        .collect();
    (headers, rows)
}

fn metric_table(rows: &[BarRow], metric: Metric) -> (Vec<String>, Vec<Vec<String>>) {
    let headers = to_strings(&["@timestamp", "symbol", metric.label()]);
    let rows = rows
        .iter()
        .map(|row| {
            vec![
                row.timestamp.clone(),
                row.symbol.clone(),
                format!("{:.2}", metric.of(row)),
            ]
        })
        .collect();
    (headers, rows)
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(String::len).collect();
    for row in rows {
        for (index, cell) in row.iter().enumerate() {
            if index < widths.len() {
                widths[index] = widths[index].max(cell.len());
            }
        }
    }

    let mut out = String::new();
    render_row(&mut out, headers, &widths);
    for row in rows {
        render_row(&mut out, row, &widths);
    }
    out
}

fn render_row(out: &mut String, cells: &[String], widths: &[usize]) {
    for (index, cell) in cells.iter().enumerate() {
        if index > 0 {
            out.push_str("  ");
        }
        let width = widths.get(index).copied().unwrap_or(cell.len());
        out.push_str(&format!("{:<width$}", cell, width = width));
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar_row(symbol: &str, timestamp: &str) -> BarRow {
        BarRow {
            symbol: symbol.to_string(),
            timestamp: timestamp.to_string(),
            open: 10.0,
            high: 11.0,
            low: 9.5,
            close: 10.5,
            volume: 5000,
        }
    }

    #[test]
    fn metric_parse_accepts_known_names() {
        assert_eq!(Metric::parse("close").unwrap(), Metric::Close);
        assert_eq!(Metric::parse("VOLUME").unwrap(), Metric::Volume);
        assert!(Metric::parse("vwap").is_err());
    }

    #[test]
    fn empty_result_renders_no_data_notice() {
        let panel = Panel::from_rows("Latest Per Symbol", Ok(Vec::<BarRow>::new()), bar_table);

        assert_eq!(panel.body, PanelBody::Notice("No data.".to_string()));
        assert!(panel.render().contains("No data."));
    }

    #[test]
    fn query_error_is_caught_per_panel() {
        let panel = Panel::from_rows(
            "Volume Heatmap",
            Err::<Vec<BarRow>, _>(AppError::message("search timed out")),
            bar_table,
        );

        let rendered = panel.render();
        assert!(rendered.contains("Volume Heatmap"));
        assert!(rendered.contains("search timed out"));
    }

    #[test]
    fn table_columns_are_aligned() {
        let panel = Panel::from_rows(
            "Raw Ingested Data",
            Ok(vec![
                bar_row("A", "2026-08-30T10:00:00Z"),
                bar_row("LONGSYM", "2026-08-30T10:05:00Z"),
            ]),
            bar_table,
        );

        let rendered = panel.render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert!(lines[1].starts_with("symbol "));
        // Both data rows pad the symbol column to the widest value.
        let column = lines[2].find("2026").unwrap();
        assert_eq!(lines[3].find("2026").unwrap(), column);
    }

    fn filters_for(symbols: &[&str]) -> DashboardFilters {
        DashboardFilters {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            hours: 1,
            metric: Metric::Close,
        }
    }

    #[test]
    fn default_symbols_take_first_distinct_in_order() {
        let recent = Ok(vec![
            bar_row("AAPL", "t4"),
            bar_row("MSFT", "t3"),
            bar_row("AAPL", "t2"),
            bar_row("NVDA", "t1"),
            bar_row("TSLA", "t0"),
        ]);

        assert_eq!(
            chart_symbols(&filters_for(&[]), &recent),
            vec!["AAPL", "MSFT", "NVDA"]
        );
    }

    #[test]
    fn explicit_symbols_are_limited_to_those_seen() {
        let recent = Ok(vec![bar_row("AAPL", "t1"), bar_row("MSFT", "t0")]);

        assert_eq!(
            chart_symbols(&filters_for(&["MSFT", "TYPO"]), &recent),
            vec!["MSFT"]
        );
    }

    #[test]
    fn unreadable_store_yields_no_chart_symbols() {
        let recent = Err(AppError::message("search timed out"));

        assert!(chart_symbols(&filters_for(&["AAPL"]), &recent).is_empty());
        assert!(chart_symbols(&filters_for(&[]), &recent).is_empty());
    }

    #[test]
    fn metric_table_projects_the_selected_metric() {
        let (headers, rows) = metric_table(&[bar_row("AAPL", "t0")], Metric::Volume);

        assert_eq!(headers[2], "Volume");
        assert_eq!(rows[0][2], "5000.00");
    }
}
