use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "stock-pipeline")]
#[command(about = "Polls stock quotes into a search store and renders aggregation dashboards")]
#[command(version = "0.1")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the ingestion daemon: fetch every symbol on a fixed cycle and index the results
    Ingest {
        /// One-column `Symbol` CSV produced by fetch-symbols
        #[arg(short, long, default_value = "all_stock_symbols.csv")]
        symbols_file: String,
    },

    /// Render the aggregation dashboard panels against the store
    Dashboard {
        /// Symbols to plot (comma separated); defaults to the most recently ingested ones
        #[arg(short, long, value_delimiter = ',')]
        symbols: Vec<String>,

        /// Relative time window in hours for the time-series panels
        #[arg(long, default_value_t = 1)]
        hours: i64,

        /// Metric for the trend panel: close, open, high, low or volume
        #[arg(short, long, default_value = "close")]
        metric: String,

        /// Re-render on a fixed interval instead of exiting after one pass
        #[arg(short, long)]
        watch: bool,
    },

    /// Download the listed-symbol universe into a flat CSV consumed by ingest
    FetchSymbols {
        /// Where to write the one-column `Symbol` CSV
        #[arg(short, long, default_value = "all_stock_symbols.csv")]
        output: String,
    },
}
