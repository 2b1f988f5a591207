use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::time::sleep;

use crate::fetch::{FetchOutcome, QuoteSource};
use crate::store::{BarDocument, BarSink};

pub const BATCH_SIZE: usize = 100;
pub const RATE_LIMIT_PAUSE: Duration = Duration::from_millis(100);

/// Per-cycle counters, logged once when the cycle completes and then
/// discarded. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleStats {
    pub attempted: usize,
    pub succeeded: usize,
}

/// Walks the symbol list in contiguous fixed-size batches, fetching each
/// symbol sequentially and appending one document per successful fetch.
/// Partial failure is the expected steady state: a symbol that errors or
/// comes back empty is logged and skipped, never aborting the cycle.
pub struct BatchIngestor {
    source: Arc<dyn QuoteSource>,
    sink: Arc<dyn BarSink>,
    batch_size: usize,
    pause: Duration,
}

impl BatchIngestor {
    pub fn new(source: Arc<dyn QuoteSource>, sink: Arc<dyn BarSink>) -> Self {
        Self::with_settings(source, sink, BATCH_SIZE, RATE_LIMIT_PAUSE)
    }

    pub fn with_settings(
        source: Arc<dyn QuoteSource>,
        sink: Arc<dyn BarSink>,
        batch_size: usize,
        pause: Duration,
    ) -> Self {
        Self {
            source,
            sink,
            batch_size: batch_size.max(1),
            pause,
        }
    }

    /// One full pass over the symbol list. Returns cumulative counts across
    /// all batches.
    pub async fn ingest_all(&self, symbols: &[String]) -> CycleStats {
        let mut stats = CycleStats::default();

        for batch in symbols.chunks(self.batch_size) {
            debug!("Ingesting batch of {} symbols", batch.len());
            for symbol in batch {
                stats.attempted += 1;
                if self.ingest_one(symbol).await {
                    stats.succeeded += 1;
                }
                // Fixed pause after every attempt, success or not, to keep
                // the upstream provider from seeing bursts.
                sleep(self.pause).await;
            }
        }

        stats
    }

    async fn ingest_one(&self, symbol: &str) -> bool {
        match self.source.fetch(symbol).await {
            Ok(FetchOutcome::Bar(bar)) => {
                let doc = BarDocument::from_bar(&bar);
                match self.sink.write(&doc).await {
                    Ok(()) => {
                        info!("Indexed {}", symbol);
                        true
                    }
                    Err(e) => {
                        error!("Failed to index {}: {}", symbol, e);
                        false
                    }
                }
            }
            Ok(FetchOutcome::Empty) => {
                warn!("No data for {}", symbol);
                false
            }
            Err(e) => {
                error!("Error fetching {}: {}", symbol, e);
                false
            }
        }
    }
}

/// Binds an ingestor to its symbol universe so the scheduler can re-run the
/// same full pass each cycle.
pub struct IngestJob {
    pub ingestor: BatchIngestor,
    pub symbols: Vec<String>,
}

#[async_trait]
impl crate::scheduler::CycleRunner for IngestJob {
    async fn run_cycle(&self) -> CycleStats {
        self.ingestor.ingest_all(&self.symbols).await
    }
}
