use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::info;
use tokio::time::sleep;

use crate::ingest::CycleStats;

pub const CYCLE_PERIOD: Duration = Duration::from_secs(5 * 60);
pub const POLL_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchedulerState {
    Idle,
    Running,
}

#[async_trait]
pub trait CycleRunner: Send + Sync {
    async fn run_cycle(&self) -> CycleStats;
}

/// Fixed-period cycle loop. Runs one full cycle immediately at startup,
/// then checks every poll tick whether the period has elapsed since the
/// last cycle *started*. Cycles run synchronously to completion, so two
/// cycles can never overlap. There is no terminal state; the daemon stops
/// only with the process.
pub struct CycleScheduler {
    period: Duration,
    tick: Duration,
    state: SchedulerState,
    last_cycle_start: Option<Instant>,
}

impl CycleScheduler {
    pub fn new() -> Self {
        Self::with_timing(CYCLE_PERIOD, POLL_TICK)
    }

    pub fn with_timing(period: Duration, tick: Duration) -> Self {
        Self {
            period,
            tick,
            state: SchedulerState::Idle,
            last_cycle_start: None,
        }
    }

    /// Drive the runner. `max_cycles` bounds the loop for tests; the daemon
    /// passes `None` and runs until externally terminated.
    pub async fn run<R: CycleRunner>(&mut self, runner: &R, max_cycles: Option<usize>) {
        let mut completed = 0usize;

        loop {
            self.state = SchedulerState::Running;
            self.last_cycle_start = Some(Instant::now());

            let stats = runner.run_cycle().await;
            info!(
                "Ingestion cycle complete: {}/{} symbols indexed",
                stats.succeeded, stats.attempted
            );

            self.state = SchedulerState::Idle;
            completed += 1;

            if let Some(max) = max_cycles {
                if completed >= max {
                    return;
                }
            }

            while self.period_pending() {
                sleep(self.tick).await;
            }
        }
    }

    #[cfg(test)]
    fn is_idle(&self) -> bool {
        self.state == SchedulerState::Idle
    }

    fn period_pending(&self) -> bool {
        match self.last_cycle_start {
            Some(started) => started.elapsed() < self.period,
            None => false,
        }
    }
}

impl Default for CycleScheduler {
    fn default() -> Self {
        Self::new()
    }
}
