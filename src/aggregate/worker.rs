use crate::store::{EventStore, FoldSummary};
use crate::tick::TickGuard;
use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationOutcome {
    Completed(FoldSummary),
    /// Another pass was still running.
    Skipped,
}

/// Folds raw events older than the freshness horizon into hourly buckets.
#[derive(Debug)]
pub struct Aggregator {
    store: Arc<dyn EventStore>,
    freshness_horizon: Duration,
    guard: TickGuard,
}

impl Aggregator {
    pub fn new(store: Arc<dyn EventStore>, freshness_horizon: Duration) -> Self {
        Self {
            store,
            freshness_horizon,
            guard: TickGuard::new(),
        }
    }

    pub async fn run_once(&self) -> Result<AggregationOutcome> {
        self.run_once_at(Utc::now().timestamp()).await
    }

    /// One aggregation pass as of `now` (unix seconds).
    ///
    /// Repeating a pass with no new qualifying raw rows is a no-op.
    pub async fn run_once_at(&self, now: i64) -> Result<AggregationOutcome> {
        let Some(_permit) = self.guard.try_enter() else {
            debug!("Aggregation pass already running, skipping tick");
            return Ok(AggregationOutcome::Skipped);
        };

        let horizon = now - self.freshness_horizon.as_secs() as i64;
        let summary = self
            .store
            .fold_before(horizon)
            .await
            .context("Failed to fold raw events into hourly buckets")?;

        if summary.events_folded > 0 {
            info!(
                events = summary.events_folded,
                buckets = summary.buckets_touched,
                horizon,
                "Aggregated raw events into hourly buckets"
            );
        }

        Ok(AggregationOutcome::Completed(summary))
    }
}

/// Background task driving [`Aggregator`] on a fixed interval until shutdown.
pub struct AggregationWorker {
    aggregator: Arc<Aggregator>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl AggregationWorker {
    pub fn new(
        aggregator: Arc<Aggregator>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            aggregator,
            interval,
            shutdown,
        }
    }

    pub async fn run(self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Aggregation worker received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    // Failed passes leave the raw rows in place for the next tick.
                    if let Err(e) = self.aggregator.run_once().await {
                        error!(error = %format!("{:#}", e), "Hourly aggregation failed");
                    }
                }
            }
        }
    }
}
