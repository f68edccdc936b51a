use crate::ingest::RequestEvent;
use crate::service::Service;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt::Debug;

pub const SECONDS_PER_HOUR: i64 = 3_600;

/// Truncate a unix timestamp to the start of its hour.
pub fn hour_start(timestamp: i64) -> i64 {
    timestamp.div_euclid(SECONDS_PER_HOUR) * SECONDS_PER_HOUR
}

/// Durable per-service, per-hour aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyBucket {
    pub service: Service,
    pub hour_start: i64,
    pub request_count: i64,
    pub error_count: i64,
    pub avg_response_time_seconds: f64,
}

impl HourlyBucket {
    /// An empty bucket, used as the merge base when no row exists yet.
    pub fn empty(service: Service, hour_start: i64) -> Self {
        Self {
            service,
            hour_start,
            request_count: 0,
            error_count: 0,
            avg_response_time_seconds: 0.0,
        }
    }

    /// Merge a not-yet-folded increment into this bucket.
    ///
    /// The new mean is `(m1·n1 + Σrt) / (n1 + n2)` where `Σrt` is the raw
    /// response-time sum of the increment, so repeated merges never re-derive
    /// a mean from an already merged one.
    pub fn merge(&mut self, increment: &HourlyIncrement) {
        if increment.request_count == 0 {
            return;
        }
        let total = self.request_count + increment.request_count;
        let weighted = self.avg_response_time_seconds * self.request_count as f64
            + increment.total_response_time_seconds;
        self.avg_response_time_seconds = weighted / total as f64;
        self.request_count = total;
        self.error_count += increment.error_count;
    }
}

/// Contribution of raw events to one (service, hour) bucket.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HourlyIncrement {
    pub request_count: i64,
    pub error_count: i64,
    pub total_response_time_seconds: f64,
}

impl HourlyIncrement {
    pub fn record(&mut self, event: &RequestEvent) {
        self.request_count += 1;
        if event.is_error() {
            self.error_count += 1;
        }
        self.total_response_time_seconds += event.response_time_seconds;
    }

    pub fn mean_response_time_seconds(&self) -> f64 {
        if self.request_count == 0 {
            0.0
        } else {
            self.total_response_time_seconds / self.request_count as f64
        }
    }
}

/// Raw, not yet folded events of one hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawHour {
    pub hour_start: i64,
    pub request_count: i64,
    pub error_count: i64,
}

/// Everything the query engine needs for one service and window, read in a
/// single transaction so it never observes a half-applied fold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowSnapshot {
    /// Buckets with `hour_start >= since`, ascending.
    pub buckets: Vec<HourlyBucket>,
    /// Raw events with `timestamp >= since`, grouped by hour, ascending.
    pub raw_hours: Vec<RawHour>,
    /// Raw events with `timestamp >= now - 60`.
    pub last_minute_requests: i64,
}

/// Result of one fold pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FoldSummary {
    pub events_folded: u64,
    pub buckets_touched: u64,
}

/// Durable storage for raw request events and hourly aggregates.
#[async_trait]
pub trait EventStore: Debug + Send + Sync {
    /// Release the storage handle. Idempotent.
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Apply any pending schema migrations. Should be idempotent.
    async fn run_migrations(&self) -> Result<()>;

    /// Insert a batch of raw events in one transaction. Either every event
    /// is stored or none is.
    async fn insert_events(&self, events: &[RequestEvent]) -> Result<u64>;

    /// Fold every raw event with `timestamp < horizon` into its hourly bucket
    /// and delete it, atomically.
    async fn fold_before(&self, horizon: i64) -> Result<FoldSummary>;

    /// Consistent read of buckets and raw events at or after `since`.
    async fn window_snapshot(&self, service: Service, since: i64, now: i64)
        -> Result<WindowSnapshot>;

    /// All-time request count (buckets plus unfolded raw events).
    async fn total_requests(&self, service: Service) -> Result<i64>;

    async fn get_bucket(&self, service: Service, hour_start: i64) -> Result<Option<HourlyBucket>>;

    /// Number of raw events not yet folded, across all services.
    async fn raw_event_count(&self) -> Result<i64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hour_start_truncates_including_negative_timestamps() {
        assert_eq!(hour_start(7_199), 3_600);
        assert_eq!(hour_start(7_200), 7_200);
        assert_eq!(hour_start(-1), -3_600);
    }

    #[test]
    fn merge_uses_weighted_mean() {
        let mut bucket = HourlyBucket {
            service: Service::Rpc,
            hour_start: 0,
            request_count: 10,
            error_count: 2,
            avg_response_time_seconds: 100.0,
        };
        let increment = HourlyIncrement {
            request_count: 5,
            error_count: 1,
            total_response_time_seconds: 5.0 * 40.0,
        };

        bucket.merge(&increment);

        assert_eq!(bucket.request_count, 15);
        assert_eq!(bucket.error_count, 3);
        assert_eq!(bucket.avg_response_time_seconds, 80.0);
    }

    #[test]
    fn merge_into_empty_bucket_takes_increment_mean() {
        let mut bucket = HourlyBucket::empty(Service::Wss, 3_600);
        let increment = HourlyIncrement {
            request_count: 4,
            error_count: 0,
            total_response_time_seconds: 2.0,
        };

        bucket.merge(&increment);

        assert_eq!(bucket.request_count, 4);
        assert_eq!(bucket.avg_response_time_seconds, 0.5);
        assert_eq!(
            bucket.avg_response_time_seconds,
            increment.mean_response_time_seconds()
        );
    }

    #[test]
    fn merging_empty_increment_is_a_no_op() {
        let mut bucket = HourlyBucket::empty(Service::Rpc, 0);
        bucket.merge(&HourlyIncrement::default());
        assert_eq!(bucket, HourlyBucket::empty(Service::Rpc, 0));
    }
}
