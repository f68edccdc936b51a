pub mod worker;

use crate::ingest::RequestEvent;
use crate::service::Service;
use crate::store::{hour_start, HourlyIncrement};
use std::collections::BTreeMap;

pub use worker::{AggregationOutcome, AggregationWorker, Aggregator};

/// Default interval between aggregation passes.
pub const DEFAULT_AGGREGATION_INTERVAL_SECS: u64 = 300;

/// Raw events younger than this stay unfolded so "current rate" queries keep
/// sub-hour resolution.
pub const DEFAULT_FRESHNESS_HORIZON_SECS: u64 = 3_600;

/// Add one raw event to the increment of its (service, hour).
pub fn accumulate(
    increments: &mut BTreeMap<(Service, i64), HourlyIncrement>,
    event: &RequestEvent,
) {
    increments
        .entry((event.service, hour_start(event.timestamp)))
        .or_default()
        .record(event);
}
