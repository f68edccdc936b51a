use crate::store::{hour_start, WindowSnapshot, SECONDS_PER_HOUR};
use chrono::{DateTime, Utc};
use serde::Serialize;

const DAY_SECS: i64 = 86_400;
const WEEK_SECS: i64 = 604_800;
const MONTH_SECS: i64 = 2_592_000;

/// One chart bucket, oldest first in a series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartPoint {
    /// Display label for the bucket start, UTC.
    pub time: String,
    pub total_requests: i64,
    #[serde(skip)]
    pub bucket_start: i64,
}

/// Time axis of a chart: `points` buckets of `width` seconds from `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChartWindow {
    pub start: i64,
    pub width: i64,
    pub points: usize,
}

impl ChartWindow {
    /// Anchor at the next hour boundary after `now` and walk back.
    ///
    /// Windows up to a day always use one-hour buckets. Longer windows use
    /// `period / points` rounded down to whole hours, never below one hour.
    pub fn new(period_seconds: i64, points: usize, now: i64) -> Self {
        let points = points.max(1);
        let width = chart_bucket_width(period_seconds, points);
        let anchor = hour_start(now) + SECONDS_PER_HOUR;
        Self {
            start: anchor - width * points as i64,
            width,
            points,
        }
    }

    pub fn end(&self) -> i64 {
        self.start + self.width * self.points as i64
    }

    /// Index of the bucket containing `timestamp`, if inside the window.
    fn index_of(&self, timestamp: i64) -> Option<usize> {
        if timestamp < self.start || timestamp >= self.end() {
            return None;
        }
        Some(((timestamp - self.start) / self.width) as usize)
    }
}

pub fn chart_bucket_width(period_seconds: i64, points: usize) -> i64 {
    if period_seconds <= DAY_SECS {
        return SECONDS_PER_HOUR;
    }
    let raw = period_seconds / points.max(1) as i64;
    (raw / SECONDS_PER_HOUR * SECONDS_PER_HOUR).max(SECONDS_PER_HOUR)
}

/// Label for a bucket starting at `timestamp`.
///
/// `HH:MM` up to a day, weekday up to a week, `Mon D` up to 30 days and
/// `Mon YY` beyond. Always UTC with English month and weekday names.
pub fn bucket_label(timestamp: i64, period_seconds: i64) -> String {
    let Some(at) = DateTime::<Utc>::from_timestamp(timestamp, 0) else {
        return String::new();
    };
    let pattern = if period_seconds <= DAY_SECS {
        "%H:%M"
    } else if period_seconds <= WEEK_SECS {
        "%a"
    } else if period_seconds <= MONTH_SECS {
        "%b %-d"
    } else {
        "%b %y"
    };
    at.format(pattern).to_string()
}

/// Spread buckets and raw hours of `snapshot` over `window`.
///
/// The snapshot must have been read with `since = window.start`. Bucket
/// widths are whole hours, so every hourly row falls in exactly one point.
pub fn compute_chart(
    snapshot: &WindowSnapshot,
    window: ChartWindow,
    period_seconds: i64,
) -> Vec<ChartPoint> {
    let mut totals = vec![0i64; window.points];

    for bucket in &snapshot.buckets {
        if let Some(i) = window.index_of(bucket.hour_start) {
            totals[i] += bucket.request_count;
        }
    }
    // Raw rows are deleted when folded, so they never double count a bucket.
    for raw in &snapshot.raw_hours {
        if let Some(i) = window.index_of(raw.hour_start) {
            totals[i] += raw.request_count;
        }
    }

    totals
        .into_iter()
        .enumerate()
        .map(|(i, total_requests)| {
            let bucket_start = window.start + window.width * i as i64;
            ChartPoint {
                time: bucket_label(bucket_start, period_seconds),
                total_requests,
                bucket_start,
            }
        })
        .collect()
}
