use crate::store::{hour_start, WindowSnapshot, SECONDS_PER_HOUR};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Summary statistics for one service over a trailing window.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_requests: i64,
    pub total_errors: i64,
    pub avg_req_per_sec: f64,
    pub current_req_per_sec: f64,
    pub peak_req_per_sec: f64,
    pub uptime: String,
}

/// Round a per-second rate for display.
///
/// Values below 0.01 keep 4 decimals so sparse traffic does not show as
/// zero. Zero stays zero.
pub fn format_rate(value: f64) -> f64 {
    if value == 0.0 || !value.is_finite() {
        return 0.0;
    }
    if value < 0.01 {
        round_to(value, 4)
    } else {
        round_to(value, 2)
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Build [`Stats`] from a snapshot read with `since = now - period_seconds`.
pub fn compute_stats(
    snapshot: &WindowSnapshot,
    period_seconds: i64,
    now: i64,
    freshness_horizon_secs: i64,
) -> Stats {
    let aggregated_requests: i64 = snapshot.buckets.iter().map(|b| b.request_count).sum();
    let aggregated_errors: i64 = snapshot.buckets.iter().map(|b| b.error_count).sum();
    let raw_requests: i64 = snapshot.raw_hours.iter().map(|h| h.request_count).sum();
    let raw_errors: i64 = snapshot.raw_hours.iter().map(|h| h.error_count).sum();

    let total_requests = aggregated_requests + raw_requests;
    let total_errors = aggregated_errors + raw_errors;

    let avg_req_per_sec = if period_seconds > 0 {
        format_rate(total_requests as f64 / period_seconds as f64)
    } else {
        0.0
    };

    let peak_req_per_sec = snapshot
        .buckets
        .iter()
        .map(|b| b.request_count)
        .max()
        .map(|peak| format_rate(peak as f64 / SECONDS_PER_HOUR as f64))
        .unwrap_or(0.0);

    Stats {
        total_requests,
        total_errors,
        avg_req_per_sec,
        current_req_per_sec: format_rate(snapshot.last_minute_requests as f64 / 60.0),
        peak_req_per_sec,
        uptime: uptime(snapshot, now - period_seconds, now, freshness_horizon_secs),
    }
}

/// Percentage of judged hours in `[since, now]` that saw traffic, as `"NN.NN%"`.
///
/// Only whole hours that have fully elapsed are judged. An hour with a bucket
/// is up when its count is positive; an hour with unfolded raw events is up.
/// An hour with no data at all is down only once it lies behind the
/// freshness horizon, since before that the aggregator may simply not have
/// reached it. No judged hours reports `100.00%`.
pub fn uptime(snapshot: &WindowSnapshot, since: i64, now: i64, freshness_horizon_secs: i64) -> String {
    let buckets: BTreeMap<i64, i64> = snapshot
        .buckets
        .iter()
        .map(|b| (b.hour_start, b.request_count))
        .collect();
    let raw: BTreeSet<i64> = snapshot
        .raw_hours
        .iter()
        .filter(|h| h.request_count > 0)
        .map(|h| h.hour_start)
        .collect();
    let aggregated_until = now - freshness_horizon_secs;

    let mut judged = 0u64;
    let mut up = 0u64;
    let mut hour = first_whole_hour(since);
    while hour + SECONDS_PER_HOUR <= now {
        match buckets.get(&hour) {
            Some(count) => {
                judged += 1;
                if *count > 0 || raw.contains(&hour) {
                    up += 1;
                }
            }
            None if raw.contains(&hour) => {
                judged += 1;
                up += 1;
            }
            None if hour + SECONDS_PER_HOUR <= aggregated_until => judged += 1,
            None => {}
        }
        hour += SECONDS_PER_HOUR;
    }

    if judged == 0 {
        return "100.00%".to_string();
    }
    format!("{:.2}%", up as f64 / judged as f64 * 100.0)
}

fn first_whole_hour(since: i64) -> i64 {
    let floor = hour_start(since);
    if floor == since {
        floor
    } else {
        floor + SECONDS_PER_HOUR
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::Service;
    use crate::store::{HourlyBucket, RawHour};

    const DAY: i64 = 86_400;

    fn bucket(hour_start: i64, request_count: i64, error_count: i64) -> HourlyBucket {
        HourlyBucket {
            service: Service::Rpc,
            hour_start,
            request_count,
            error_count,
            avg_response_time_seconds: 0.1,
        }
    }

    #[test]
    fn format_rate_keeps_small_values_visible() {
        assert_eq!(format_rate(0.0), 0.0);
        assert_eq!(format_rate(1.0 / 86_400.0), 0.0);
        assert_eq!(format_rate(3.0 / 86_400.0), 0.0);
        assert_eq!(format_rate(10.0 / 86_400.0), 0.0001);
        assert_eq!(format_rate(1.0 / 3_600.0), 0.0003);
        assert_eq!(format_rate(1.0 / 60.0), 0.02);
        assert_eq!(format_rate(12.345_6), 12.35);
    }

    #[test]
    fn stats_sum_buckets_and_raw_events() {
        let now = 1_000 * 3_600 + 1_800;
        let snapshot = WindowSnapshot {
            buckets: vec![bucket(now - 5 * 3_600 - 1_800, 7_200, 3)],
            raw_hours: vec![RawHour {
                hour_start: hour_start(now),
                request_count: 120,
                error_count: 2,
            }],
            last_minute_requests: 30,
        };

        let stats = compute_stats(&snapshot, DAY, now, 3_600);

        assert_eq!(stats.total_requests, 7_320);
        assert_eq!(stats.total_errors, 5);
        assert_eq!(stats.avg_req_per_sec, 0.08);
        assert_eq!(stats.current_req_per_sec, 0.5);
        assert_eq!(stats.peak_req_per_sec, 2.0);
    }

    #[test]
    fn empty_snapshot_has_zero_rates() {
        let stats = compute_stats(&WindowSnapshot::default(), DAY, DAY * 10, 3_600);

        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.avg_req_per_sec, 0.0);
        assert_eq!(stats.current_req_per_sec, 0.0);
        assert_eq!(stats.peak_req_per_sec, 0.0);
    }

    #[test]
    fn zero_period_has_zero_average() {
        let snapshot = WindowSnapshot {
            last_minute_requests: 6,
            ..Default::default()
        };
        let stats = compute_stats(&snapshot, 0, 10_000, 3_600);
        assert_eq!(stats.avg_req_per_sec, 0.0);
        assert_eq!(stats.current_req_per_sec, 0.1);
    }

    #[test]
    fn every_hour_with_traffic_is_full_uptime() {
        let now = 500 * 3_600 + 42;
        let since = now - DAY;
        let mut hour = first_whole_hour(since);
        let mut buckets = Vec::new();
        while hour + 3_600 <= now {
            buckets.push(bucket(hour, 10, 0));
            hour += 3_600;
        }
        let snapshot = WindowSnapshot {
            buckets,
            ..Default::default()
        };

        assert_eq!(uptime(&snapshot, since, now, 3_600), "100.00%");
    }

    #[test]
    fn no_data_for_whole_window_is_zero_uptime() {
        let now = 500 * 3_600 + 42;
        assert_eq!(uptime(&WindowSnapshot::default(), now - DAY, now, 3_600), "0.00%");
    }

    #[test]
    fn zero_count_bucket_counts_as_down() {
        let now = 10 * 3_600;
        let snapshot = WindowSnapshot {
            buckets: vec![bucket(8 * 3_600, 0, 0), bucket(7 * 3_600, 4, 0)],
            raw_hours: vec![RawHour {
                hour_start: 9 * 3_600,
                request_count: 3,
                error_count: 0,
            }],
            ..Default::default()
        };

        // hours 7, 8, 9 judged; 9 is up from raw rows only
        assert_eq!(uptime(&snapshot, 7 * 3_600, now, 3_600), "66.67%");
    }

    #[test]
    fn hour_not_yet_aggregated_is_not_held_against_uptime() {
        let now = 10 * 3_600 + 600;
        let snapshot = WindowSnapshot {
            buckets: vec![bucket(8 * 3_600, 5, 0)],
            ..Default::default()
        };

        // hour 9 has no data but is still inside the freshness horizon
        assert_eq!(uptime(&snapshot, 8 * 3_600, now, 3_600), "100.00%");
    }

    #[test]
    fn window_shorter_than_an_hour_reports_full_uptime() {
        let now = 10 * 3_600 + 600;
        assert_eq!(uptime(&WindowSnapshot::default(), now - 60, now, 3_600), "100.00%");
    }
}
