//! In-memory event store for tests.
//!
//! Mirrors the SQLite store's semantics closely enough for worker and query
//! tests, and can be told to fail inserts to exercise the flush retry path.

use super::{EventStore, FoldSummary, HourlyBucket, HourlyIncrement, RawHour, WindowSnapshot};
use crate::aggregate::accumulate;
use crate::ingest::RequestEvent;
use crate::service::Service;
use crate::store::manager::hour_start;
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct State {
    events: Vec<RequestEvent>,
    buckets: BTreeMap<(Service, i64), HourlyBucket>,
}

#[derive(Debug, Default)]
pub struct MockEventStore {
    state: Mutex<State>,
    fail_insert: AtomicBool,
    insert_calls: AtomicUsize,
}

impl MockEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure whether `insert_events` should fail.
    pub fn set_fail_insert(&self, fail: bool) {
        self.fail_insert.store(fail, Ordering::SeqCst);
    }

    /// Number of `insert_events` calls, successful or not.
    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    /// Copy of the stored raw events, in insertion order.
    pub fn events(&self) -> Vec<RequestEvent> {
        self.lock().events.clone()
    }

    /// Seed a bucket directly.
    pub fn put_bucket(&self, bucket: HourlyBucket) {
        self.lock()
            .buckets
            .insert((bucket.service, bucket.hour_start), bucket);
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl EventStore for MockEventStore {
    async fn run_migrations(&self) -> Result<()> {
        Ok(())
    }

    async fn insert_events(&self, events: &[RequestEvent]) -> Result<u64> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_insert.load(Ordering::SeqCst) {
            bail!("mock insert failure");
        }
        self.lock().events.extend_from_slice(events);
        Ok(events.len() as u64)
    }

    async fn fold_before(&self, horizon: i64) -> Result<FoldSummary> {
        let mut state = self.lock();
        let (folded, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.events)
            .into_iter()
            .partition(|e| e.timestamp < horizon);
        state.events = kept;

        let mut increments: BTreeMap<(Service, i64), HourlyIncrement> = BTreeMap::new();
        for event in &folded {
            accumulate(&mut increments, event);
        }
        for ((service, hour), increment) in &increments {
            state
                .buckets
                .entry((*service, *hour))
                .or_insert_with(|| HourlyBucket::empty(*service, *hour))
                .merge(increment);
        }

        Ok(FoldSummary {
            events_folded: folded.len() as u64,
            buckets_touched: increments.len() as u64,
        })
    }

    async fn window_snapshot(
        &self,
        service: Service,
        since: i64,
        now: i64,
    ) -> Result<WindowSnapshot> {
        let state = self.lock();

        let buckets = state
            .buckets
            .values()
            .filter(|b| b.service == service && b.hour_start >= since)
            .cloned()
            .collect();

        let mut hours: BTreeMap<i64, RawHour> = BTreeMap::new();
        let mut last_minute_requests = 0;
        for event in state.events.iter().filter(|e| e.service == service) {
            if event.timestamp >= now - 60 {
                last_minute_requests += 1;
            }
            if event.timestamp < since {
                continue;
            }
            let hour = hour_start(event.timestamp);
            let raw = hours.entry(hour).or_insert(RawHour {
                hour_start: hour,
                request_count: 0,
                error_count: 0,
            });
            raw.request_count += 1;
            if event.is_error() {
                raw.error_count += 1;
            }
        }

        Ok(WindowSnapshot {
            buckets,
            raw_hours: hours.into_values().collect(),
            last_minute_requests,
        })
    }

    async fn total_requests(&self, service: Service) -> Result<i64> {
        let state = self.lock();
        let aggregated: i64 = state
            .buckets
            .values()
            .filter(|b| b.service == service)
            .map(|b| b.request_count)
            .sum();
        let raw = state.events.iter().filter(|e| e.service == service).count() as i64;
        Ok(aggregated + raw)
    }

    async fn get_bucket(&self, service: Service, hour_start: i64) -> Result<Option<HourlyBucket>> {
        Ok(self.lock().buckets.get(&(service, hour_start)).cloned())
    }

    async fn raw_event_count(&self) -> Result<i64> {
        Ok(self.lock().events.len() as i64)
    }
}
