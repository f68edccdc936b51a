//! Read side: stats, charts and overviews composed from hourly buckets plus
//! not yet folded raw events.

pub mod chart;
pub mod stats;

use crate::aggregate::DEFAULT_FRESHNESS_HORIZON_SECS;
use crate::period::Period;
use crate::service::Service;
use crate::store::EventStore;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;

pub use chart::{bucket_label, chart_bucket_width, compute_chart, ChartPoint, ChartWindow};
pub use stats::{compute_stats, format_rate, uptime, Stats};

/// Stats plus all-time total for one service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceOverview {
    pub stats: Stats,
    pub total_all_time: i64,
}

#[derive(Debug, Clone)]
pub struct QueryEngine {
    store: Arc<dyn EventStore>,
    freshness_horizon_secs: i64,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self::with_freshness_horizon(store, DEFAULT_FRESHNESS_HORIZON_SECS as i64)
    }

    /// `freshness_horizon_secs` must match the aggregator's, so uptime knows
    /// which hours should already have been folded.
    pub fn with_freshness_horizon(store: Arc<dyn EventStore>, freshness_horizon_secs: i64) -> Self {
        Self {
            store,
            freshness_horizon_secs,
        }
    }

    pub async fn get_stats(&self, service: Service, period_seconds: i64) -> Result<Stats> {
        self.get_stats_at(service, period_seconds, Utc::now().timestamp())
            .await
    }

    #[instrument(
        name = "query_stats",
        skip(self),
        fields(trafficdb.service = %service, trafficdb.period_seconds = period_seconds)
    )]
    pub async fn get_stats_at(
        &self,
        service: Service,
        period_seconds: i64,
        now: i64,
    ) -> Result<Stats> {
        let snapshot = self
            .store
            .window_snapshot(service, now - period_seconds, now)
            .await
            .with_context(|| format!("Failed to read stats window for {}", service))?;
        Ok(compute_stats(
            &snapshot,
            period_seconds,
            now,
            self.freshness_horizon_secs,
        ))
    }

    pub async fn get_chart(
        &self,
        service: Service,
        period_seconds: i64,
        points: usize,
    ) -> Result<Vec<ChartPoint>> {
        self.get_chart_at(service, period_seconds, points, Utc::now().timestamp())
            .await
    }

    #[instrument(
        name = "query_chart",
        skip(self),
        fields(trafficdb.service = %service, trafficdb.period_seconds = period_seconds)
    )]
    pub async fn get_chart_at(
        &self,
        service: Service,
        period_seconds: i64,
        points: usize,
        now: i64,
    ) -> Result<Vec<ChartPoint>> {
        let window = ChartWindow::new(period_seconds, points, now);
        let snapshot = self
            .store
            .window_snapshot(service, window.start, now)
            .await
            .with_context(|| format!("Failed to read chart window for {}", service))?;
        Ok(compute_chart(&snapshot, window, period_seconds))
    }

    /// All-time request count (folded and raw).
    pub async fn total_requests(&self, service: Service) -> Result<i64> {
        self.store
            .total_requests(service)
            .await
            .with_context(|| format!("Failed to count requests for {}", service))
    }

    pub async fn get_overview(&self, period: Period) -> Result<BTreeMap<Service, ServiceOverview>> {
        self.get_overview_at(period, Utc::now().timestamp()).await
    }

    /// Stats and all-time totals for every service.
    pub async fn get_overview_at(
        &self,
        period: Period,
        now: i64,
    ) -> Result<BTreeMap<Service, ServiceOverview>> {
        let mut overview = BTreeMap::new();
        for service in Service::ALL {
            let stats = self.get_stats_at(service, period.seconds(), now).await?;
            let total_all_time = self.total_requests(service).await?;
            overview.insert(
                service,
                ServiceOverview {
                    stats,
                    total_all_time,
                },
            );
        }
        Ok(overview)
    }
}
