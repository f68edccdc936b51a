use crate::period::Period;
use crate::query::{ChartPoint, ServiceOverview, Stats};
use crate::service::Service;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Query string for GET /api/stats and GET /api/chart
#[derive(Debug, Default, Deserialize)]
pub struct ServiceQuery {
    pub service: Option<String>,
    pub period: Option<String>,
}

/// Query string for GET /api/overview
#[derive(Debug, Default, Deserialize)]
pub struct OverviewQuery {
    pub period: Option<String>,
}

/// Response body for GET /api/stats
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub service: Service,
    pub period: Period,
    #[serde(flatten)]
    pub stats: Stats,
}

/// Response body for GET /api/chart
#[derive(Debug, Serialize)]
pub struct ChartResponse {
    pub service: Service,
    pub period: Period,
    pub data: Vec<ChartPoint>,
}

/// Response body for GET /api/overview
#[derive(Debug, Serialize)]
pub struct OverviewResponse {
    pub period: Period,
    pub services: BTreeMap<Service, ServiceOverview>,
}

/// Response body for GET /health
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Unix milliseconds.
    pub timestamp: i64,
}
