use crate::http::controllers::{parse_period, parse_service};
use crate::http::error::ApiError;
use crate::http::models::{ServiceQuery, StatsResponse};
use crate::TrafficEngine;
use axum::extract::{Query, State};
use axum::Json;
use std::sync::Arc;

/// Handler for GET /api/stats
#[tracing::instrument(
    name = "handler_stats",
    skip(engine, query),
    fields(trafficdb.service = tracing::field::Empty, trafficdb.period = tracing::field::Empty)
)]
pub async fn stats_handler(
    State(engine): State<Arc<TrafficEngine>>,
    Query(query): Query<ServiceQuery>,
) -> Result<Json<StatsResponse>, ApiError> {
    let service = parse_service(query.service.as_deref())?;
    let period = parse_period(query.period.as_deref())?;

    let span = tracing::Span::current();
    span.record("trafficdb.service", service.as_str());
    span.record("trafficdb.period", period.as_str());

    let stats = engine.query().get_stats(service, period.seconds()).await?;

    Ok(Json(StatsResponse {
        service,
        period,
        stats,
    }))
}
