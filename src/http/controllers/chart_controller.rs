use crate::http::controllers::{parse_period, parse_service};
use crate::http::error::ApiError;
use crate::http::models::{ChartResponse, ServiceQuery};
use crate::TrafficEngine;
use axum::extract::{Query, State};
use axum::Json;
use std::sync::Arc;

/// Handler for GET /api/chart
#[tracing::instrument(
    name = "handler_chart",
    skip(engine, query),
    fields(trafficdb.service = tracing::field::Empty, trafficdb.period = tracing::field::Empty)
)]
pub async fn chart_handler(
    State(engine): State<Arc<TrafficEngine>>,
    Query(query): Query<ServiceQuery>,
) -> Result<Json<ChartResponse>, ApiError> {
    let service = parse_service(query.service.as_deref())?;
    let period = parse_period(query.period.as_deref())?;

    let span = tracing::Span::current();
    span.record("trafficdb.service", service.as_str());
    span.record("trafficdb.period", period.as_str());

    let data = engine
        .query()
        .get_chart(service, period.seconds(), period.chart_points())
        .await?;

    Ok(Json(ChartResponse {
        service,
        period,
        data,
    }))
}
