use crate::http::controllers::parse_period;
use crate::http::error::ApiError;
use crate::http::models::{OverviewQuery, OverviewResponse};
use crate::TrafficEngine;
use axum::extract::{Query, State};
use axum::Json;
use std::sync::Arc;

/// Handler for GET /api/overview
#[tracing::instrument(name = "handler_overview", skip(engine, query))]
pub async fn overview_handler(
    State(engine): State<Arc<TrafficEngine>>,
    Query(query): Query<OverviewQuery>,
) -> Result<Json<OverviewResponse>, ApiError> {
    let period = parse_period(query.period.as_deref())?;
    let services = engine.query().get_overview(period).await?;

    Ok(Json(OverviewResponse { period, services }))
}
