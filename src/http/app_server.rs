use crate::config::{AuthConfig, CorsConfig};
use crate::http::auth_middleware::{auth_middleware, ApiKey};
use crate::http::controllers::{chart_handler, health_handler, overview_handler, stats_handler};
use crate::TrafficEngine;
use anyhow::{Context, Result};
use axum::http::{HeaderValue, Method};
use axum::middleware;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

pub struct AppServer {
    pub router: Router,
    pub engine: Arc<TrafficEngine>,
}

pub const PATH_HEALTH: &str = "/health";
pub const PATH_STATS: &str = "/api/stats";
pub const PATH_CHART: &str = "/api/chart";
pub const PATH_OVERVIEW: &str = "/api/overview";

impl AppServer {
    pub fn new(engine: TrafficEngine, auth: &AuthConfig, cors: &CorsConfig) -> Result<Self> {
        let engine = Arc::new(engine);

        let mut router = Router::new()
            .route(PATH_HEALTH, get(health_handler))
            .route(PATH_STATS, get(stats_handler))
            .route(PATH_CHART, get(chart_handler))
            .route(PATH_OVERVIEW, get(overview_handler))
            .with_state(engine.clone());

        if let Some(key) = &auth.api_key {
            router = router.layer(middleware::from_fn_with_state(
                ApiKey(Arc::from(key.as_str())),
                auth_middleware,
            ));
            tracing::info!("API key authentication enabled");
        }

        // Outermost, so preflight requests are answered before auth runs.
        let router = router.layer(cors_layer(&cors.allowed_origins)?);

        Ok(AppServer { router, engine })
    }
}

fn cors_layer(allowed_origins: &[String]) -> Result<CorsLayer> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET])
        .allow_headers(Any);

    if allowed_origins.iter().any(|o| o == "*") {
        return Ok(layer.allow_origin(Any));
    }

    let origins = allowed_origins
        .iter()
        .map(|o| {
            HeaderValue::from_str(o).with_context(|| format!("Invalid CORS origin '{}'", o))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(layer.allow_origin(AllowOrigin::list(origins)))
}
