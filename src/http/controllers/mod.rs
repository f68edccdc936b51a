pub mod chart_controller;
pub mod health_controller;
pub mod overview_controller;
pub mod stats_controller;

pub use chart_controller::chart_handler;
pub use health_controller::health_handler;
pub use overview_controller::overview_handler;
pub use stats_controller::stats_handler;

use crate::http::error::ApiError;
use crate::period::Period;
use crate::service::Service;

/// A missing service is as invalid as an unknown one.
pub(crate) fn parse_service(raw: Option<&str>) -> Result<Service, ApiError> {
    Ok(raw.unwrap_or_default().parse::<Service>()?)
}

/// A missing period means daily.
pub(crate) fn parse_period(raw: Option<&str>) -> Result<Period, ApiError> {
    match raw {
        None => Ok(Period::default()),
        Some(raw) => Ok(raw.parse::<Period>()?),
    }
}
