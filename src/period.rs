//! Named query windows exposed by the HTTP API.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    #[default]
    Daily,
    Weekly,
    Monthly,
    Total,
}

impl Period {
    pub const ALL: [Period; 4] = [Period::Daily, Period::Weekly, Period::Monthly, Period::Total];

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Daily => "daily",
            Period::Weekly => "weekly",
            Period::Monthly => "monthly",
            Period::Total => "total",
        }
    }

    /// Window length in seconds.
    pub fn seconds(&self) -> i64 {
        match self {
            Period::Daily => 86_400,
            Period::Weekly => 604_800,
            Period::Monthly => 2_592_000,
            Period::Total => 31_536_000,
        }
    }

    /// Number of chart points rendered for this window.
    pub fn chart_points(&self) -> usize {
        match self {
            Period::Daily => 24,
            Period::Weekly => 7,
            Period::Monthly => 30,
            Period::Total => 12,
        }
    }

    pub fn valid_names() -> String {
        Self::ALL
            .iter()
            .map(Period::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid period '{given}'. Must be one of: {}", Period::valid_names())]
pub struct PeriodParseError {
    pub given: String,
}

impl FromStr for Period {
    type Err = PeriodParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Period::Daily),
            "weekly" => Ok(Period::Weekly),
            "monthly" => Ok(Period::Monthly),
            "total" => Ok(Period::Total),
            other => Err(PeriodParseError {
                given: other.to_string(),
            }),
        }
    }
}
