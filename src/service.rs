//! The closed set of monitored endpoint categories.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the monitored endpoint categories.
///
/// The string form (`rpc`, `wss`, `validator_api`) is what gets stored in the
/// event tables and what the HTTP API accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    Rpc,
    Wss,
    ValidatorApi,
}

impl Service {
    pub const ALL: [Service; 3] = [Service::Rpc, Service::Wss, Service::ValidatorApi];

    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Rpc => "rpc",
            Service::Wss => "wss",
            Service::ValidatorApi => "validator_api",
        }
    }

    /// Comma separated list of valid names, used in error messages.
    pub fn valid_names() -> String {
        Self::ALL
            .iter()
            .map(Service::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid service '{given}'. Must be one of: {}", Service::valid_names())]
pub struct ServiceParseError {
    pub given: String,
}

impl FromStr for Service {
    type Err = ServiceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rpc" => Ok(Service::Rpc),
            "wss" => Ok(Service::Wss),
            "validator_api" => Ok(Service::ValidatorApi),
            other => Err(ServiceParseError {
                given: other.to_string(),
            }),
        }
    }
}
