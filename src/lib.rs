pub mod aggregate;
pub mod config;
mod engine;
pub mod http;
pub mod ingest;
pub mod period;
pub mod query;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod tick;

pub use engine::{TrafficEngine, TrafficEngineBuilder};
pub use period::Period;
pub use service::Service;
