mod manager;
mod migrations;
mod mock_store;
mod sqlite_store;

pub use manager::{
    hour_start, EventStore, FoldSummary, HourlyBucket, HourlyIncrement, RawHour, WindowSnapshot,
    SECONDS_PER_HOUR,
};
pub use mock_store::MockEventStore;
pub use sqlite_store::SqliteEventStore;
