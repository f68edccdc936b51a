//! SQLite-backed [`EventStore`].
//!
//! Every write runs inside a transaction and the first statement of each
//! write transaction is itself a write, so SQLite takes the write lock up
//! front and a concurrent flush and fold simply queue on the busy timeout
//! instead of failing a read-to-write upgrade. Reads for a query run in one
//! deferred transaction, which in WAL mode pins a single snapshot.

use crate::aggregate::accumulate;
use crate::ingest::RequestEvent;
use crate::service::Service;
use crate::store::manager::{
    EventStore, FoldSummary, HourlyBucket, HourlyIncrement, RawHour, WindowSnapshot,
};
use crate::store::migrations::run_migrations;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use std::fmt::{self, Debug, Formatter};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_CONNECTIONS: u32 = 4;

pub struct SqliteEventStore {
    pool: SqlitePool,
    db_path: String,
}

impl Debug for SqliteEventStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteEventStore")
            .field("db_path", &self.db_path)
            .finish()
    }
}

impl SqliteEventStore {
    pub async fn new(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open event store at {}", db_path))?;

        Ok(Self {
            pool,
            db_path: db_path.to_string(),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn parse_service(row: &SqliteRow) -> Result<Service> {
    let raw: String = row.try_get("service")?;
    raw.parse::<Service>()
        .map_err(|e| anyhow!("Corrupt service value in event store: {}", e))
}

fn event_from_row(row: &SqliteRow) -> Result<RequestEvent> {
    let status: Option<i64> = row.try_get("status")?;
    Ok(RequestEvent {
        service: parse_service(row)?,
        timestamp: row.try_get("timestamp")?,
        status: status.and_then(|s| u16::try_from(s).ok()),
        response_time_seconds: row.try_get("response_time")?,
    })
}

fn bucket_from_row(row: &SqliteRow) -> Result<HourlyBucket> {
    Ok(HourlyBucket {
        service: parse_service(row)?,
        hour_start: row.try_get("hour_start")?,
        request_count: row.try_get("request_count")?,
        error_count: row.try_get("error_count")?,
        avg_response_time_seconds: row.try_get("avg_response_time")?,
    })
}

async fn fetch_bucket(
    conn: &mut SqliteConnection,
    service: Service,
    hour_start: i64,
) -> Result<Option<HourlyBucket>> {
    let row = sqlx::query(
        "SELECT service, hour_start, request_count, error_count, avg_response_time \
         FROM hourly_buckets WHERE service = ? AND hour_start = ?",
    )
    .bind(service.as_str())
    .bind(hour_start)
    .fetch_optional(conn)
    .await?;

    row.as_ref().map(bucket_from_row).transpose()
}

async fn merge_increment(
    conn: &mut SqliteConnection,
    service: Service,
    hour_start: i64,
    increment: &HourlyIncrement,
) -> Result<()> {
    let mut bucket = fetch_bucket(&mut *conn, service, hour_start)
        .await?
        .unwrap_or_else(|| HourlyBucket::empty(service, hour_start));
    bucket.merge(increment);

    sqlx::query(
        "INSERT INTO hourly_buckets (service, hour_start, request_count, error_count, avg_response_time) \
         VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT (service, hour_start) DO UPDATE SET \
             request_count = excluded.request_count, \
             error_count = excluded.error_count, \
             avg_response_time = excluded.avg_response_time",
    )
    .bind(service.as_str())
    .bind(hour_start)
    .bind(bucket.request_count)
    .bind(bucket.error_count)
    .bind(bucket.avg_response_time_seconds)
    .execute(conn)
    .await?;

    Ok(())
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }

    async fn run_migrations(&self) -> Result<()> {
        run_migrations(&self.pool).await
    }

    #[tracing::instrument(
        name = "store_insert_events",
        skip(self, events),
        fields(trafficdb.batch_size = events.len())
    )]
    async fn insert_events(&self, events: &[RequestEvent]) -> Result<u64> {
        if events.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for event in events {
            sqlx::query(
                "INSERT INTO request_events (service, timestamp, status, response_time) VALUES (?, ?, ?, ?)",
            )
            .bind(event.service.as_str())
            .bind(event.timestamp)
            .bind(event.status.map(i64::from))
            .bind(event.response_time_seconds)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(events.len() as u64)
    }

    #[tracing::instrument(
        name = "store_fold_before",
        skip(self),
        fields(
            trafficdb.horizon = horizon,
            trafficdb.events_folded = tracing::field::Empty,
        )
    )]
    async fn fold_before(&self, horizon: i64) -> Result<FoldSummary> {
        let mut tx = self.pool.begin().await?;

        // DELETE .. RETURNING takes the write lock before any bucket is read.
        // Deletion and merge commit together or not at all.
        let mut increments: BTreeMap<(Service, i64), HourlyIncrement> = BTreeMap::new();
        let mut events_folded = 0u64;
        {
            let mut rows = sqlx::query(
                "DELETE FROM request_events WHERE timestamp < ? \
                 RETURNING service, timestamp, status, response_time",
            )
            .bind(horizon)
            .fetch(&mut *tx);

            while let Some(row) = rows.try_next().await? {
                accumulate(&mut increments, &event_from_row(&row)?);
                events_folded += 1;
            }
        }

        for ((service, hour_start), increment) in &increments {
            merge_increment(&mut *tx, *service, *hour_start, increment).await?;
        }

        tx.commit().await?;

        tracing::Span::current().record("trafficdb.events_folded", events_folded);
        Ok(FoldSummary {
            events_folded,
            buckets_touched: increments.len() as u64,
        })
    }

    #[tracing::instrument(
        name = "store_window_snapshot",
        skip(self),
        fields(trafficdb.service = %service, trafficdb.since = since)
    )]
    async fn window_snapshot(
        &self,
        service: Service,
        since: i64,
        now: i64,
    ) -> Result<WindowSnapshot> {
        let mut tx = self.pool.begin().await?;

        let buckets = sqlx::query(
            "SELECT service, hour_start, request_count, error_count, avg_response_time \
             FROM hourly_buckets WHERE service = ? AND hour_start >= ? ORDER BY hour_start",
        )
        .bind(service.as_str())
        .bind(since)
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(bucket_from_row)
        .collect::<Result<Vec<_>>>()?;

        let raw_hours = sqlx::query(
            "SELECT (timestamp / 3600) * 3600 AS hour_start, \
                    COUNT(*) AS request_count, \
                    SUM(CASE WHEN status >= 500 THEN 1 ELSE 0 END) AS error_count \
             FROM request_events WHERE service = ? AND timestamp >= ? \
             GROUP BY hour_start ORDER BY hour_start",
        )
        .bind(service.as_str())
        .bind(since)
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(|row| -> Result<RawHour> {
            Ok(RawHour {
                hour_start: row.try_get("hour_start")?,
                request_count: row.try_get("request_count")?,
                error_count: row.try_get("error_count")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

        let last_minute_requests: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM request_events WHERE service = ? AND timestamp >= ?",
        )
        .bind(service.as_str())
        .bind(now - 60)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(WindowSnapshot {
            buckets,
            raw_hours,
            last_minute_requests,
        })
    }

    async fn total_requests(&self, service: Service) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let aggregated: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(request_count), 0) FROM hourly_buckets WHERE service = ?",
        )
        .bind(service.as_str())
        .fetch_one(&mut *tx)
        .await?;

        let raw: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM request_events WHERE service = ?")
            .bind(service.as_str())
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(aggregated + raw)
    }

    async fn get_bucket(&self, service: Service, hour_start: i64) -> Result<Option<HourlyBucket>> {
        let mut conn = self.pool.acquire().await?;
        fetch_bucket(&mut *conn, service, hour_start).await
    }

    async fn raw_event_count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM request_events")
            .fetch_one(&self.pool)
            .await
            .map_err(Into::into)
    }
}
