//! Versioned schema for the SQLite event store.
//!
//! Applied versions are recorded in `schema_migrations`. Each pending step
//! runs in its own transaction together with its version row, so a failed
//! step leaves neither partial DDL nor a recorded version behind.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::info;

pub(crate) struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub statements: &'static [&'static str],
}

pub(crate) const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "raw request events and hourly buckets",
    statements: &[
        r#"
        CREATE TABLE IF NOT EXISTS request_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            service TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            status INTEGER,
            response_time REAL NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS hourly_buckets (
            service TEXT NOT NULL,
            hour_start INTEGER NOT NULL,
            request_count INTEGER NOT NULL DEFAULT 0,
            error_count INTEGER NOT NULL DEFAULT 0,
            avg_response_time REAL NOT NULL DEFAULT 0,
            PRIMARY KEY (service, hour_start)
        )
        "#,
        // fold scans by timestamp across services
        "CREATE INDEX IF NOT EXISTS idx_request_events_timestamp ON request_events(timestamp)",
        // window snapshots read one service at a time
        "CREATE INDEX IF NOT EXISTS idx_request_events_service_ts \
         ON request_events(service, timestamp)",
    ],
}];

pub(crate) async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create schema_migrations")?;

    let current_version: i64 =
        sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
            .fetch_one(pool)
            .await?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current_version) {
        let mut tx = pool.begin().await?;
        for statement in migration.statements {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Migration v{} failed", migration.version))?;
        }
        sqlx::query("INSERT INTO schema_migrations (version) VALUES (?)")
            .bind(migration.version)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(
            version = migration.version,
            description = migration.description,
            "Applied store migration"
        );
    }

    Ok(())
}
