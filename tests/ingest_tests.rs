use anyhow::Result;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use trafficdb::store::{EventStore, SqliteEventStore};
use trafficdb::{Service, TrafficEngine};

fn append(path: &Path, content: &str) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

fn line(host: &str, time: &str, status: u16) -> String {
    format!("{host} 203.0.113.9 [{time}] \"POST / HTTP/1.1\" {status} 512 0.025\n")
}

/// Poll `check` until it holds or two seconds pass.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..40 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

async fn engine_at(dir: &TempDir) -> Result<TrafficEngine> {
    TrafficEngine::builder()
        .db_path(dir.path().join("metrics.db"))
        .poll_interval(Duration::from_millis(25))
        .flush_interval(Duration::from_millis(50))
        .build()
        .await
}

#[tokio::test(flavor = "multi_thread")]
async fn test_tailed_lines_reach_the_store() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let log_path = dir.path().join("access.log");
    // history before start is not replayed
    append(&log_path, &line("monad-rpc.huginn.tech", "01/Mar/2026:10:00:00 +0000", 200))?;

    let engine = engine_at(&dir).await?;
    engine.start_ingest(&log_path).await?;

    append(&log_path, &line("monad-rpc.huginn.tech", "01/Mar/2026:10:00:01 +0000", 200))?;
    append(&log_path, &line("unknown.example", "01/Mar/2026:10:00:01 +0000", 200))?;
    append(&log_path, &line("wss.monad-testnet-rpc.huginn.tech", "01/Mar/2026:10:00:02 +0000", 101))?;

    let store = engine.store().clone();
    assert!(
        eventually(|| {
            let store = store.clone();
            async move { store.raw_event_count().await.unwrap_or(0) == 2 }
        })
        .await,
        "tailed events were not flushed"
    );

    assert_eq!(store.total_requests(Service::Rpc).await?, 1);
    assert_eq!(store.total_requests(Service::Wss).await?, 1);

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rotation_is_followed() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let log_path = dir.path().join("access.log");
    for _ in 0..20 {
        append(&log_path, &line("monad-rpc.huginn.tech", "01/Mar/2026:09:00:00 +0000", 200))?;
    }

    let engine = engine_at(&dir).await?;
    engine.start_ingest(&log_path).await?;

    std::fs::rename(&log_path, dir.path().join("access.log.1"))?;
    append(&log_path, &line("validator-api.huginn.tech", "01/Mar/2026:10:00:00 +0000", 502))?;

    let store = engine.store().clone();
    assert!(
        eventually(|| {
            let store = store.clone();
            async move { store.raw_event_count().await.unwrap_or(0) == 1 }
        })
        .await,
        "event from rotated file was not ingested"
    );
    assert_eq!(store.total_requests(Service::ValidatorApi).await?, 1);
    assert_eq!(store.total_requests(Service::Rpc).await?, 0);

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_import_then_tail_with_restart() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let log_path = dir.path().join("access.log");
    for status in [200, 200, 500] {
        append(&log_path, &line("monad-rpc.huginn.tech", "28/Feb/2026:06:41:00 +0000", status))?;
    }

    {
        let engine = engine_at(&dir).await?;
        assert_eq!(engine.import_log(&log_path).await?.imported, 3);
        engine.aggregate_now().await?;
        engine.start_ingest(&log_path).await?;
        engine.shutdown().await?;
    }

    // imported rows are folded and survive a restart
    let store = SqliteEventStore::new(dir.path().join("metrics.db").to_str().unwrap()).await?;
    store.run_migrations().await?;
    assert_eq!(store.raw_event_count().await?, 0);
    let bucket = store
        .get_bucket(Service::Rpc, 1_772_258_400)
        .await?
        .expect("bucket for 06:00 UTC");
    assert_eq!(bucket.request_count, 3);
    assert_eq!(bucket.error_count, 1);
    store.close().await?;

    Ok(())
}
