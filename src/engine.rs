use crate::aggregate::{
    AggregationOutcome, AggregationWorker, Aggregator, DEFAULT_AGGREGATION_INTERVAL_SECS,
    DEFAULT_FRESHNESS_HORIZON_SECS,
};
use crate::config::AppConfig;
use crate::ingest::buffer::{event_channel, DEFAULT_FLUSH_INTERVAL};
use crate::ingest::import::DEFAULT_IMPORT_BATCH_SIZE;
use crate::ingest::tailer::DEFAULT_POLL_INTERVAL;
use crate::ingest::{import_log_file, BufferFlusher, ImportSummary, LogTailer, TailerWorker};
use crate::query::QueryEngine;
use crate::store::{EventStore, SqliteEventStore};
use anyhow::{anyhow, bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Upper bound on waiting for a background task during shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_DB_FILE: &str = "metrics.db";

struct IngestHandles {
    tailer: JoinHandle<()>,
    flusher: JoinHandle<()>,
}

/// Owns the event store and every background task around it: the live
/// tailer, the buffer flusher and the aggregation worker.
pub struct TrafficEngine {
    store: Arc<dyn EventStore>,
    query: QueryEngine,
    aggregator: Arc<Aggregator>,
    shutdown_token: CancellationToken,
    aggregation_worker_handle: Mutex<Option<JoinHandle<()>>>,
    ingest_handles: Mutex<Option<IngestHandles>>,
    poll_interval: Duration,
    flush_interval: Duration,
    import_batch_size: usize,
}

impl TrafficEngine {
    pub fn builder() -> TrafficEngineBuilder {
        TrafficEngineBuilder::new()
    }

    /// Build an engine from application configuration.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        Self::builder()
            .db_path(&config.storage.db_path)
            .aggregation_interval(Duration::from_secs(config.aggregation.interval_secs))
            .freshness_horizon(Duration::from_secs(
                config.aggregation.freshness_horizon_secs,
            ))
            .poll_interval(Duration::from_millis(config.ingest.poll_interval_ms))
            .flush_interval(Duration::from_millis(config.ingest.flush_interval_ms))
            .import_batch_size(config.ingest.import_batch_size)
            .build()
            .await
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn query(&self) -> &QueryEngine {
        &self.query
    }

    /// Bulk-import an existing log file. Independent of the live tail cursor.
    pub async fn import_log(&self, path: &Path) -> Result<ImportSummary> {
        import_log_file(path, self.store.as_ref(), self.import_batch_size).await
    }

    /// Run one aggregation pass now.
    pub async fn aggregate_now(&self) -> Result<AggregationOutcome> {
        self.aggregator.run_once().await
    }

    /// Start tailing `log_path` from its current end.
    ///
    /// Spawns the tailer and its flush task. Fails if ingestion is already
    /// running.
    pub async fn start_ingest(&self, log_path: impl Into<PathBuf>) -> Result<()> {
        let mut handles = self.ingest_handles.lock().await;
        if handles.is_some() {
            bail!("Ingestion already started");
        }
        if self.shutdown_token.is_cancelled() {
            bail!("Engine is shut down");
        }

        let tailer = LogTailer::at_end(log_path).await;
        let (sender, receiver) = event_channel();

        let flusher = BufferFlusher::new(receiver, self.store.clone(), self.flush_interval);
        let tailer = TailerWorker::new(
            tailer,
            self.poll_interval,
            sender,
            self.shutdown_token.clone(),
        );

        *handles = Some(IngestHandles {
            flusher: tokio::spawn(flusher.run()),
            tailer: tokio::spawn(tailer.run()),
        });
        Ok(())
    }

    /// Stop every background task and release the store.
    ///
    /// The tailer stops first, which closes the event channel and lets the
    /// flusher write whatever is still buffered before it exits.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_token.cancel();

        if let Some(handles) = self.ingest_handles.lock().await.take() {
            await_task("tailer", handles.tailer).await;
            await_task("buffer flusher", handles.flusher).await;
        }

        if let Some(handle) = self.aggregation_worker_handle.lock().await.take() {
            await_task("aggregation worker", handle).await;
        }

        self.store.close().await
    }
}

async fn await_task(name: &str, handle: JoinHandle<()>) {
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(task = name, error = %e, "Background task failed"),
        Err(_) => warn!(task = name, "Timed out waiting for background task"),
    }
}

impl Drop for TrafficEngine {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}

/// Builder for [`TrafficEngine`].
///
/// Without an explicit store the builder opens a SQLite store at `db_path`
/// (default `metrics.db` in the working directory) and runs its migrations.
pub struct TrafficEngineBuilder {
    db_path: Option<PathBuf>,
    store: Option<Arc<dyn EventStore>>,
    aggregation_interval: Duration,
    freshness_horizon: Duration,
    poll_interval: Duration,
    flush_interval: Duration,
    import_batch_size: usize,
}

impl Default for TrafficEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TrafficEngineBuilder {
    pub fn new() -> Self {
        Self {
            db_path: None,
            store: None,
            aggregation_interval: Duration::from_secs(DEFAULT_AGGREGATION_INTERVAL_SECS),
            freshness_horizon: Duration::from_secs(DEFAULT_FRESHNESS_HORIZON_SECS),
            poll_interval: DEFAULT_POLL_INTERVAL,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            import_batch_size: DEFAULT_IMPORT_BATCH_SIZE,
        }
    }

    pub fn db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    /// Use an existing store instead of opening one. Skips `db_path`.
    pub fn store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn aggregation_interval(mut self, interval: Duration) -> Self {
        self.aggregation_interval = interval;
        self
    }

    pub fn freshness_horizon(mut self, horizon: Duration) -> Self {
        self.freshness_horizon = horizon;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn import_batch_size(mut self, size: usize) -> Self {
        self.import_batch_size = size;
        self
    }

    pub async fn build(self) -> Result<TrafficEngine> {
        let store: Arc<dyn EventStore> = match self.store {
            Some(store) => store,
            None => {
                let db_path = self
                    .db_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_FILE));
                if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create directory {}", parent.display())
                    })?;
                }
                let db_path = db_path
                    .to_str()
                    .ok_or_else(|| anyhow!("Invalid database path"))?;
                Arc::new(SqliteEventStore::new(db_path).await?)
            }
        };

        store.run_migrations().await?;

        let aggregator = Arc::new(Aggregator::new(store.clone(), self.freshness_horizon));
        let query = QueryEngine::with_freshness_horizon(
            store.clone(),
            self.freshness_horizon.as_secs() as i64,
        );

        let shutdown_token = CancellationToken::new();
        let worker = AggregationWorker::new(
            aggregator.clone(),
            self.aggregation_interval,
            shutdown_token.clone(),
        );
        let aggregation_worker_handle = tokio::spawn(worker.run());

        info!(
            aggregation_interval_secs = self.aggregation_interval.as_secs(),
            "Traffic engine started"
        );

        Ok(TrafficEngine {
            store,
            query,
            aggregator,
            shutdown_token,
            aggregation_worker_handle: Mutex::new(Some(aggregation_worker_handle)),
            ingest_handles: Mutex::new(None),
            poll_interval: self.poll_interval,
            flush_interval: self.flush_interval,
            import_batch_size: self.import_batch_size.max(1),
        })
    }
}
