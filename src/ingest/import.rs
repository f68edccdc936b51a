//! One-shot bulk import of an existing access log.

use super::parser::parse_line;
use crate::store::EventStore;
use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, instrument};

/// Default number of parsed lines per insert transaction.
pub const DEFAULT_IMPORT_BATCH_SIZE: usize = 10_000;

/// Outcome of a bulk import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Events written to the store.
    pub imported: u64,
    /// Non-blank lines that were malformed or from an unmonitored host.
    pub rejected: u64,
}

/// Stream `path` line by line and insert every parsed event.
///
/// Inserts happen every `batch_size` parsed lines. Unparseable lines are
/// skipped and counted.
#[instrument(name = "import_log_file", skip(store, path), fields(path = %path.display()))]
pub async fn import_log_file(
    path: &Path,
    store: &dyn EventStore,
    batch_size: usize,
) -> Result<ImportSummary> {
    let file = File::open(path)
        .await
        .with_context(|| format!("Failed to open access log {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let batch_size = batch_size.max(1);

    let mut batch = Vec::with_capacity(batch_size);
    let mut raw = Vec::new();
    let mut imported = 0u64;
    let mut rejected = 0u64;

    loop {
        raw.clear();
        let read = reader
            .read_until(b'\n', &mut raw)
            .await
            .context("Failed to read access log")?;
        if read == 0 {
            break;
        }

        let line = String::from_utf8_lossy(&raw);
        let line = line.trim_end_matches(['\n', '\r']);
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(line) {
            Some(event) => batch.push(event),
            None => {
                rejected += 1;
                continue;
            }
        }

        if batch.len() >= batch_size {
            imported += store.insert_events(&batch).await?;
            batch.clear();
        }
    }

    if !batch.is_empty() {
        imported += store.insert_events(&batch).await?;
    }

    info!(imported, rejected, "Imported access log");
    Ok(ImportSummary { imported, rejected })
}
