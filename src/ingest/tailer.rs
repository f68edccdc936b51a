//! Incremental reader for a live, externally rotated access log.

use super::buffer::EventSender;
use super::parser::parse_line;
use super::RequestEvent;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader, SeekFrom};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default interval between file size checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound on bytes held in memory per read while catching up.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Tracks a read cursor into a log file and turns newly appended bytes into
/// request events.
///
/// Bytes after the last newline are held back and prefixed to the next read,
/// so a line that is still being written is never parsed half-way.
#[derive(Debug)]
pub struct LogTailer {
    path: PathBuf,
    cursor: u64,
    partial: Vec<u8>,
    file_id: Option<u64>,
    rejected_lines: u64,
}

impl LogTailer {
    /// Start at the current end of the file so existing content is not
    /// replayed. A missing file starts at offset 0.
    pub async fn at_end(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (cursor, file_id) = match tokio::fs::metadata(&path).await {
            Ok(meta) => (meta.len(), file_id(&meta)),
            Err(_) => (0, None),
        };
        Self {
            path,
            cursor,
            partial: Vec::new(),
            file_id,
            rejected_lines: 0,
        }
    }

    /// Start at offset 0.
    pub fn from_start(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cursor: 0,
            partial: Vec::new(),
            file_id: None,
            rejected_lines: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Non-empty lines that did not parse into an event so far.
    pub fn rejected_lines(&self) -> u64 {
        self.rejected_lines
    }

    /// Read whatever was appended since the last poll.
    ///
    /// A file that shrank, or was replaced by a different inode, is treated as
    /// rotated and read again from offset 0.
    pub async fn poll(&mut self) -> io::Result<Vec<RequestEvent>> {
        let meta = tokio::fs::metadata(&self.path).await?;
        let size = meta.len();
        let current_id = file_id(&meta);

        let replaced = matches!((self.file_id, current_id), (Some(old), Some(new)) if old != new);
        if size < self.cursor || replaced {
            info!(path = %self.path.display(), "Log rotation detected, resetting position");
            self.cursor = 0;
            self.partial.clear();
        }
        self.file_id = current_id;

        if size == self.cursor {
            return Ok(Vec::new());
        }

        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(self.cursor)).await?;
        let mut range = BufReader::with_capacity(READ_CHUNK_SIZE, file).take(size - self.cursor);

        let carried = self.partial.clone();
        let rejected_before = self.rejected_lines;
        let mut events = Vec::new();
        match self.read_range(&mut range, &mut events).await {
            Ok(read) => {
                // Only move the cursor once the read reached EOF.
                self.cursor += read;
                Ok(events)
            }
            Err(e) => {
                // The next poll re-reads the same range.
                self.partial = carried;
                self.rejected_lines = rejected_before;
                Err(e)
            }
        }
    }

    async fn read_range<R>(&mut self, reader: &mut R, events: &mut Vec<RequestEvent>) -> io::Result<u64>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut read = 0u64;
        loop {
            let chunk = reader.fill_buf().await?;
            if chunk.is_empty() {
                return Ok(read);
            }
            let len = chunk.len();
            events.extend(self.consume(chunk));
            reader.consume(len);
            read += len as u64;
        }
    }

    fn consume(&mut self, chunk: &[u8]) -> Vec<RequestEvent> {
        self.partial.extend_from_slice(chunk);
        let Some(last_newline) = self.partial.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };

        let complete: Vec<u8> = self.partial.drain(..=last_newline).collect();
        let mut events = Vec::new();
        for raw in complete.split(|b| *b == b'\n') {
            let line = String::from_utf8_lossy(raw);
            if line.trim().is_empty() {
                continue;
            }
            match parse_line(&line) {
                Some(event) => events.push(event),
                None => self.rejected_lines += 1,
            }
        }
        events
    }
}

#[cfg(unix)]
fn file_id(meta: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.ino())
}

#[cfg(not(unix))]
fn file_id(_meta: &std::fs::Metadata) -> Option<u64> {
    None
}

/// Background task polling a [`LogTailer`] and handing parsed events to the
/// flush task.
pub struct TailerWorker {
    tailer: LogTailer,
    poll_interval: Duration,
    sender: EventSender,
    shutdown: CancellationToken,
}

impl TailerWorker {
    pub fn new(
        tailer: LogTailer,
        poll_interval: Duration,
        sender: EventSender,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            tailer,
            poll_interval,
            sender,
            shutdown,
        }
    }

    /// Poll until shutdown. Dropping the sender on exit lets the flush task
    /// drain and stop.
    pub async fn run(mut self) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(path = %self.tailer.path().display(), "Watching access log");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("Tailer received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    match self.tailer.poll().await {
                        Ok(events) if events.is_empty() => {}
                        Ok(events) => {
                            if self.sender.send(events).is_err() {
                                debug!("Flush task gone, stopping tailer");
                                break;
                            }
                        }
                        // Usually a rotation in progress; retried next tick.
                        Err(e) => debug!(
                            path = %self.tailer.path().display(),
                            error = %e,
                            "Access log not readable"
                        ),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::Service;
    use std::io::Write;
    use tempfile::TempDir;

    fn log_line(status: u16) -> String {
        format!(
            "monad-rpc.huginn.tech 10.0.0.1 [01/Jan/2026:00:00:00 +0000] \"POST / HTTP/1.1\" {status} 10 0.050\n"
        )
    }

    fn append(path: &Path, content: &str) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    #[tokio::test]
    async fn starts_at_end_and_reads_only_appended_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("access.log");
        append(&path, &log_line(200));
        append(&path, &log_line(200));

        let mut tailer = LogTailer::at_end(&path).await;
        assert!(tailer.poll().await.unwrap().is_empty());

        append(&path, &log_line(500));
        let events = tailer.poll().await.unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].service, Service::Rpc);
        assert_eq!(events[0].status, Some(500));
    }

    #[tokio::test]
    async fn holds_back_incomplete_trailing_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("access.log");
        append(&path, "");
        let mut tailer = LogTailer::at_end(&path).await;

        let line = log_line(201);
        let (head, tail) = line.split_at(40);

        append(&path, head);
        assert!(tailer.poll().await.unwrap().is_empty());
        assert_eq!(tailer.cursor(), head.len() as u64);

        append(&path, tail);
        let events = tailer.poll().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, Some(201));
    }

    #[tokio::test]
    async fn counts_rejected_lines_without_failing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("access.log");
        let mut tailer = LogTailer::from_start(&path);

        append(&path, "not a log line\n\nexample.com 1.1.1.1 [01/Jan/2026:00:00:00 +0000] \"GET /\" 200 1 0.1\n");
        append(&path, &log_line(200));

        let events = tailer.poll().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(tailer.rejected_lines(), 2);
    }

    #[tokio::test]
    async fn large_backlog_is_read_in_chunks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("access.log");
        append(&path, "");
        let mut tailer = LogTailer::at_end(&path).await;

        // several read chunks worth, with lines straddling chunk boundaries
        let backlog = log_line(200).repeat(3_000);
        assert!(backlog.len() > 3 * READ_CHUNK_SIZE);
        append(&path, &backlog);

        let events = tailer.poll().await.unwrap();

        assert_eq!(events.len(), 3_000);
        assert_eq!(tailer.rejected_lines(), 0);
        assert_eq!(tailer.cursor(), backlog.len() as u64);
    }

    #[tokio::test]
    async fn rotation_to_smaller_file_restarts_from_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("access.log");
        for _ in 0..5 {
            append(&path, &log_line(200));
        }
        let mut tailer = LogTailer::at_end(&path).await;
        // stale half line from the old file must not leak into the new one
        append(&path, "monad-rpc.huginn.tech 10.0.0.1 [01/Jan");
        assert!(tailer.poll().await.unwrap().is_empty());

        let rotated = dir.path().join("access.log.1");
        std::fs::rename(&path, &rotated).unwrap();
        append(&path, &log_line(404));

        let events = tailer.poll().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, Some(404));
        assert_eq!(tailer.cursor(), log_line(404).len() as u64);
    }

    #[tokio::test]
    async fn truncation_in_place_restarts_from_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("access.log");
        for _ in 0..3 {
            append(&path, &log_line(200));
        }
        let mut tailer = LogTailer::at_end(&path).await;

        std::fs::write(&path, log_line(502)).unwrap();

        let events = tailer.poll().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, Some(502));
    }

    #[tokio::test]
    async fn missing_file_is_an_error_not_a_panic() {
        let dir = TempDir::new().unwrap();
        let mut tailer = LogTailer::at_end(dir.path().join("absent.log")).await;

        assert_eq!(tailer.cursor(), 0);
        assert!(tailer.poll().await.is_err());
    }
}
