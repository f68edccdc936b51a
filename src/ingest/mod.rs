pub mod buffer;
pub mod import;
pub mod parser;
pub mod tailer;

use crate::service::Service;
use serde::{Deserialize, Serialize};

pub use buffer::{BufferFlusher, EventSender};
pub use import::{import_log_file, ImportSummary};
pub use parser::{parse_line, service_for_host};
pub use tailer::{LogTailer, TailerWorker};

/// One observed request, as reported by the access log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEvent {
    pub service: Service,
    /// Event time from the log line, unix seconds.
    pub timestamp: i64,
    pub status: Option<u16>,
    pub response_time_seconds: f64,
}

impl RequestEvent {
    pub fn is_error(&self) -> bool {
        matches!(self.status, Some(code) if code >= 500)
    }
}
