use crate::errors::FlowError;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock, PoisonError};

pub const DEFAULT_DISK_BUDGET_BYTES: u64 = 20 * 1024 * 1024;
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 4096;

#[derive(Debug, Clone)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub level: &'a str,
    pub event_type: &'a str,
    pub payload: Value,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
        }
    }

    pub fn append(&self, event: &LogEvent<'_>) -> Result<(), FlowError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| FlowError::Io(e.to_string()))?;
        }
        let line = serde_json::to_string(&LogEvent {
            level: event.level,
            event_type: event.event_type,
            payload: truncate_json(event.payload.clone(), self.max_payload_bytes),
        })
        .map_err(|e| FlowError::Serialization(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| FlowError::Io(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| FlowError::Io(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            prune_to_budget(parent, self.budget_bytes, &self.path)?;
        }
        Ok(())
    }
}

static RUN_LOGGER: OnceLock<Mutex<Option<JsonlLogger>>> = OnceLock::new();

fn logger_slot() -> &'static Mutex<Option<JsonlLogger>> {
    RUN_LOGGER.get_or_init(|| Mutex::new(None))
}

pub fn init_run_logger(logger: JsonlLogger) {
    *logger_slot().lock().unwrap_or_else(PoisonError::into_inner) = Some(logger);
}

pub fn clear_run_logger() {
    *logger_slot().lock().unwrap_or_else(PoisonError::into_inner) = None;
}

/// Appends to the run log if one is installed. Logging failures never reach
/// the caller.
pub fn append_run_log(level: &str, event_type: &str, payload: Value) {
    let logger = logger_slot()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    if let Some(logger) = logger {
        let _ = logger.append(&LogEvent {
            level,
            event_type,
            payload,
        });
    }
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes.saturating_sub(3);
    while cut > 0 && !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    Value::String(format!("{}...", &rendered[..cut]))
}

/// Deletes the oldest files in `dir` until it fits in `budget_bytes`. The
/// active log file is never removed.
pub fn prune_to_budget(
    dir: &Path,
    budget_bytes: u64,
    keep: &Path,
) -> Result<Vec<PathBuf>, FlowError> {
    let mut files = fs::read_dir(dir)
        .map_err(|e| FlowError::Io(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let meta = entry.metadata().ok()?;
            meta.is_file()
                .then(|| (entry.path(), meta.len(), meta.modified().ok()))
        })
        .collect::<Vec<_>>();
    files.sort_by(|a, b| a.2.cmp(&b.2));

    let mut total = files.iter().map(|(_, len, _)| len).sum::<u64>();
    let mut deleted = Vec::new();
    for (path, len, _) in files {
        if total <= budget_bytes {
            break;
        }
        if path == keep {
            continue;
        }
        fs::remove_file(&path).map_err(|e| FlowError::Io(e.to_string()))?;
        total = total.saturating_sub(len);
        deleted.push(path);
    }
    Ok(deleted)
}
