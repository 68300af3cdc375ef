use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    SessionStarted,
    GenerationStarted,
    CreationCreated,
    GenerationEmpty,
    GenerationFailed,
    GenerationDiscarded,
    CreationSelected,
    CreationImported,
    ImportRejected,
    SessionReset,
}

impl SessionEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionStarted => "session_started",
            Self::GenerationStarted => "generation_started",
            Self::CreationCreated => "creation_created",
            Self::GenerationEmpty => "generation_empty",
            Self::GenerationFailed => "generation_failed",
            Self::GenerationDiscarded => "generation_discarded",
            Self::CreationSelected => "creation_selected",
            Self::CreationImported => "creation_imported",
            Self::ImportRejected => "import_rejected",
            Self::SessionReset => "session_reset",
        }
    }
}

/// Append-only journal of session transitions (`events.jsonl`).
///
/// - default fields are `type`, `session_id`, `ts`
/// - caller payload is merged last and can override defaults
/// - one compact JSON object per line
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    session_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                session_id: session_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn emit(&self, event: SessionEvent, payload: EventPayload) -> anyhow::Result<Value> {
        let mut record = Map::new();
        record.insert("type".to_string(), Value::String(event.as_str().to_string()));
        record.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        record.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            record.insert(key, value);
        }

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&record)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event journal lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(record))
    }

    /// Like [`Self::emit`] but a failed write is only logged.
    pub fn record(&self, event: SessionEvent, payload: EventPayload) {
        if let Err(err) = self.emit(event, payload) {
            tracing::warn!(
                event = event.as_str(),
                path = %self.inner.path.display(),
                error = %err,
                "failed to append session event"
            );
        }
    }
}

/// Reads every parseable line of a journal; missing files read as empty.
pub fn read_events(path: &Path) -> Vec<Value> {
    std::fs::read_to_string(path)
        .map(|raw| {
            raw.lines()
                .filter_map(|line| serde_json::from_str::<Value>(line).ok())
                .collect()
        })
        .unwrap_or_default()
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
