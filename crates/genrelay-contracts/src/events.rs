use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

#[derive(Debug)]
enum EventSink {
    Jsonl(PathBuf),
    Memory(Vec<Value>),
    Discard,
}

/// Append-only job event log.
///
/// Every event carries `type`, `session_id` and `ts`; the caller payload is
/// merged last and may override them. The JSONL sink writes one compact
/// object per line; the memory sink keeps events for inspection.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    session_id: String,
    sink: Mutex<EventSink>,
}

impl EventWriter {
    pub fn jsonl(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self::with_sink(EventSink::Jsonl(path.into()), session_id)
    }

    pub fn in_memory(session_id: impl Into<String>) -> Self {
        Self::with_sink(EventSink::Memory(Vec::new()), session_id)
    }

    pub fn disabled() -> Self {
        Self::with_sink(EventSink::Discard, "")
    }

    fn with_sink(sink: EventSink, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                session_id: session_id.into(),
                sink: Mutex::new(sink),
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn path(&self) -> Option<PathBuf> {
        match &*self.lock() {
            EventSink::Jsonl(path) => Some(path.clone()),
            _ => None,
        }
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }
        let event = Value::Object(event);

        let mut sink = self.lock();
        match &mut *sink {
            EventSink::Jsonl(path) => append_line(path, &event)?,
            EventSink::Memory(events) => events.push(event.clone()),
            EventSink::Discard => {}
        }
        Ok(event)
    }

    /// Events held by the memory sink, oldest first.
    pub fn captured(&self) -> Vec<Value> {
        match &*self.lock() {
            EventSink::Memory(events) => events.clone(),
            _ => Vec::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EventSink> {
        self.inner.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn append_line(path: &Path, event: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let line = serde_json::to_string(event)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
