use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::generation::PromptVersion;

/// Milestones of a try-on run, one JSONL line each.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TryOnEvent {
    AttemptStarted {
        garment: String,
        attempt: u32,
        prompt_version: PromptVersion,
    },
    AttemptWithoutImage {
        garment: String,
        attempt: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        text_excerpt: Option<String>,
    },
    TryOnFinished {
        garment: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        image_digest: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    LayerApplied {
        index: usize,
        garment: String,
        image_digest: String,
    },
    LayerFailed {
        index: usize,
        garment: String,
        reason: String,
        tolerated: bool,
    },
    OutfitFinished {
        success: bool,
        layers_applied: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

/// Append-only `events.jsonl` for one outfit run.
///
/// Every line carries `type`, `outfit_id` and `ts`, followed by the
/// event's own fields. Clones share the file and its lock.
#[derive(Debug, Clone)]
pub struct EventLog {
    inner: Arc<EventLogInner>,
}

#[derive(Debug)]
struct EventLogInner {
    path: PathBuf,
    outfit_id: String,
    lock: Mutex<()>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>, outfit_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventLogInner {
                path: path.into(),
                outfit_id: outfit_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    /// Log with a fresh random outfit id.
    pub fn create(path: impl Into<PathBuf>) -> Self {
        Self::new(path, uuid::Uuid::new_v4().to_string())
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn outfit_id(&self) -> &str {
        &self.inner.outfit_id
    }

    pub fn record(&self, event: &TryOnEvent) -> anyhow::Result<Value> {
        let fields = match serde_json::to_value(event)? {
            Value::Object(fields) => fields,
            other => anyhow::bail!("event did not serialize to an object: {other}"),
        };
        let mut line = Map::new();
        line.insert(
            "outfit_id".to_string(),
            Value::String(self.inner.outfit_id.clone()),
        );
        line.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in fields {
            line.insert(key, value);
        }

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let text = serde_json::to_string(&line)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(text.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(line))
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
