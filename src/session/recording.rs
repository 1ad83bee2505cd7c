use super::*;
use std::time::{SystemTime, UNIX_EPOCH};

/// Session recording granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub enum SessionRecordLevel {
    /// Disable recording.
    Off,
    /// Record key events only.
    KeyEventsOnly,
    /// Record key events and raw chunks.
    #[default]
    Full,
}

/// A single recorded session event.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionRecordEntry {
    pub ts_ms: u128,
    pub event: SessionEvent,
}

/// Supported recorded event types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    ConnectionEstablished {
        host: String,
    },
    ConnectionClosed {
        reason: String,
    },
    /// Text written to the shell, trailing newlines excluded.
    CommandSent {
        command: String,
    },
    /// A bounded read that ended on a marker.
    CommandOutput {
        command: String,
        matched: usize,
        output: String,
    },
    /// A bounded read that ended without a marker.
    CommandFailed {
        command: String,
        reason: String,
        #[serde(default)]
        output: Option<String>,
    },
    RawChunk {
        data: String,
    },
}

/// In-memory session recorder.
///
/// Clones share the same event log.
#[derive(Debug, Clone)]
pub struct SessionRecorder {
    level: SessionRecordLevel,
    entries: Arc<Mutex<Vec<SessionRecordEntry>>>,
}

impl SessionRecorder {
    /// Create a recorder with the given level.
    pub fn new(level: SessionRecordLevel) -> Self {
        Self {
            level,
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Current recording level.
    pub fn level(&self) -> SessionRecordLevel {
        self.level
    }

    /// Record a key-level event.
    pub fn record_event(&self, event: SessionEvent) -> Result<(), ConnectError> {
        if self.level == SessionRecordLevel::Off {
            return Ok(());
        }
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| ConnectError::RecordError(format!("record lock error: {e}")))?;
        guard.push(SessionRecordEntry {
            ts_ms: now_ms(),
            event,
        });
        Ok(())
    }

    /// Record raw shell data chunk when enabled.
    pub fn record_raw_chunk(&self, data: String) -> Result<(), ConnectError> {
        if self.level != SessionRecordLevel::Full {
            return Ok(());
        }
        self.record_event(SessionEvent::RawChunk { data })
    }

    /// Snapshot all records.
    pub fn entries(&self) -> Result<Vec<SessionRecordEntry>, ConnectError> {
        let guard = self
            .entries
            .lock()
            .map_err(|e| ConnectError::RecordError(format!("record lock error: {e}")))?;
        Ok(guard.clone())
    }

    /// Recorded events without timestamps.
    pub fn events(&self) -> Result<Vec<SessionEvent>, ConnectError> {
        Ok(self.entries()?.into_iter().map(|entry| entry.event).collect())
    }

    /// Clears all recorded events.
    pub fn clear(&self) -> Result<(), ConnectError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| ConnectError::RecordError(format!("record lock error: {e}")))?;
        guard.clear();
        Ok(())
    }

    /// Export records as JSONL.
    pub fn to_jsonl(&self) -> Result<String, ConnectError> {
        let entries = self.entries()?;
        let mut lines = Vec::with_capacity(entries.len());
        for entry in entries {
            let line = serde_json::to_string(&entry)
                .map_err(|e| ConnectError::RecordError(format!("record encode error: {e}")))?;
            lines.push(line);
        }
        Ok(lines.join("\n"))
    }

    /// Restore recorder from JSONL lines. Blank lines are skipped.
    pub fn from_jsonl(jsonl: &str) -> Result<Self, ConnectError> {
        let mut parsed = Vec::new();
        for line in jsonl.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: SessionRecordEntry = serde_json::from_str(line)
                .map_err(|e| ConnectError::RecordError(format!("record decode error: {e}")))?;
            parsed.push(entry);
        }

        Ok(Self {
            level: SessionRecordLevel::Full,
            entries: Arc::new(Mutex::new(parsed)),
        })
    }
}

impl Default for SessionRecorder {
    fn default() -> Self {
        Self::new(SessionRecordLevel::Full)
    }
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}
