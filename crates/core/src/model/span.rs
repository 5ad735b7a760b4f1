use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A finished span as printed by the preview output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpanRecord {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub service: String,
    pub name: String,
    pub kind: String,
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
    pub status: String,
    pub status_message: Option<String>,
    pub attributes: serde_json::Map<String, serde_json::Value>,
    pub events: Vec<SpanEventRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpanEventRecord {
    pub name: String,
    pub ts: DateTime<Utc>,
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl SpanRecord {
    pub fn duration_ms(&self) -> i64 {
        (self.end_ts - self.start_ts).num_milliseconds().max(0)
    }

    pub fn is_error(&self) -> bool {
        self.status == "ERROR"
    }
}
