use std::collections::{HashMap, HashSet};

use chrono::{DateTime, SecondsFormat, Utc};
use opentelemetry::trace::{SpanId, SpanKind, Status};
use opentelemetry::{KeyValue, Value};
use opentelemetry_sdk::trace::SpanData;
use owo_colors::OwoColorize;
use serde::Serialize;
use spansynth_core::model::span::{SpanEventRecord, SpanRecord};

#[derive(Debug, Serialize)]
struct Preview<'a> {
    synthesized: usize,
    spans: &'a [SpanRecord],
}

/// Converts exported spans into preview records ordered by start time.
pub fn span_records(spans: &[SpanData], service: &str) -> Vec<SpanRecord> {
    let mut records: Vec<SpanRecord> = spans.iter().map(|s| span_record(s, service)).collect();
    records.sort_by(|a, b| a.start_ts.cmp(&b.start_ts).then_with(|| a.name.cmp(&b.name)));
    records
}

pub fn span_record(span: &SpanData, service: &str) -> SpanRecord {
    let (status, description) = match &span.status {
        Status::Ok => ("OK", None),
        Status::Error { description } => ("ERROR", Some(description.to_string())),
        Status::Unset => ("UNSET", None),
    };
    let attributes = attrs_json(&span.attributes);
    let status_message = description.or_else(|| {
        attributes
            .get(spansynth_engine::emit::STATUS_MESSAGE_KEY)
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
    });

    SpanRecord {
        trace_id: span.span_context.trace_id().to_string(),
        span_id: span.span_context.span_id().to_string(),
        parent_span_id: (span.parent_span_id != SpanId::INVALID)
            .then(|| span.parent_span_id.to_string()),
        service: service.to_string(),
        name: span.name.to_string(),
        kind: kind_label(&span.span_kind).to_string(),
        start_ts: DateTime::<Utc>::from(span.start_time),
        end_ts: DateTime::<Utc>::from(span.end_time),
        status: status.to_string(),
        status_message,
        attributes,
        events: span
            .events
            .events
            .iter()
            .map(|event| SpanEventRecord {
                name: event.name.to_string(),
                ts: DateTime::<Utc>::from(event.timestamp),
                attributes: attrs_json(&event.attributes),
            })
            .collect(),
    }
}

fn kind_label(kind: &SpanKind) -> &'static str {
    match kind {
        SpanKind::Client => "client",
        SpanKind::Server => "server",
        SpanKind::Producer => "producer",
        SpanKind::Consumer => "consumer",
        SpanKind::Internal => "internal",
    }
}

fn attrs_json(attrs: &[KeyValue]) -> serde_json::Map<String, serde_json::Value> {
    attrs
        .iter()
        .map(|kv| (kv.key.to_string(), value_json(&kv.value)))
        .collect()
}

fn value_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Bool(v) => (*v).into(),
        Value::I64(v) => (*v).into(),
        Value::F64(v) => serde_json::Number::from_f64(*v)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        other => other.as_str().into_owned().into(),
    }
}

pub fn print_spans_json(records: &[SpanRecord], synthesized: usize) -> anyhow::Result<()> {
    let preview = Preview {
        synthesized,
        spans: records,
    };
    println!("{}", serde_json::to_string_pretty(&preview)?);
    Ok(())
}

pub fn print_spans_human(records: &[SpanRecord], synthesized: usize) {
    let known: HashSet<&str> = records.iter().map(|r| r.span_id.as_str()).collect();
    let mut children: HashMap<Option<&str>, Vec<&SpanRecord>> = HashMap::new();
    for record in records {
        let parent = record
            .parent_span_id
            .as_deref()
            .filter(|id| known.contains(id));
        children.entry(parent).or_default().push(record);
    }

    if let Some(roots) = children.get(&None) {
        for root in roots {
            if let Some(parent) = &root.parent_span_id {
                println!(
                    "{} {}",
                    "remote parent".bright_black(),
                    format!("{}/{}", root.trace_id, parent).bright_black()
                );
            }
            print_node(root, &children, 0);
        }
    }

    let errors = records.iter().filter(|r| r.is_error()).count();
    println!(
        "-- {} spans synthesized ({} errors) --",
        synthesized, errors
    );
}

fn print_node(
    span: &SpanRecord,
    children: &HashMap<Option<&str>, Vec<&SpanRecord>>,
    depth: usize,
) {
    let indent = "  ".repeat(depth);
    let status = match span.status.as_str() {
        "OK" => "OK".green().to_string(),
        "ERROR" => "ERROR".red().to_string(),
        other => other.bright_black().to_string(),
    };
    let message = span
        .status_message
        .as_deref()
        .map(|m| format!(" {}", m.yellow()))
        .unwrap_or_default();
    println!(
        "{indent}{} {} ({}ms) {status}{message}",
        span.start_ts.to_rfc3339_opts(SecondsFormat::Millis, true).bright_black(),
        span.name,
        span.duration_ms(),
    );

    if let Some(kids) = children.get(&Some(span.span_id.as_str())) {
        for child in kids {
            print_node(child, children, depth + 1);
        }
    }
}
