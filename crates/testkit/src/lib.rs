use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, TimeZone, Utc};
use opentelemetry::trace::{
    SpanContext, TraceContextExt, TraceFlags, TraceState, TracerProvider as _,
};
use opentelemetry::{Context, Value};
use opentelemetry_sdk::trace::{
    self as sdktrace, IdGenerator as _, InMemorySpanExporter, RandomIdGenerator,
    SdkTracerProvider, SpanData,
};
use serde_json::json;

/// A tracer whose finished spans land in memory, plus a parent to hang them on.
pub struct TracerHarness {
    provider: SdkTracerProvider,
    exporter: InMemorySpanExporter,
    tracer: sdktrace::Tracer,
    parent: SpanContext,
}

impl Default for TracerHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TracerHarness {
    pub fn new() -> Self {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        let tracer = provider.tracer("testkit");
        let ids = RandomIdGenerator::default();
        let parent = SpanContext::new(
            ids.new_trace_id(),
            ids.new_span_id(),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        );

        Self {
            provider,
            exporter,
            tracer,
            parent,
        }
    }

    pub fn tracer(&self) -> &sdktrace::Tracer {
        &self.tracer
    }

    /// A context carrying the run span. It is never exported itself, so
    /// `finished()` only ever holds synthesized spans.
    pub fn parent(&self) -> Context {
        Context::new().with_remote_span_context(self.parent.clone())
    }

    pub fn finished(&self) -> Vec<SpanData> {
        let _ = self.provider.force_flush();
        self.exporter.get_finished_spans().unwrap()
    }
}

fn attr<'a>(span: &'a SpanData, key: &str) -> Option<&'a Value> {
    span.attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| &kv.value)
}

pub fn attr_str(span: &SpanData, key: &str) -> Option<String> {
    attr(span, key).map(|v| v.as_str().into_owned())
}

pub fn attr_i64(span: &SpanData, key: &str) -> Option<i64> {
    match attr(span, key)? {
        Value::I64(v) => Some(*v),
        _ => None,
    }
}

pub fn attr_f64(span: &SpanData, key: &str) -> Option<f64> {
    match attr(span, key)? {
        Value::F64(v) => Some(*v),
        Value::I64(v) => Some(*v as f64),
        _ => None,
    }
}

pub fn attr_bool(span: &SpanData, key: &str) -> Option<bool> {
    match attr(span, key)? {
        Value::Bool(v) => Some(*v),
        _ => None,
    }
}

pub fn write_json(dir: &Path, name: &str, value: &serde_json::Value) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, serde_json::to_vec_pretty(value).unwrap()).unwrap();
    path
}

pub fn write_lines(dir: &Path, name: &str, lines: &[String]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let mut body = lines.join("\n");
    body.push('\n');
    fs::write(&path, body).unwrap();
    path
}

/// One `--out json` point line.
pub fn ndjson_point(metric: &str, time: &str, value: f64, tags: serde_json::Value) -> String {
    json!({
        "type": "Point",
        "metric": metric,
        "data": {"time": time, "value": value, "tags": tags}
    })
    .to_string()
}

pub fn run_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()
}

/// A Playwright report with one flaky, one failed and one passed test.
pub fn sample_playwright_report() -> serde_json::Value {
    json!({
        "stats": {"startTime": run_start().to_rfc3339(), "duration": 2400},
        "suites": [{
            "title": "checkout.spec.ts",
            "file": "checkout.spec.ts",
            "specs": [
                {
                    "title": "adds to cart",
                    "line": 3,
                    "column": 1,
                    "tests": [{
                        "projectName": "chromium",
                        "results": [
                            {"status": "failed", "duration": 600, "errors": [{"message": "locator timeout"}]},
                            {"status": "passed", "duration": 400}
                        ]
                    }]
                },
                {
                    "title": "pays by card",
                    "line": 20,
                    "column": 1,
                    "tests": [{
                        "projectName": "chromium",
                        "results": [{
                            "status": "failed",
                            "duration": 900,
                            "errors": [{"message": "expected 200, got 502", "stack": "at checkout.spec.ts:24"}]
                        }]
                    }]
                },
                {
                    "title": "shows receipt",
                    "line": 40,
                    "column": 1,
                    "tests": [{
                        "projectName": "chromium",
                        "results": [{"status": "passed", "duration": 500}]
                    }]
                }
            ]
        }]
    })
}

pub fn sample_k6_summary() -> serde_json::Value {
    json!({
        "root_group": {
            "name": "",
            "path": "",
            "checks": [{"name": "status is 200", "passes": 48, "fails": 2}],
            "groups": []
        },
        "metrics": {
            "http_reqs": {"count": 50, "rate": 5.0},
            "http_req_duration": {"avg": 80.0, "min": 12.0, "med": 70.0, "max": 400.0, "p(90)": 150.0, "p(95)": 210.0},
            "http_req_failed": {"passes": 2, "fails": 48, "value": 0.04},
            "vus": {"value": 5, "min": 1, "max": 5}
        },
        "state": {"testRunDurationMs": 10000.0}
    })
}

/// Point lines for two endpoints, one scenario and one check.
pub fn sample_k6_points() -> Vec<String> {
    let at = |ms: i64| (run_start() + Duration::milliseconds(ms)).to_rfc3339();
    let mut lines = vec![json!({
        "type": "Metric",
        "metric": "http_req_duration",
        "data": {"name": "http_req_duration", "type": "trend", "contains": "time"}
    })
    .to_string()];
    for i in 0..20 {
        let status = if i % 10 == 0 { "500" } else { "200" };
        lines.push(ndjson_point(
            "http_req_duration",
            &at(i * 100),
            (20 + i * 3) as f64,
            json!({"method": "GET", "url": format!("https://shop.example.com/items/{i}"), "status": status, "scenario": "browse"}),
        ));
    }
    lines.push(ndjson_point(
        "http_req_duration",
        &at(2500),
        75.0,
        json!({"method": "POST", "url": "https://shop.example.com/cart?session=abc", "status": "201", "scenario": "browse"}),
    ));
    lines.push(ndjson_point(
        "iteration_duration",
        &at(3000),
        3000.0,
        json!({"scenario": "browse"}),
    ));
    lines.push(ndjson_point(
        "checks",
        &at(3000),
        1.0,
        json!({"check": "status is 200", "scenario": "browse"}),
    ));
    lines
}

/// A worker run directory holding one artifact of each kind.
pub fn write_run_dir(dir: &Path) {
    write_json(
        dir,
        "playwright-report/results.json",
        &sample_playwright_report(),
    );
    write_json(dir, "summary.json", &sample_k6_summary());
    write_lines(dir, "metrics.ndjson", &sample_k6_points());
}
