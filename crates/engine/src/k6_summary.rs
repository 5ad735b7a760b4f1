//! Rollup spans from a k6 `summary.json`.
//!
//! The summary is a single snapshot with no wall-clock start, so every span
//! covers the same window: it ends when the summary is synthesized and starts
//! `state.testRunDurationMs` earlier.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use opentelemetry::trace::{SpanKind, Status, Tracer};
use serde_json::Value;
use spansynth_core::model::k6::{FlatCheck, K6Summary, SummaryMetric, TrendStats};
use spansynth_core::time::sub_millis;
use tracing::{debug, error, info, warn};

use crate::SynthesisRequest;
use crate::emit::{Emitter, SpanDraft};
use crate::parent::usable_parent;
use crate::source::ArtifactSource;

/// Sub-phase trends whose averages are attached to the HTTP span.
const PHASES: [(&str, &str); 5] = [
    ("http_req_blocked", "k6.http.blocked_avg_ms"),
    ("http_req_connecting", "k6.http.connecting_avg_ms"),
    ("http_req_sending", "k6.http.sending_avg_ms"),
    ("http_req_waiting", "k6.http.waiting_avg_ms"),
    ("http_req_receiving", "k6.http.receiving_avg_ms"),
];

#[derive(Debug, Clone, Default)]
pub struct K6SummarySynthesizer {
    now: Option<DateTime<Utc>>,
}

impl K6SummarySynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins the window end instead of reading the clock.
    pub fn with_clock(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    pub async fn synthesize<T, S>(&self, tracer: &T, source: &S, req: SynthesisRequest<'_>) -> usize
    where
        T: Tracer,
        S: ArtifactSource,
    {
        let path = req.path.display();
        let Some(parent) = usable_parent(req.parent) else {
            warn!(path = %path, "no parent trace context, skipping k6 summary spans");
            return 0;
        };

        let raw = match source.read_to_string(req.path).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(path = %path, error = %err, "k6 summary unreadable");
                return 0;
            }
        };
        let summary: K6Summary = match serde_json::from_str(&raw) {
            Ok(summary) => summary,
            Err(err) => {
                error!(path = %path, error = %err, "k6 summary is not valid json");
                return 0;
            }
        };

        let (start, end) = self.window(&summary);
        let mut emitter = Emitter::new(tracer, parent, req.telemetry);

        match http_requests_span(&summary.metrics, start, end) {
            Some(draft) => emitter.emit(draft),
            None => debug!(path = %path, "no http_reqs count in summary"),
        }
        match virtual_users_span(&summary.metrics, start, end) {
            Some(draft) => emitter.emit(draft),
            None => debug!(path = %path, "no vus range in summary"),
        }

        let checks = summary
            .root_group
            .as_ref()
            .map(|group| group.flatten_checks())
            .unwrap_or_default();
        for check in &checks {
            emitter.emit_with(&check.name, || Ok(check_span(check, start, end)));
        }

        info!(
            path = %path,
            checks = checks.len(),
            spans = emitter.emitted(),
            "synthesized k6 summary spans"
        );
        emitter.emitted()
    }

    fn window(&self, summary: &K6Summary) -> (DateTime<Utc>, DateTime<Utc>) {
        let end = self.now.unwrap_or_else(Utc::now);
        let duration_ms = summary
            .state
            .as_ref()
            .and_then(|state| state.test_run_duration_ms)
            .unwrap_or(0.0);
        match sub_millis(end, duration_ms) {
            Ok(start) => (start, end),
            Err(err) => {
                warn!(error = %err, "unusable testRunDurationMs, using a zero-length window");
                (end, end)
            }
        }
    }
}

fn metric(metrics: &BTreeMap<String, Value>, name: &str) -> SummaryMetric {
    metrics
        .get(name)
        .map(SummaryMetric::classify)
        .unwrap_or(SummaryMetric::Unknown)
}

fn trend(metrics: &BTreeMap<String, Value>, name: &str) -> Option<TrendStats> {
    match metric(metrics, name) {
        SummaryMetric::Trend(stats) => Some(stats),
        _ => None,
    }
}

fn count(metrics: &BTreeMap<String, Value>, name: &str) -> Option<f64> {
    match metric(metrics, name) {
        SummaryMetric::Counter { count, .. } => Some(count),
        _ => None,
    }
}

fn http_requests_span(
    metrics: &BTreeMap<String, Value>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Option<SpanDraft> {
    let SummaryMetric::Counter { count, rate } = metric(metrics, "http_reqs") else {
        return None;
    };
    let duration = trend(metrics, "http_req_duration").unwrap_or_default();

    let mut draft = SpanDraft::new("HTTP Requests", start, end)
        .kind(SpanKind::Client)
        .attr("k6.http.requests", count as i64)
        .attr_opt("k6.http.request_rate", rate)
        .attr_opt("k6.http.duration_avg_ms", duration.avg)
        .attr_opt("k6.http.duration_min_ms", duration.min)
        .attr_opt("k6.http.duration_med_ms", duration.med)
        .attr_opt("k6.http.duration_max_ms", duration.max)
        .attr_opt("k6.http.duration_p90_ms", duration.p90)
        .attr_opt("k6.http.duration_p95_ms", duration.p95)
        .attr_opt("k6.http.duration_p99_ms", duration.p99)
        .attr_opt("k6.data.sent_bytes", count_i64(metrics, "data_sent"))
        .attr_opt("k6.data.received_bytes", count_i64(metrics, "data_received"))
        .attr_opt("k6.iterations", count_i64(metrics, "iterations"));

    for (name, key) in PHASES {
        draft = draft.attr_opt(key, trend(metrics, name).and_then(|t| t.avg));
    }

    let failed_rate = match metric(metrics, "http_req_failed") {
        SummaryMetric::Rate { rate } => Some(rate),
        _ => None,
    };
    draft = draft.attr_opt("k6.http.failed_rate", failed_rate);

    Some(match failed_rate {
        Some(rate) if rate > 0.0 => {
            draft.status(Status::error(format!("{:.2}% of requests failed", rate * 100.0)))
        }
        _ => draft.status(Status::Ok),
    })
}

fn count_i64(metrics: &BTreeMap<String, Value>, name: &str) -> Option<i64> {
    count(metrics, name).map(|c| c as i64)
}

fn virtual_users_span(
    metrics: &BTreeMap<String, Value>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Option<SpanDraft> {
    let SummaryMetric::Gauge { value, min, max } = metric(metrics, "vus") else {
        return None;
    };
    if min.is_none() && max.is_none() {
        return None;
    }
    let configured = match metric(metrics, "vus_max") {
        SummaryMetric::Gauge { value, max, .. } => value.or(max),
        _ => None,
    };

    Some(
        SpanDraft::new("Virtual Users", start, end)
            .attr_opt("k6.vus.min", min.map(|v| v as i64))
            .attr_opt("k6.vus.max", max.map(|v| v as i64))
            .attr_opt("k6.vus.value", value.map(|v| v as i64))
            .attr_opt("k6.vus.max_configured", configured.map(|v| v as i64))
            .status(Status::Ok),
    )
}

fn check_span(check: &FlatCheck, start: DateTime<Utc>, end: DateTime<Utc>) -> SpanDraft {
    let total = check.passes + check.fails;
    let pass_rate = if total == 0 {
        0.0
    } else {
        check.passes as f64 / total as f64
    };

    let draft = SpanDraft::new(format!("Check: {}", check.name), start, end)
        .attr("k6.check.name", check.name.clone())
        .attr("k6.check.passes", check.passes as i64)
        .attr("k6.check.fails", check.fails as i64)
        .attr("k6.check.total", total as i64)
        .attr("k6.check.pass_rate", pass_rate)
        .attr_opt(
            "k6.check.group",
            Some(check.group.clone()).filter(|g| !g.is_empty()),
        );

    if check.fails > 0 {
        draft.status(Status::error(format!("{} of {total} checks failed", check.fails)))
    } else {
        draft.status(Status::Ok)
    }
}
