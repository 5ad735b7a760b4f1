//! Spans from the k6 NDJSON point stream.
//!
//! The file is decoded line by line and folded into per-endpoint, per-scenario
//! and per-check aggregates, so memory is bounded by the number of distinct
//! endpoints rather than by request volume. Spans are emitted in a fixed
//! order: endpoints, scenarios, checks, slow requests, failed requests.

mod aggregate;
mod stream;

use chrono::{DateTime, Utc};
use opentelemetry::trace::{SpanKind, Status, Tracer};
use opentelemetry::{Context, KeyValue};
use spansynth_core::config::NdjsonOptions;
use spansynth_core::ids::{SpanId, TraceId};
use spansynth_core::Result;
use spansynth_core::time::add_millis;
use tracing::{info, warn};

pub use aggregate::{
    Aggregation, Aggregator, CheckAggregate, EndpointAggregate, RequestSample, ScenarioAggregate,
    StreamAggregates, aggregate_stream,
};
pub use stream::{MalformedLine, MetricPoint, points};

use crate::SynthesisRequest;
use crate::emit::{Emitter, SpanDraft, observed_window};
use crate::parent::{remote_parent, usable_parent};
use crate::source::ArtifactSource;

/// Failed-request spans get this fixed length instead of the measured one.
pub const FAILED_REQUEST_NOMINAL_MS: f64 = 100.0;

/// Endpoints failing more often than this get an error status.
pub const ENDPOINT_ERROR_RATE_THRESHOLD: f64 = 0.10;

#[derive(Debug, Clone, Default)]
pub struct K6NdjsonSynthesizer {
    options: NdjsonOptions,
    test_start: Option<DateTime<Utc>>,
    correlation: Option<(TraceId, SpanId)>,
}

impl K6NdjsonSynthesizer {
    pub fn new(options: NdjsonOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Start of the check window when known; otherwise the earliest point is used.
    pub fn with_test_start(mut self, start: DateTime<Utc>) -> Self {
        self.test_start = Some(start);
        self
    }

    /// A propagated trace/span pair. It becomes the parent when the request
    /// carries none, and is recorded on every span.
    pub fn with_correlation(mut self, trace_id: TraceId, span_id: SpanId) -> Self {
        self.correlation = Some((trace_id, span_id));
        self
    }

    pub async fn synthesize<T, S>(&self, tracer: &T, source: &S, req: SynthesisRequest<'_>) -> usize
    where
        T: Tracer,
        S: ArtifactSource,
    {
        let path = req.path.display();
        let remote;
        let parent = match usable_parent(req.parent) {
            Some(parent) => parent,
            None => match self.correlation_parent() {
                Some(Ok(cx)) => {
                    remote = cx;
                    &remote
                }
                Some(Err(err)) => {
                    warn!(path = %path, error = %err, "unusable correlation ids, skipping k6 ndjson spans");
                    return 0;
                }
                None => {
                    warn!(path = %path, "no parent trace context, skipping k6 ndjson spans");
                    return 0;
                }
            },
        };

        let reader = match source.open_stream(req.path).await {
            Ok(reader) => reader,
            Err(err) => {
                warn!(path = %path, error = %err, "k6 ndjson output unreadable");
                return 0;
            }
        };
        let Aggregation {
            aggregates,
            malformed_lines,
        } = aggregate_stream(reader, &self.options).await;

        let mut emitter = Emitter::new(tracer, parent, req.telemetry)
            .with_common_attrs(self.correlation_attrs());
        self.emit_all(&mut emitter, &aggregates);

        info!(
            path = %path,
            points = aggregates.points,
            malformed_lines,
            endpoints = aggregates.endpoints.len(),
            spans = emitter.emitted(),
            "synthesized k6 ndjson spans"
        );
        emitter.emitted()
    }

    fn correlation_parent(&self) -> Option<Result<Context>> {
        self.correlation
            .as_ref()
            .map(|(trace_id, span_id)| remote_parent(trace_id, span_id))
    }

    fn correlation_attrs(&self) -> Vec<KeyValue> {
        match &self.correlation {
            Some((trace_id, span_id)) => vec![
                KeyValue::new("k6.correlation.trace_id", trace_id.as_str().to_string()),
                KeyValue::new("k6.correlation.span_id", span_id.as_str().to_string()),
            ],
            None => Vec::new(),
        }
    }

    fn emit_all<T: Tracer>(&self, emitter: &mut Emitter<'_, T>, agg: &StreamAggregates) {
        if self.options.aggregate_by_endpoint {
            for (key, endpoint) in &agg.endpoints {
                emitter.emit_with(key, || endpoint_span(endpoint));
            }
        }

        if self.options.include_scenarios {
            for (name, scenario) in &agg.scenarios {
                emitter.emit_with(name, || scenario_span(scenario));
            }
        }

        if self.options.include_checks
            && let Some(last) = agg.last_seen
        {
            let first = self.test_start.or(agg.first_seen).unwrap_or(last);
            for (name, check) in &agg.checks {
                emitter.emit_with(name, || Ok(check_span(name, check, first, last)));
            }
        }

        for (rank, sample) in agg.slow_requests.iter().enumerate() {
            emitter.emit_with(&sample.url, || slow_request_span(rank + 1, sample));
        }

        if self.options.sample_failed_requests {
            for sample in &agg.failed_requests {
                emitter.emit_with(&sample.url, || failed_request_span(sample));
            }
        }
    }
}

fn endpoint_span(endpoint: &EndpointAggregate) -> Result<SpanDraft> {
    let (start, end) = observed_window(endpoint.first_seen, endpoint.last_seen, endpoint.max_ms)?;
    let status_counts = endpoint.status_counts.iter().map(|(code, count)| {
        KeyValue::new(format!("k6.http.status.{code}"), *count as i64)
    });

    let draft = SpanDraft::new(format!("K6 HTTP {} {}", endpoint.method, endpoint.url), start, end)
        .kind(SpanKind::Client)
        .attr("http.request.method", endpoint.method.clone())
        .attr("k6.endpoint", endpoint.url.clone())
        .attr("k6.http.requests", endpoint.count as i64)
        .attr("k6.http.duration_avg_ms", endpoint.avg_ms())
        .attr("k6.http.duration_min_ms", endpoint.min_ms)
        .attr("k6.http.duration_max_ms", endpoint.max_ms)
        .attr("k6.http.duration_p95_ms", endpoint.p95_ms)
        .attr("k6.http.duration_p99_ms", endpoint.p99_ms)
        .attr("k6.http.errors", endpoint.errors as i64)
        .attr("k6.http.error_rate", endpoint.error_rate())
        .attrs(status_counts);

    let rate = endpoint.error_rate();
    Ok(if rate > ENDPOINT_ERROR_RATE_THRESHOLD {
        draft.status(Status::error(format!(
            "{:.1}% of requests failed ({} of {})",
            rate * 100.0,
            endpoint.errors,
            endpoint.count
        )))
    } else if endpoint.errors > 0 {
        draft.ok_with_message(format!(
            "{} of {} requests failed",
            endpoint.errors, endpoint.count
        ))
    } else {
        draft.status(Status::Ok)
    })
}

fn scenario_span(scenario: &ScenarioAggregate) -> Result<SpanDraft> {
    let (start, end) =
        observed_window(scenario.first_seen, scenario.last_seen, scenario.avg_ms())?;
    Ok(SpanDraft::new(format!("K6 Scenario: {}", scenario.name), start, end)
        .attr("k6.scenario.name", scenario.name.clone())
        .attr("k6.scenario.iterations", scenario.iterations as i64)
        .attr("k6.scenario.duration_avg_ms", scenario.avg_ms())
        .attr("k6.scenario.duration_total_ms", scenario.total_ms)
        .status(Status::Ok))
}

fn check_span(
    name: &str,
    check: &CheckAggregate,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> SpanDraft {
    let draft = SpanDraft::new(format!("K6 Check: {name}"), start, end)
        .attr("k6.check.name", name.to_string())
        .attr("k6.check.passes", check.passes as i64)
        .attr("k6.check.fails", check.fails as i64)
        .attr("k6.check.total", check.total() as i64)
        .attr("k6.check.pass_rate", check.pass_rate());
    if check.fails > 0 {
        draft.status(Status::error(format!(
            "{} of {} checks failed",
            check.fails,
            check.total()
        )))
    } else {
        draft.status(Status::Ok)
    }
}

fn request_draft(kind: &str, sample: &RequestSample) -> Result<SpanDraft> {
    let end = add_millis(sample.ts, sample.duration_ms.max(0.0))?;
    Ok(SpanDraft::new(
        format!("K6 {kind} Request: {} {}", sample.method, sample.endpoint),
        sample.ts,
        end,
    )
    .kind(SpanKind::Client)
    .attr("http.request.method", sample.method.clone())
    .attr("url.full", sample.url.clone())
    .attr("k6.endpoint", sample.endpoint.clone())
    .attr("k6.request.duration_ms", sample.duration_ms)
    .attr_opt(
        "http.response.status_code",
        sample.status.map(i64::from),
    ))
}

fn slow_request_span(rank: usize, sample: &RequestSample) -> Result<SpanDraft> {
    let draft = request_draft("Slow", sample)?
        .attr("k6.sample", "slow")
        .attr("k6.sample.rank", rank as i64);
    Ok(match sample.status {
        Some(code) if code >= 400 => draft.status(Status::error(format!("HTTP {code}"))),
        _ => draft.status(Status::Ok),
    })
}

fn failed_request_span(sample: &RequestSample) -> Result<SpanDraft> {
    let code = sample.status.unwrap_or_default();
    Ok(request_draft("Failed", sample)?
        .attr("k6.sample", "failed")
        .attr("k6.request.duration_nominal", true)
        .status(Status::error(format!("HTTP {code}"))))
}
