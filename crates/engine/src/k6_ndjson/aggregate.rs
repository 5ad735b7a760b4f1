use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};

use chrono::{DateTime, Utc};
use futures::{StreamExt, pin_mut};
use spansynth_core::config::NdjsonOptions;
use spansynth_core::model::k6::PointTags;
use spansynth_core::time::parse_timestamp;
use tokio::io::AsyncBufRead;
use tracing::debug;

use super::stream::{MetricPoint, points};
use crate::normalize::normalize_url;
use crate::stats::{percentile, sort_samples};

/// Every HTTP request to one `METHOD normalized-url` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointAggregate {
    pub method: String,
    pub url: String,
    pub count: u64,
    pub sum_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    /// Ascending once aggregation has finished.
    pub durations: Vec<f64>,
    pub status_counts: BTreeMap<u16, u64>,
    pub errors: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl EndpointAggregate {
    fn new(method: String, url: String, ts: DateTime<Utc>) -> Self {
        Self {
            method,
            url,
            count: 0,
            sum_ms: 0.0,
            min_ms: f64::INFINITY,
            max_ms: f64::NEG_INFINITY,
            durations: Vec::new(),
            status_counts: BTreeMap::new(),
            errors: 0,
            first_seen: ts,
            last_seen: ts,
            p95_ms: 0.0,
            p99_ms: 0.0,
        }
    }

    fn record(&mut self, duration_ms: f64, status: Option<u16>, ts: DateTime<Utc>) {
        self.count += 1;
        self.sum_ms += duration_ms;
        self.min_ms = self.min_ms.min(duration_ms);
        self.max_ms = self.max_ms.max(duration_ms);
        self.durations.push(duration_ms);
        if let Some(code) = status {
            *self.status_counts.entry(code).or_default() += 1;
            if code >= 400 {
                self.errors += 1;
            }
        }
        self.first_seen = self.first_seen.min(ts);
        self.last_seen = self.last_seen.max(ts);
    }

    fn finish(&mut self) {
        sort_samples(&mut self.durations);
        self.p95_ms = percentile(&self.durations, 95.0);
        self.p99_ms = percentile(&self.durations, 99.0);
    }

    pub fn avg_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_ms / self.count as f64
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.errors as f64 / self.count as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioAggregate {
    pub name: String,
    pub iterations: u64,
    pub total_ms: f64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl ScenarioAggregate {
    pub fn avg_ms(&self) -> f64 {
        if self.iterations == 0 {
            0.0
        } else {
            self.total_ms / self.iterations as f64
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckAggregate {
    pub passes: u64,
    pub fails: u64,
}

impl CheckAggregate {
    pub fn total(&self) -> u64 {
        self.passes + self.fails
    }

    pub fn pass_rate(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.passes as f64 / total as f64,
        }
    }
}

/// One individual request kept for its own span.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSample {
    /// Position among the requests of the stream.
    pub seq: u64,
    pub method: String,
    pub url: String,
    pub endpoint: String,
    pub status: Option<u16>,
    pub duration_ms: f64,
    pub ts: DateTime<Utc>,
}

/// Orders samples by duration, then earlier requests above later ones.
#[derive(Debug)]
struct BySlowness(RequestSample);

impl PartialEq for BySlowness {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for BySlowness {}

impl PartialOrd for BySlowness {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BySlowness {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .duration_ms
            .total_cmp(&other.0.duration_ms)
            .then_with(|| other.0.seq.cmp(&self.0.seq))
    }
}

/// Keeps the `limit` slowest requests seen so far.
#[derive(Debug)]
struct SlowestRequests {
    limit: usize,
    heap: BinaryHeap<Reverse<BySlowness>>,
}

impl SlowestRequests {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            heap: BinaryHeap::with_capacity(limit.saturating_add(1).min(1024)),
        }
    }

    fn offer(&mut self, sample: RequestSample) {
        if self.limit == 0 {
            return;
        }
        let candidate = BySlowness(sample);
        if self.heap.len() < self.limit {
            self.heap.push(Reverse(candidate));
            return;
        }
        if let Some(Reverse(floor)) = self.heap.peek()
            && candidate > *floor
        {
            self.heap.pop();
            self.heap.push(Reverse(candidate));
        }
    }

    /// Slowest first.
    fn into_sorted(self) -> Vec<RequestSample> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|Reverse(BySlowness(sample))| sample)
            .collect()
    }
}

/// Everything the span emission needs from one NDJSON stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamAggregates {
    /// Keyed by `METHOD:normalized-url`.
    pub endpoints: BTreeMap<String, EndpointAggregate>,
    pub scenarios: BTreeMap<String, ScenarioAggregate>,
    pub checks: BTreeMap<String, CheckAggregate>,
    pub slow_requests: Vec<RequestSample>,
    pub failed_requests: Vec<RequestSample>,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub points: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregation {
    pub aggregates: StreamAggregates,
    pub malformed_lines: usize,
}

/// Folds metric points into [`StreamAggregates`], honoring the enabled
/// categories so disabled ones cost nothing.
#[derive(Debug)]
pub struct Aggregator {
    options: NdjsonOptions,
    acc: StreamAggregates,
    slowest: SlowestRequests,
    requests: u64,
}

impl Aggregator {
    pub fn new(options: &NdjsonOptions) -> Self {
        Self {
            options: options.clone(),
            acc: StreamAggregates::default(),
            slowest: SlowestRequests::new(options.sample_slow_requests),
            requests: 0,
        }
    }

    pub fn observe(&mut self, point: MetricPoint) {
        let ts = match parse_timestamp(&point.data.time) {
            Ok(ts) => ts,
            Err(err) => {
                debug!(metric = %point.metric, error = %err, "skipping point with bad time");
                return;
            }
        };
        self.acc.points += 1;
        self.acc.first_seen = Some(self.acc.first_seen.map_or(ts, |first| first.min(ts)));
        self.acc.last_seen = Some(self.acc.last_seen.map_or(ts, |last| last.max(ts)));

        let tags = point.data.tags.unwrap_or_default();
        let value = point.data.value;
        match point.metric.as_str() {
            "http_req_duration" => self.observe_request(value, &tags, ts),
            "iteration_duration" if self.options.include_scenarios => {
                if let Some(name) = tags.scenario {
                    let scenario = self
                        .acc
                        .scenarios
                        .entry(name.clone())
                        .or_insert_with(|| ScenarioAggregate {
                            name,
                            iterations: 0,
                            total_ms: 0.0,
                            first_seen: ts,
                            last_seen: ts,
                        });
                    scenario.iterations += 1;
                    scenario.total_ms += value;
                    scenario.first_seen = scenario.first_seen.min(ts);
                    scenario.last_seen = scenario.last_seen.max(ts);
                }
            }
            "checks" if self.options.include_checks => {
                if let Some(name) = tags.check {
                    let check = self.acc.checks.entry(name).or_default();
                    if value == 1.0 {
                        check.passes += 1;
                    } else {
                        check.fails += 1;
                    }
                }
            }
            _ => {}
        }
    }

    fn observe_request(&mut self, duration_ms: f64, tags: &PointTags, ts: DateTime<Utc>) {
        let seq = self.requests;
        self.requests += 1;
        let status = tags.status_code();
        let (method, url, endpoint) = request_identity(tags);

        if self.options.aggregate_by_endpoint {
            let key = format!("{method}:{endpoint}");
            self.acc
                .endpoints
                .entry(key)
                .or_insert_with(|| EndpointAggregate::new(method.clone(), endpoint.clone(), ts))
                .record(duration_ms, status, ts);
        }

        if self.options.sample_failed_requests && status.is_some_and(|code| code >= 400) {
            self.acc.failed_requests.push(RequestSample {
                seq,
                method: method.clone(),
                url: url.clone(),
                endpoint: endpoint.clone(),
                status,
                duration_ms: super::FAILED_REQUEST_NOMINAL_MS,
                ts,
            });
        }

        self.slowest.offer(RequestSample {
            seq,
            method,
            url,
            endpoint,
            status,
            duration_ms,
            ts,
        });
    }

    pub fn finish(mut self) -> StreamAggregates {
        for endpoint in self.acc.endpoints.values_mut() {
            endpoint.finish();
        }
        self.acc.slow_requests = self.slowest.into_sorted();
        self.acc
    }
}

/// Method, raw URL and normalized URL of a request point.
fn request_identity(tags: &PointTags) -> (String, String, String) {
    let method = tags
        .method
        .as_deref()
        .map(str::to_ascii_uppercase)
        .unwrap_or_else(|| "UNKNOWN".to_string());
    let url = tags.request_url().unwrap_or("unknown").to_string();
    let endpoint = normalize_url(&url);
    (method, url, endpoint)
}

/// Reads the whole stream line by line and aggregates it.
pub async fn aggregate_stream<R>(reader: R, options: &NdjsonOptions) -> Aggregation
where
    R: AsyncBufRead + Unpin,
{
    let mut aggregator = Aggregator::new(options);
    let mut malformed_lines = 0;

    let lines = points(reader);
    pin_mut!(lines);
    while let Some(item) = lines.next().await {
        match item {
            Ok(point) => aggregator.observe(point),
            Err(bad) => {
                debug!(line = bad.line, reason = %bad.reason, "skipping malformed ndjson line");
                malformed_lines += 1;
            }
        }
    }

    Aggregation {
        aggregates: aggregator.finish(),
        malformed_lines,
    }
}
