//! One span per Playwright test.
//!
//! Timing comes from per-attempt `startTime` when the reporter wrote it.
//! Otherwise tests are laid end to end from the report's `stats.startTime`,
//! each advancing a cursor by its total attempt duration. That is an estimate
//! (parallel workers overlap in reality) and such spans carry
//! `test.timing = "estimated"`.

use chrono::{DateTime, Utc};
use opentelemetry::trace::{SpanKind, Status, Tracer};
use spansynth_core::Result;
use spansynth_core::config::PlaywrightShape;
use spansynth_core::model::playwright::{
    PlaywrightReport, Suite, TestAttempt, TestError, TestNode, TestStatus,
};
use spansynth_core::time::{add_millis, parse_timestamp};
use tracing::{debug, error, info, warn};

use crate::SynthesisRequest;
use crate::emit::{Emitter, ExceptionInfo, SpanDraft};
use crate::parent::usable_parent;
use crate::source::ArtifactSource;

#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    pub status: TestStatus,
    pub duration_ms: f64,
    pub start: Option<DateTime<Utc>>,
    pub retry: u32,
    pub error: Option<TestError>,
}

/// A test flattened out of the suite tree, with all of its attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafTest {
    pub title: String,
    pub suite_path: Vec<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub project: Option<String>,
    pub expected_status: Option<String>,
    pub annotations: usize,
    pub attempts: Vec<Attempt>,
}

impl LeafTest {
    /// Final outcome. A pass after more than one attempt is flaky; a test
    /// that never ran counts as skipped.
    pub fn status(&self) -> TestStatus {
        let Some(last) = self.attempts.last() else {
            return TestStatus::Skipped;
        };
        if self.attempts.len() > 1 && last.status == TestStatus::Passed {
            TestStatus::Flaky
        } else {
            last.status
        }
    }

    pub fn full_title(&self) -> String {
        self.suite_path
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.title.as_str()))
            .collect::<Vec<_>>()
            .join(" > ")
    }

    pub fn total_duration_ms(&self) -> f64 {
        self.attempts.iter().map(|a| a.duration_ms.max(0.0)).sum()
    }

    fn has_reported_start(&self) -> bool {
        self.attempts.iter().any(|a| a.start.is_some())
    }
}

#[derive(Debug, Clone)]
pub struct PlaywrightSynthesizer {
    shape: PlaywrightShape,
    now: Option<DateTime<Utc>>,
}

impl Default for PlaywrightSynthesizer {
    fn default() -> Self {
        Self::new(PlaywrightShape::Auto)
    }
}

impl PlaywrightSynthesizer {
    pub fn new(shape: PlaywrightShape) -> Self {
        Self { shape, now: None }
    }

    /// Fixes the time used when a report has neither attempt start times nor
    /// `stats.startTime`.
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
            warn!(path = %path, "no parent trace context, skipping playwright spans");
            return 0;
        };

        let raw = match source.read_to_string(req.path).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(path = %path, error = %err, "playwright report unreadable");
                return 0;
            }
        };
        let report: PlaywrightReport = match serde_json::from_str(&raw) {
            Ok(report) => report,
            Err(err) => {
                error!(path = %path, error = %err, "playwright report is not valid json");
                return 0;
            }
        };

        let tests = flatten_report(&report, self.shape);
        let mut cursor = report_start(&report)
            .or(self.now)
            .unwrap_or_else(Utc::now);
        let mut emitter = Emitter::new(tracer, parent, req.telemetry);
        for test in &tests {
            emitter.emit_with(&test.full_title(), || test_span(test, &mut cursor));
        }

        info!(
            path = %path,
            tests = tests.len(),
            spans = emitter.emitted(),
            "synthesized playwright spans"
        );
        emitter.emitted()
    }
}

fn report_start(report: &PlaywrightReport) -> Option<DateTime<Utc>> {
    let raw = report.stats.as_ref()?.start_time.as_deref()?;
    parse_timestamp(raw)
        .inspect_err(|err| debug!(error = %err, "ignoring report start time"))
        .ok()
}

/// Flattens the suite tree in report order: a suite's specs, then its own
/// flat tests, then its child suites.
pub fn flatten_report(report: &PlaywrightReport, shape: PlaywrightShape) -> Vec<LeafTest> {
    let mut out = Vec::new();
    for suite in &report.suites {
        flatten_suite(suite, &[], None, shape, &mut out);
    }
    out
}

#[derive(Debug, Clone)]
struct Provenance<'a> {
    suite_path: &'a [String],
    file: Option<&'a str>,
    line: Option<u32>,
    column: Option<u32>,
}

fn flatten_suite(
    suite: &Suite,
    parent_path: &[String],
    inherited_file: Option<&str>,
    shape: PlaywrightShape,
    out: &mut Vec<LeafTest>,
) {
    let mut path = parent_path.to_vec();
    if let Some(title) = suite.title.as_deref().filter(|t| !t.is_empty()) {
        path.push(title.to_string());
    }
    let file = suite.file.as_deref().or(inherited_file);

    for spec in &suite.specs {
        let provenance = Provenance {
            suite_path: &path,
            file: spec.file.as_deref().or(file),
            line: spec.line.or(suite.line),
            column: spec.column.or(suite.column),
        };
        let title = spec.title.as_deref().unwrap_or("untitled");
        collect_nodes(&spec.tests, title, &provenance, shape, out);
    }

    let provenance = Provenance {
        suite_path: &path,
        file,
        line: suite.line,
        column: suite.column,
    };
    collect_nodes(&suite.tests, "untitled", &provenance, shape, out);

    for child in &suite.suites {
        flatten_suite(child, &path, file, shape, out);
    }
}

fn uses_results(node: &TestNode, shape: PlaywrightShape) -> bool {
    match shape {
        PlaywrightShape::Results => true,
        PlaywrightShape::Flat => false,
        PlaywrightShape::Auto => node.results.is_some() || node.status.is_none(),
    }
}

/// Nodes with `results` become one leaf each, as do nodes carrying neither
/// `results` nor `status` (zero attempts). Flat nodes are attempts and
/// are folded by title and project, ordered by `retry`.
fn collect_nodes(
    nodes: &[TestNode],
    default_title: &str,
    provenance: &Provenance<'_>,
    shape: PlaywrightShape,
    out: &mut Vec<LeafTest>,
) {
    let mut folded: Vec<LeafTest> = Vec::new();

    for node in nodes {
        let title = node.title.as_deref().unwrap_or(default_title);
        if uses_results(node, shape) {
            let attempts = node
                .results
                .as_deref()
                .unwrap_or_default()
                .iter()
                .enumerate()
                .map(|(idx, result)| attempt_from_result(idx, result))
                .collect();
            out.push(new_leaf(title, node, provenance, attempts));
            continue;
        }

        let attempt = attempt_from_flat(folded_len(&folded, title, node), node);
        match folded
            .iter_mut()
            .find(|leaf| leaf.title == title && leaf.project == node.project_name)
        {
            Some(leaf) => leaf.attempts.push(attempt),
            None => folded.push(new_leaf(title, node, provenance, vec![attempt])),
        }
    }

    for leaf in &mut folded {
        leaf.attempts.sort_by_key(|a| a.retry);
    }
    out.extend(folded);
}

fn folded_len(folded: &[LeafTest], title: &str, node: &TestNode) -> usize {
    folded
        .iter()
        .find(|leaf| leaf.title == title && leaf.project == node.project_name)
        .map_or(0, |leaf| leaf.attempts.len())
}

fn new_leaf(
    title: &str,
    node: &TestNode,
    provenance: &Provenance<'_>,
    attempts: Vec<Attempt>,
) -> LeafTest {
    LeafTest {
        title: title.to_string(),
        suite_path: provenance.suite_path.to_vec(),
        file: provenance.file.map(str::to_string),
        line: provenance.line,
        column: provenance.column,
        project: node.project_name.clone(),
        expected_status: node.expected_status.clone(),
        annotations: node.annotations.len(),
        attempts,
    }
}

fn attempt_from_result(idx: usize, result: &TestAttempt) -> Attempt {
    Attempt {
        status: TestStatus::from_attempt(result.status.as_deref()),
        duration_ms: result.duration.unwrap_or(0.0),
        start: parse_attempt_start(result.start_time.as_deref()),
        retry: result.retry.unwrap_or(idx as u32),
        error: result.primary_error().cloned(),
    }
}

fn attempt_from_flat(position: usize, node: &TestNode) -> Attempt {
    Attempt {
        status: TestStatus::from_attempt(node.status.as_deref()),
        duration_ms: node.duration.unwrap_or(0.0),
        start: parse_attempt_start(node.start_time.as_deref()),
        retry: node.retry.unwrap_or(position as u32),
        error: node.errors.first().cloned(),
    }
}

fn parse_attempt_start(raw: Option<&str>) -> Option<DateTime<Utc>> {
    parse_timestamp(raw?)
        .inspect_err(|err| debug!(error = %err, "ignoring attempt start time"))
        .ok()
}

/// Start and end of a test. Attempts with a reported start use it; the rest
/// follow the previous attempt, beginning at `cursor`. The cursor is moved to
/// the end of the test.
fn test_window(
    test: &LeafTest,
    cursor: &mut DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let mut window: Option<(DateTime<Utc>, DateTime<Utc>)> = None;
    let mut next = *cursor;
    for attempt in &test.attempts {
        let start = attempt.start.unwrap_or(next);
        let end = add_millis(start, attempt.duration_ms.max(0.0))?;
        window = Some(match window {
            Some((s, e)) => (s.min(start), e.max(end)),
            None => (start, end),
        });
        next = end;
    }

    let (start, end) = window.unwrap_or((*cursor, *cursor));
    *cursor = (*cursor).max(end);
    Ok((start, end))
}

fn test_span(test: &LeafTest, cursor: &mut DateTime<Utc>) -> Result<SpanDraft> {
    let (start, end) = test_window(test, cursor)?;
    let status = test.status();
    let attempts = test.attempts.len();

    let mut draft = SpanDraft::new(format!("Test: {}", test.title), start, end)
        .kind(SpanKind::Internal)
        .attr("test.title", test.title.clone())
        .attr("test.full_title", test.full_title())
        .attr("test.suite", test.suite_path.join(" > "))
        .attr("test.status", status.as_str())
        .attr("test.duration_ms", test.total_duration_ms())
        .attr("test.attempts", attempts as i64)
        .attr("test.retries", attempts.saturating_sub(1) as i64)
        .attr("test.flaky", status == TestStatus::Flaky)
        .attr("test.annotations", test.annotations as i64)
        .attr(
            "test.timing",
            if test.has_reported_start() {
                "reported"
            } else {
                "estimated"
            },
        )
        .attr_opt("test.file", test.file.clone())
        .attr_opt("test.line", test.line.map(i64::from))
        .attr_opt("test.column", test.column.map(i64::from))
        .attr_opt("test.project", test.project.clone())
        .attr_opt("test.expected_status", test.expected_status.clone());

    draft = match status {
        TestStatus::Passed | TestStatus::Flaky => draft.status(Status::Ok),
        TestStatus::Skipped => draft,
        other => draft.status(Status::error(other.as_str())),
    };

    let final_error = test.attempts.last().and_then(|a| a.error.as_ref());
    if let (true, Some(err)) = (status.is_failure(), final_error) {
        let message = err
            .message
            .clone()
            .unwrap_or_else(|| status.as_str().to_string());
        draft = draft
            .attr("test.error.message", message.clone())
            .exception(ExceptionInfo {
                kind: "PlaywrightTestFailure".to_string(),
                message,
                stacktrace: err.stack.clone(),
            });
    }

    Ok(draft)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use testkit::{TracerHarness, attr_bool, attr_i64, attr_str, write_json};

    use super::*;
    use crate::source::FsArtifacts;
    use crate::source::testing::CountingSource;

    fn report_from(value: serde_json::Value) -> PlaywrightReport {
        serde_json::from_value(value).unwrap()
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn nested_report() -> serde_json::Value {
        json!({
            "stats": {"startTime": "2026-03-01T12:00:00Z", "duration": 900},
            "suites": [{
                "title": "auth.spec.ts",
                "file": "auth.spec.ts",
                "line": 1,
                "column": 1,
                "specs": [
                    {
                        "title": "logs in",
                        "line": 4,
                        "column": 5,
                        "tests": [{
                            "projectName": "chromium",
                            "results": [
                                {"status": "failed", "duration": 100, "errors": [{"message": "timeout 1"}]},
                                {"status": "passed", "duration": 50}
                            ]
                        }]
                    },
                    {
                        "title": "rejects bad password",
                        "line": 12,
                        "tests": [{
                            "projectName": "chromium",
                            "results": [{
                                "status": "failed",
                                "duration": 200,
                                "errors": [{"message": "expected 401", "stack": "at auth.spec.ts:14"}]
                            }]
                        }]
                    }
                ],
                "suites": [{
                    "title": "sso",
                    "specs": [{
                        "title": "redirects",
                        "line": 30,
                        "tests": [{
                            "projectName": "chromium",
                            "results": [{"status": "skipped", "duration": 0}]
                        }]
                    }]
                }]
            }]
        })
    }

    #[test]
    fn retry_that_passes_is_flaky() {
        let report = report_from(nested_report());
        let tests = flatten_report(&report, PlaywrightShape::Auto);
        assert_eq!(tests.len(), 3);
        assert_eq!(tests[0].status(), TestStatus::Flaky);
        assert_eq!(tests[1].status(), TestStatus::Failed);
        assert_eq!(tests[2].status(), TestStatus::Skipped);
    }

    #[test]
    fn single_pass_is_passed() {
        let report = report_from(json!({"suites": [{"title": "a", "specs": [{
            "title": "ok", "tests": [{"results": [{"status": "passed", "duration": 5}]}]
        }]}]}));
        let tests = flatten_report(&report, PlaywrightShape::Auto);
        assert_eq!(tests[0].status(), TestStatus::Passed);
    }

    #[test]
    fn provenance_comes_from_owning_suite() {
        let report = report_from(nested_report());
        let tests = flatten_report(&report, PlaywrightShape::Auto);

        assert_eq!(tests[0].file.as_deref(), Some("auth.spec.ts"));
        assert_eq!((tests[0].line, tests[0].column), (Some(4), Some(5)));
        assert_eq!((tests[1].line, tests[1].column), (Some(12), Some(1)));

        let nested = &tests[2];
        assert_eq!(nested.suite_path, vec!["auth.spec.ts", "sso"]);
        assert_eq!(nested.file.as_deref(), Some("auth.spec.ts"));
        assert_eq!(nested.full_title(), "auth.spec.ts > sso > redirects");
    }

    #[test]
    fn flat_attempts_fold_by_retry() {
        let report = report_from(json!({"suites": [{
            "title": "checkout",
            "file": "checkout.spec.ts",
            "tests": [
                {"title": "pays", "status": "passed", "duration": 30, "retry": 1},
                {"title": "refunds", "status": "timedOut", "duration": 500, "retry": 0},
                {"title": "pays", "status": "failed", "duration": 40, "retry": 0, "errors": [{"message": "card declined"}]}
            ]
        }]}));
        let tests = flatten_report(&report, PlaywrightShape::Auto);
        assert_eq!(tests.len(), 2);

        let pays = &tests[0];
        assert_eq!(pays.title, "pays");
        assert_eq!(
            pays.attempts.iter().map(|a| a.retry).collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert_eq!(pays.status(), TestStatus::Flaky);
        assert_eq!(tests[1].status(), TestStatus::TimedOut);
    }

    #[test]
    fn forced_shape_overrides_detection() {
        let report = report_from(json!({"suites": [{"title": "s", "tests": [
            {"title": "t", "status": "passed", "duration": 3, "retry": 0}
        ]}]}));
        let forced = flatten_report(&report, PlaywrightShape::Results);
        assert_eq!(forced.len(), 1);
        assert!(forced[0].attempts.is_empty());
        assert_eq!(forced[0].status(), TestStatus::Skipped);
    }

    #[test]
    fn statusless_node_has_no_attempts() {
        let report = report_from(json!({"suites": [{"title": "s", "tests": [
            {"title": "pending", "duration": 0},
            {"title": "ran", "status": "passed", "duration": 3, "retry": 0}
        ]}]}));
        let tests = flatten_report(&report, PlaywrightShape::Auto);
        assert_eq!(tests.len(), 2);
        assert_eq!(tests[0].title, "pending");
        assert!(tests[0].attempts.is_empty());
        assert_eq!(tests[0].status(), TestStatus::Skipped);
        assert_eq!(tests[1].status(), TestStatus::Passed);
    }

    #[test]
    fn cursor_lays_tests_end_to_end() {
        let report = report_from(nested_report());
        let tests = flatten_report(&report, PlaywrightShape::Auto);
        let mut cursor = base();

        let (s0, e0) = test_window(&tests[0], &mut cursor).unwrap();
        assert_eq!(s0, base());
        assert_eq!(e0, base() + Duration::milliseconds(150));

        let (s1, e1) = test_window(&tests[1], &mut cursor).unwrap();
        assert_eq!(s1, e0);
        assert_eq!(e1, s1 + Duration::milliseconds(200));
        assert_eq!(cursor, e1);
    }

    #[test]
    fn reported_start_wins_over_cursor() {
        let report = report_from(json!({"suites": [{"title": "s", "specs": [{
            "title": "t",
            "tests": [{"results": [
                {"status": "passed", "duration": 20, "startTime": "2026-03-01T13:00:00Z"}
            ]}]
        }]}]}));
        let tests = flatten_report(&report, PlaywrightShape::Auto);
        let mut cursor = base();
        let (start, end) = test_window(&tests[0], &mut cursor).unwrap();
        assert_eq!(start, base() + Duration::hours(1));
        assert_eq!(end, start + Duration::milliseconds(20));
        assert_eq!(cursor, end);
    }

    #[tokio::test]
    async fn emits_one_span_per_test() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_json(dir.path(), "report.json", &nested_report());
        let harness = TracerHarness::new();
        let parent = harness.parent();
        let ctx = spansynth_core::model::context::TelemetryContext::for_run("run-42");

        let count = PlaywrightSynthesizer::default()
            .synthesize(
                harness.tracer(),
                &FsArtifacts,
                SynthesisRequest::new(&path)
                    .with_telemetry(&ctx)
                    .with_parent(&parent),
            )
            .await;
        assert_eq!(count, 3);

        let spans = harness.finished();
        assert_eq!(spans.len(), 3);

        let flaky = &spans[0];
        assert_eq!(flaky.name, "Test: logs in");
        assert_eq!(flaky.status, Status::Ok);
        assert_eq!(attr_str(flaky, "test.status").as_deref(), Some("flaky"));
        assert_eq!(attr_bool(flaky, "test.flaky"), Some(true));
        assert_eq!(attr_i64(flaky, "test.retries"), Some(1));
        assert_eq!(attr_str(flaky, "supercheck.run_id").as_deref(), Some("run-42"));
        assert!(flaky.events.events.is_empty());

        let failed = &spans[1];
        assert_eq!(failed.status, Status::error("failed"));
        assert_eq!(failed.events.events.len(), 1);
        assert_eq!(
            attr_str(failed, "test.error.message").as_deref(),
            Some("expected 401")
        );

        let skipped = &spans[2];
        assert_eq!(skipped.status, Status::Unset);
    }

    #[tokio::test]
    async fn no_parent_skips_without_reading() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_json(dir.path(), "report.json", &nested_report());
        let harness = TracerHarness::new();
        let source = CountingSource::default();
        let empty = opentelemetry::Context::new();

        let without = PlaywrightSynthesizer::default()
            .synthesize(harness.tracer(), &source, SynthesisRequest::new(&path))
            .await;
        let invalid = PlaywrightSynthesizer::default()
            .synthesize(
                harness.tracer(),
                &source,
                SynthesisRequest::new(&path).with_parent(&empty),
            )
            .await;

        assert_eq!((without, invalid), (0, 0));
        assert_eq!(source.reads(), 0);
        assert!(harness.finished().is_empty());
    }

    #[tokio::test]
    async fn unreadable_or_malformed_report_yields_zero() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{\"suites\": [").unwrap();
        let missing = dir.path().join("missing.json");
        let harness = TracerHarness::new();
        let parent = harness.parent();

        for path in [&broken, &missing] {
            let count = PlaywrightSynthesizer::default()
                .synthesize(
                    harness.tracer(),
                    &FsArtifacts,
                    SynthesisRequest::new(path).with_parent(&parent),
                )
                .await;
            assert_eq!(count, 0);
        }
        assert!(harness.finished().is_empty());
    }

    #[tokio::test]
    async fn overflowing_duration_only_drops_that_test() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_json(
            dir.path(),
            "report.json",
            &json!({"suites": [{"title": "s", "specs": [
                {"title": "huge", "tests": [{"results": [{"status": "passed", "duration": 1e300}]}]},
                {"title": "fine", "tests": [{"results": [{"status": "passed", "duration": 10}]}]}
            ]}]}),
        );
        let harness = TracerHarness::new();
        let parent = harness.parent();

        let count = PlaywrightSynthesizer::default()
            .with_clock(base())
            .synthesize(
                harness.tracer(),
                &FsArtifacts,
                SynthesisRequest::new(&path).with_parent(&parent),
            )
            .await;
        assert_eq!(count, 1);
        assert_eq!(harness.finished()[0].name, "Test: fine");
    }
}
