//! Playwright JSON reporter output.
//!
//! Two layouts reach the worker. The stock JSON reporter nests
//! `suites -> specs -> tests -> results` with one result per attempt. Older
//! custom reporters write `suites -> tests` with `status`, `duration` and a
//! `retry` counter directly on each attempt. Both are modelled by the same
//! permissive types; unknown fields are ignored.

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaywrightReport {
    #[serde(default)]
    pub suites: Vec<Suite>,
    #[serde(default)]
    pub stats: Option<ReportStats>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportStats {
    pub start_time: Option<String>,
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suite {
    pub title: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    #[serde(default)]
    pub specs: Vec<Spec>,
    #[serde(default)]
    pub suites: Vec<Suite>,
    #[serde(default)]
    pub tests: Vec<TestNode>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spec {
    pub title: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    #[serde(default)]
    pub tests: Vec<TestNode>,
}

/// A test entry in either layout.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestNode {
    pub title: Option<String>,
    pub project_name: Option<String>,
    pub expected_status: Option<String>,
    pub status: Option<String>,
    pub duration: Option<f64>,
    pub retry: Option<u32>,
    pub start_time: Option<String>,
    #[serde(default)]
    pub errors: Vec<TestError>,
    pub results: Option<Vec<TestAttempt>>,
    #[serde(default)]
    pub annotations: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestAttempt {
    pub status: Option<String>,
    pub duration: Option<f64>,
    pub start_time: Option<String>,
    pub retry: Option<u32>,
    #[serde(default)]
    pub errors: Vec<TestError>,
    pub error: Option<TestError>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct TestError {
    pub message: Option<String>,
    pub stack: Option<String>,
}

impl TestAttempt {
    /// First reported error, preferring the `errors` list over the legacy `error` field.
    pub fn primary_error(&self) -> Option<&TestError> {
        self.errors.first().or(self.error.as_ref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    Passed,
    Failed,
    TimedOut,
    Skipped,
    Flaky,
}

impl TestStatus {
    /// Maps a raw attempt status. Anything unrecognised, including
    /// `interrupted`, counts as a failure.
    pub fn from_attempt(raw: Option<&str>) -> Self {
        match raw {
            Some("passed") | Some("expected") => Self::Passed,
            Some("timedOut") => Self::TimedOut,
            Some("skipped") => Self::Skipped,
            _ => Self::Failed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::TimedOut => "timedOut",
            Self::Skipped => "skipped",
            Self::Flaky => "flaky",
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_results_layout() {
        let raw = r#"{
            "suites": [{
                "title": "login.spec.ts",
                "file": "login.spec.ts",
                "specs": [{
                    "title": "logs in",
                    "line": 4,
                    "column": 5,
                    "tests": [{
                        "projectName": "chromium",
                        "results": [
                            {"status": "failed", "duration": 120, "errors": [{"message": "boom"}]},
                            {"status": "passed", "duration": 80, "startTime": "2026-01-01T00:00:00Z"}
                        ]
                    }]
                }]
            }],
            "stats": {"startTime": "2026-01-01T00:00:00Z", "duration": 200}
        }"#;
        let report: PlaywrightReport = serde_json::from_str(raw).unwrap();
        let spec = &report.suites[0].specs[0];
        let results = spec.tests[0].results.as_ref().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(
            results[0].primary_error().and_then(|e| e.message.as_deref()),
            Some("boom")
        );
        assert_eq!(report.stats.unwrap().duration, Some(200.0));
    }

    #[test]
    fn parses_flat_layout() {
        let raw = r#"{"suites":[{"title":"s","tests":[
            {"title":"t","status":"failed","duration":10,"retry":0,"errors":[{"message":"x"}]},
            {"title":"t","status":"passed","duration":12,"retry":1}
        ]}]}"#;
        let report: PlaywrightReport = serde_json::from_str(raw).unwrap();
        let tests = &report.suites[0].tests;
        assert_eq!(tests.len(), 2);
        assert!(tests[0].results.is_none());
        assert_eq!(tests[1].retry, Some(1));
    }

    #[test]
    fn unknown_statuses_are_failures() {
        assert_eq!(TestStatus::from_attempt(Some("passed")), TestStatus::Passed);
        assert_eq!(TestStatus::from_attempt(Some("timedOut")), TestStatus::TimedOut);
        assert_eq!(TestStatus::from_attempt(Some("interrupted")), TestStatus::Failed);
        assert_eq!(TestStatus::from_attempt(None), TestStatus::Failed);
    }
}
