//! k6 artifacts: the end-of-test `summary.json` and the `--out json` point stream.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct K6Summary {
    #[serde(default)]
    pub root_group: Option<SummaryGroup>,
    #[serde(default)]
    pub metrics: BTreeMap<String, Value>,
    #[serde(default)]
    pub state: Option<SummaryState>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryState {
    pub test_run_duration_ms: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SummaryGroup {
    pub name: Option<String>,
    pub path: Option<String>,
    #[serde(default)]
    pub groups: Option<Listing<SummaryGroup>>,
    #[serde(default)]
    pub checks: Option<Listing<SummaryCheck>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SummaryCheck {
    pub name: Option<String>,
    pub path: Option<String>,
    #[serde(default)]
    pub passes: u64,
    #[serde(default)]
    pub fails: u64,
}

/// Newer k6 versions emit arrays, older ones objects keyed by name.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Listing<T> {
    List(Vec<T>),
    Keyed(BTreeMap<String, T>),
}

impl<T> Listing<T> {
    pub fn entries(&self) -> Vec<(Option<&str>, &T)> {
        match self {
            Self::List(items) => items.iter().map(|item| (None, item)).collect(),
            Self::Keyed(map) => map.iter().map(|(k, v)| (Some(k.as_str()), v)).collect(),
        }
    }
}

/// A check with the group path it was declared under (empty for the root group).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatCheck {
    pub name: String,
    pub group: String,
    pub passes: u64,
    pub fails: u64,
}

impl SummaryGroup {
    /// Root checks first, then nested groups depth-first.
    pub fn flatten_checks(&self) -> Vec<FlatCheck> {
        let mut out = Vec::new();
        self.collect_checks(&mut out, "");
        out
    }

    fn collect_checks(&self, out: &mut Vec<FlatCheck>, group_path: &str) {
        if let Some(checks) = &self.checks {
            for (key, check) in checks.entries() {
                let Some(name) = check.name.as_deref().or(key) else {
                    continue;
                };
                out.push(FlatCheck {
                    name: name.to_string(),
                    group: group_path.to_string(),
                    passes: check.passes,
                    fails: check.fails,
                });
            }
        }

        if let Some(groups) = &self.groups {
            for (key, group) in groups.entries() {
                let name = group.name.as_deref().or(key).unwrap_or_default();
                let path = group
                    .path
                    .clone()
                    .unwrap_or_else(|| format!("{group_path}::{name}"));
                group.collect_checks(out, &path);
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrendStats {
    pub avg: Option<f64>,
    pub min: Option<f64>,
    pub med: Option<f64>,
    pub max: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
}

/// A summary metric classified by the fields it carries.
#[derive(Debug, Clone, PartialEq)]
pub enum SummaryMetric {
    Counter {
        count: f64,
        rate: Option<f64>,
    },
    Rate {
        rate: f64,
    },
    Trend(TrendStats),
    Gauge {
        value: Option<f64>,
        min: Option<f64>,
        max: Option<f64>,
    },
    Unknown,
}

impl SummaryMetric {
    /// Accepts both the flat `--summary-export` layout and the
    /// `handleSummary` layout that nests fields under `values`.
    pub fn classify(raw: &Value) -> Self {
        let Some(obj) = raw.as_object() else {
            return Self::Unknown;
        };
        let fields = obj
            .get("values")
            .and_then(Value::as_object)
            .unwrap_or(obj);
        let num = |key: &str| fields.get(key).and_then(Value::as_f64);

        match obj.get("type").and_then(Value::as_str) {
            Some("trend") => return Self::Trend(trend(&num)),
            Some("counter") => {
                return num("count")
                    .map(|count| Self::Counter {
                        count,
                        rate: num("rate"),
                    })
                    .unwrap_or(Self::Unknown);
            }
            Some("rate") => {
                return num("rate")
                    .or_else(|| num("value"))
                    .map(|rate| Self::Rate { rate })
                    .unwrap_or(Self::Unknown);
            }
            Some("gauge") => {
                return Self::Gauge {
                    value: num("value"),
                    min: num("min"),
                    max: num("max"),
                };
            }
            _ => {}
        }

        if num("avg").is_some() || num("p(95)").is_some() || num("med").is_some() {
            return Self::Trend(trend(&num));
        }
        if let Some(count) = num("count") {
            return Self::Counter {
                count,
                rate: num("rate"),
            };
        }
        if let Some(rate) = num("rate") {
            return Self::Rate { rate };
        }
        let has_passes_fails = num("passes").is_some() || num("fails").is_some();
        if let (true, Some(rate)) = (has_passes_fails, num("value")) {
            return Self::Rate { rate };
        }
        let (value, min, max) = (num("value"), num("min"), num("max"));
        if value.is_some() || min.is_some() || max.is_some() {
            return Self::Gauge { value, min, max };
        }
        Self::Unknown
    }
}

fn trend(num: &dyn Fn(&str) -> Option<f64>) -> TrendStats {
    TrendStats {
        avg: num("avg"),
        min: num("min"),
        med: num("med"),
        max: num("max"),
        p90: num("p(90)"),
        p95: num("p(95)"),
        p99: num("p(99)"),
    }
}

/// One line of `k6 run --out json=...`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum NdjsonLine {
    Point { metric: String, data: PointData },
    Metric { metric: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PointData {
    pub time: String,
    pub value: f64,
    #[serde(default)]
    pub tags: Option<PointTags>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PointTags {
    pub url: Option<String>,
    pub name: Option<String>,
    pub method: Option<String>,
    pub status: Option<Value>,
    pub scenario: Option<String>,
    pub check: Option<String>,
    pub group: Option<String>,
}

impl PointTags {
    /// k6 writes the status tag as a string; some outputs use a number. `0`
    /// (transport failure) is kept.
    pub fn status_code(&self) -> Option<u16> {
        match self.status.as_ref()? {
            Value::String(s) => s.trim().parse().ok(),
            Value::Number(n) => n.as_u64().and_then(|v| u16::try_from(v).ok()),
            _ => None,
        }
    }

    /// The request URL, preferring `url` over the `name` tag.
    pub fn request_url(&self) -> Option<&str> {
        self.url.as_deref().or(self.name.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn classifies_flat_export_metrics() {
        assert_eq!(
            SummaryMetric::classify(&json!({"count": 10, "rate": 2.5})),
            SummaryMetric::Counter {
                count: 10.0,
                rate: Some(2.5)
            }
        );
        assert!(matches!(
            SummaryMetric::classify(&json!({"avg": 1.0, "p(95)": 3.0})),
            SummaryMetric::Trend(TrendStats { p95: Some(p95), .. }) if p95 == 3.0
        ));
        assert_eq!(
            SummaryMetric::classify(&json!({"passes": 1, "fails": 9, "value": 0.1})),
            SummaryMetric::Rate { rate: 0.1 }
        );
        assert_eq!(
            SummaryMetric::classify(&json!({"value": 1, "min": 1, "max": 10})),
            SummaryMetric::Gauge {
                value: Some(1.0),
                min: Some(1.0),
                max: Some(10.0)
            }
        );
    }

    #[test]
    fn classifies_handle_summary_metrics() {
        let metric = json!({"type": "counter", "contains": "default", "values": {"count": 4, "rate": 1}});
        assert_eq!(
            SummaryMetric::classify(&metric),
            SummaryMetric::Counter {
                count: 4.0,
                rate: Some(1.0)
            }
        );
    }

    #[test]
    fn unknown_shapes_are_skipped() {
        assert_eq!(SummaryMetric::classify(&json!("x")), SummaryMetric::Unknown);
        assert_eq!(SummaryMetric::classify(&json!({"thresholds": {}})), SummaryMetric::Unknown);
        assert_eq!(
            SummaryMetric::classify(&json!({"type": "counter", "values": {}})),
            SummaryMetric::Unknown
        );
    }

    #[test]
    fn flattens_checks_in_both_layouts() {
        let raw = json!({
            "root_group": {
                "name": "",
                "checks": [{"name": "status is 200", "passes": 9, "fails": 1}],
                "groups": {
                    "login": {
                        "name": "login",
                        "path": "::login",
                        "checks": {"has token": {"passes": 3, "fails": 0}},
                        "groups": []
                    }
                }
            }
        });
        let summary: K6Summary = serde_json::from_value(raw).unwrap();
        let checks = summary.root_group.unwrap().flatten_checks();
        assert_eq!(
            checks,
            vec![
                FlatCheck {
                    name: "status is 200".into(),
                    group: "".into(),
                    passes: 9,
                    fails: 1
                },
                FlatCheck {
                    name: "has token".into(),
                    group: "::login".into(),
                    passes: 3,
                    fails: 0
                },
            ]
        );
    }

    #[test]
    fn parses_point_and_metric_lines() {
        let point: NdjsonLine = serde_json::from_str(
            r#"{"type":"Point","metric":"http_req_duration","data":{"time":"2026-01-01T00:00:00Z","value":12.5,"tags":{"method":"GET","url":"https://x.io/a","status":"404"}}}"#,
        )
        .unwrap();
        let NdjsonLine::Point { metric, data } = point else {
            panic!("expected point");
        };
        assert_eq!(metric, "http_req_duration");
        assert_eq!(data.tags.unwrap().status_code(), Some(404));

        let decl: NdjsonLine = serde_json::from_str(
            r#"{"type":"Metric","metric":"checks","data":{"name":"checks","type":"rate","contains":"default","thresholds":[],"submetrics":null}}"#,
        )
        .unwrap();
        assert!(matches!(decl, NdjsonLine::Metric { .. }));

        let other: NdjsonLine = serde_json::from_str(r#"{"type":"Trailer"}"#).unwrap();
        assert!(matches!(other, NdjsonLine::Other));
    }
}
