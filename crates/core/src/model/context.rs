use serde::{Deserialize, Serialize};

/// Correlation identifiers attached to every span of one synthesis call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryContext {
    pub run_id: Option<String>,
    pub test_id: Option<String>,
    pub job_id: Option<String>,
    pub run_type: Option<String>,
    pub project_id: Option<String>,
    pub organization_id: Option<String>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
}

impl TelemetryContext {
    pub fn for_run(run_id: impl Into<String>) -> Self {
        Self {
            run_id: Some(run_id.into()),
            ..Self::default()
        }
    }

    /// Attribute key/value pairs for the identifiers that are set, in a fixed order.
    pub fn attributes(&self) -> Vec<(&'static str, &str)> {
        [
            ("supercheck.run_id", &self.run_id),
            ("supercheck.test_id", &self.test_id),
            ("supercheck.job_id", &self.job_id),
            ("supercheck.run_type", &self.run_type),
            ("supercheck.project_id", &self.project_id),
            ("supercheck.organization_id", &self.organization_id),
            ("supercheck.trace_id", &self.trace_id),
            ("supercheck.span_id", &self.span_id),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.as_deref().map(|v| (key, v)))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_present_ids_become_attributes() {
        let ctx = TelemetryContext {
            run_id: Some("run-1".into()),
            organization_id: Some("org-9".into()),
            ..TelemetryContext::default()
        };
        assert_eq!(
            ctx.attributes(),
            vec![
                ("supercheck.run_id", "run-1"),
                ("supercheck.organization_id", "org-9")
            ]
        );
    }

    #[test]
    fn deserializes_camel_case() {
        let ctx: TelemetryContext =
            serde_json::from_str(r#"{"runId":"r","jobId":"j","runType":"k6"}"#).unwrap();
        assert_eq!(ctx.run_id.as_deref(), Some("r"));
        assert_eq!(ctx.job_id.as_deref(), Some("j"));
        assert_eq!(ctx.run_type.as_deref(), Some("k6"));
        assert!(ctx.test_id.is_none());
    }
}
