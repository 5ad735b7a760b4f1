//! Run-completion adapter between the CLI and the synthesizers.
//!
//! The synthesizers take their parent explicitly. This is the one place that
//! falls back to the span active in the ambient `tracing` context.

use std::path::Path;

use chrono::{DateTime, Utc};
use opentelemetry::Context;
use opentelemetry_sdk::trace as sdktrace;
use spansynth_core::config::{NdjsonOptions, PlaywrightShape};
use spansynth_core::ids::{SpanId, TraceId};
use spansynth_core::model::context::TelemetryContext;
use spansynth_engine::parent::remote_parent;
use spansynth_engine::{
    FsArtifacts, K6NdjsonSynthesizer, K6SummarySynthesizer, PlaywrightSynthesizer,
    SynthesisRequest,
};
use tracing::{info, warn};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::discover::discover;

pub struct Worker<'a> {
    tracer: &'a sdktrace::Tracer,
    telemetry: TelemetryContext,
    correlation: Option<(TraceId, SpanId)>,
}

impl<'a> Worker<'a> {
    pub fn new(tracer: &'a sdktrace::Tracer, telemetry: TelemetryContext) -> Self {
        Self {
            tracer,
            telemetry,
            correlation: None,
        }
    }

    /// Parents every span under a propagated trace instead of the ambient span.
    pub fn with_correlation(mut self, trace_id: TraceId, span_id: SpanId) -> Self {
        self.correlation = Some((trace_id, span_id));
        self
    }

    pub fn has_explicit_parent(&self) -> bool {
        self.correlation.is_some()
    }

    fn parent(&self) -> Context {
        match &self.correlation {
            Some((trace_id, span_id)) => remote_parent(trace_id, span_id).unwrap_or_else(|err| {
                warn!(error = %err, "unusable correlation ids");
                Context::new()
            }),
            None => tracing::Span::current().context(),
        }
    }

    pub async fn playwright(&self, path: &Path, shape: PlaywrightShape) -> usize {
        let parent = self.parent();
        let req = SynthesisRequest::new(path)
            .with_telemetry(&self.telemetry)
            .with_parent(&parent);
        PlaywrightSynthesizer::new(shape)
            .synthesize(self.tracer, &FsArtifacts, req)
            .await
    }

    pub async fn k6_summary(&self, path: &Path) -> usize {
        let parent = self.parent();
        let req = SynthesisRequest::new(path)
            .with_telemetry(&self.telemetry)
            .with_parent(&parent);
        K6SummarySynthesizer::new()
            .synthesize(self.tracer, &FsArtifacts, req)
            .await
    }

    pub async fn k6_ndjson(
        &self,
        path: &Path,
        options: &NdjsonOptions,
        test_start: Option<DateTime<Utc>>,
    ) -> usize {
        let parent = self.parent();
        let req = SynthesisRequest::new(path)
            .with_telemetry(&self.telemetry)
            .with_parent(&parent);

        let mut synth = K6NdjsonSynthesizer::new(options.clone());
        if let Some(start) = test_start {
            synth = synth.with_test_start(start);
        }
        if let Some((trace_id, span_id)) = &self.correlation {
            synth = synth.with_correlation(trace_id.clone(), span_id.clone());
        }
        synth.synthesize(self.tracer, &FsArtifacts, req).await
    }

    /// Synthesizes every artifact found in `dir`, one after another.
    pub async fn run_dir(
        &self,
        dir: &Path,
        shape: PlaywrightShape,
        options: &NdjsonOptions,
        test_start: Option<DateTime<Utc>>,
    ) -> anyhow::Result<usize> {
        let artifacts = discover(dir)?;
        if artifacts.is_empty() {
            warn!(dir = %dir.display(), "no playwright or k6 artifacts found");
            return Ok(0);
        }

        let mut total = 0;
        for path in &artifacts.playwright {
            total += self.playwright(path, shape).await;
        }
        for path in &artifacts.k6_summary {
            total += self.k6_summary(path).await;
        }
        for path in &artifacts.k6_ndjson {
            total += self.k6_ndjson(path, options, test_start).await;
        }

        info!(
            dir = %dir.display(),
            artifacts = artifacts.len(),
            spans = total,
            "synthesized run directory"
        );
        Ok(total)
    }
}
