//! Span synthesis for finished test runs.
//!
//! Playwright and k6 do not emit OpenTelemetry while they run, so the worker
//! turns their result artifacts into spans after the fact. Every span is
//! started and ended inside the synthesis call with historical timestamps and
//! attached under a parent context supplied by the caller.
//!
//! The synthesizers never fail across their public boundary: problems are
//! logged and the returned span count is simply lower.

pub mod emit;
pub mod k6_ndjson;
pub mod k6_summary;
pub mod normalize;
pub mod parent;
pub mod playwright;
pub mod source;
pub mod stats;

use std::path::Path;

use opentelemetry::Context;
use spansynth_core::model::context::TelemetryContext;

pub use k6_ndjson::K6NdjsonSynthesizer;
pub use k6_summary::K6SummarySynthesizer;
pub use playwright::PlaywrightSynthesizer;
pub use source::{ArtifactSource, FsArtifacts};

/// Inputs shared by every synthesizer invocation.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisRequest<'a> {
    pub path: &'a Path,
    pub telemetry: Option<&'a TelemetryContext>,
    pub parent: Option<&'a Context>,
}

impl<'a> SynthesisRequest<'a> {
    pub fn new(path: &'a Path) -> Self {
        Self {
            path,
            telemetry: None,
            parent: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: &'a TelemetryContext) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn with_parent(mut self, parent: &'a Context) -> Self {
        self.parent = Some(parent);
        self
    }
}
