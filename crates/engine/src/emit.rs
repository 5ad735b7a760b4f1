//! Turns span drafts into ended OpenTelemetry spans with historical timestamps.

use chrono::{DateTime, Utc};
use opentelemetry::trace::{Span as _, SpanKind, Status, Tracer};
use opentelemetry::{Context, KeyValue, Value};
use spansynth_core::Result;
use spansynth_core::model::context::TelemetryContext;
use spansynth_core::time::{add_millis, to_system_time};
use tracing::error;

/// Attribute carrying a message on spans whose status is `Ok`, which has no
/// description of its own.
pub const STATUS_MESSAGE_KEY: &str = "status.message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionInfo {
    pub kind: String,
    pub message: String,
    pub stacktrace: Option<String>,
}

/// Everything needed to emit one completed span.
#[derive(Debug, Clone)]
pub struct SpanDraft {
    name: String,
    kind: SpanKind,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    status: Status,
    attributes: Vec<KeyValue>,
    exception: Option<ExceptionInfo>,
}

impl SpanDraft {
    /// An end before the start is clamped to the start.
    pub fn new(name: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            kind: SpanKind::Internal,
            start,
            end: end.max(start),
            status: Status::Unset,
            attributes: Vec::new(),
            exception: None,
        }
    }

    pub fn kind(mut self, kind: SpanKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn attr(mut self, key: &'static str, value: impl Into<Value>) -> Self {
        self.attributes.push(KeyValue::new(key, value));
        self
    }

    pub fn attr_opt<V: Into<Value>>(self, key: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.attr(key, v),
            None => self,
        }
    }

    pub fn attrs(mut self, attrs: impl IntoIterator<Item = KeyValue>) -> Self {
        self.attributes.extend(attrs);
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn ok_with_message(self, message: impl Into<String>) -> Self {
        self.status(Status::Ok)
            .attr(STATUS_MESSAGE_KEY, message.into())
    }

    pub fn exception(mut self, exception: ExceptionInfo) -> Self {
        self.exception = Some(exception);
        self
    }

    pub fn window(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.start, self.end)
    }
}

/// The window `[first, last]`, stretched to `fallback_ms` when a single
/// observation left it empty.
pub fn observed_window(
    first: DateTime<Utc>,
    last: DateTime<Utc>,
    fallback_ms: f64,
) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    if last > first {
        return Ok((first, last));
    }
    Ok((first, add_millis(first, fallback_ms.max(0.0))?))
}

/// Emits drafts under one parent and counts what was created.
pub struct Emitter<'a, T: Tracer> {
    tracer: &'a T,
    parent: &'a Context,
    context_attrs: Vec<KeyValue>,
    emitted: usize,
}

impl<'a, T: Tracer> Emitter<'a, T> {
    pub fn new(tracer: &'a T, parent: &'a Context, telemetry: Option<&TelemetryContext>) -> Self {
        let context_attrs = telemetry
            .map(|ctx| {
                ctx.attributes()
                    .into_iter()
                    .map(|(key, value)| KeyValue::new(key, value.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            tracer,
            parent,
            context_attrs,
            emitted: 0,
        }
    }

    /// Attributes added to every span after the telemetry context ones.
    pub fn with_common_attrs(mut self, attrs: impl IntoIterator<Item = KeyValue>) -> Self {
        self.context_attrs.extend(attrs);
        self
    }

    pub fn emit(&mut self, draft: SpanDraft) {
        let SpanDraft {
            name,
            kind,
            start,
            end,
            status,
            mut attributes,
            exception,
        } = draft;
        attributes.extend(self.context_attrs.iter().cloned());
        let end = to_system_time(end);

        let mut span = self
            .tracer
            .span_builder(name)
            .with_kind(kind)
            .with_start_time(to_system_time(start))
            .with_attributes(attributes)
            .start_with_context(self.tracer, self.parent);

        if let Some(exception) = exception {
            let mut attrs = vec![
                KeyValue::new("exception.type", exception.kind),
                KeyValue::new("exception.message", exception.message),
            ];
            if let Some(stack) = exception.stacktrace {
                attrs.push(KeyValue::new("exception.stacktrace", stack));
            }
            span.add_event_with_timestamp("exception", end, attrs);
        }

        span.set_status(status);
        span.end_with_timestamp(end);
        self.emitted += 1;
    }

    /// Builds and emits one item; a failed build is logged and skipped.
    pub fn emit_with(&mut self, item: &str, build: impl FnOnce() -> Result<SpanDraft>) -> bool {
        match build() {
            Ok(draft) => {
                self.emit(draft);
                true
            }
            Err(err) => {
                error!(item, error = %err, "failed to synthesize span");
                false
            }
        }
    }

    pub fn emitted(&self) -> usize {
        self.emitted
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use opentelemetry::trace::TraceContextExt;
    use spansynth_core::SynthError;
    use testkit::{TracerHarness, attr_str};

    use super::*;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn emits_child_with_explicit_times() {
        let harness = TracerHarness::new();
        let parent = harness.parent();
        let ctx = TelemetryContext::for_run("run-7");

        let mut emitter = Emitter::new(harness.tracer(), &parent, Some(&ctx));
        emitter.emit(
            SpanDraft::new("Check: ok", base(), base() + Duration::milliseconds(40))
                .attr("k6.check.passes", 3i64)
                .status(Status::Ok),
        );
        assert_eq!(emitter.emitted(), 1);

        let spans = harness.finished();
        assert_eq!(spans.len(), 1);
        let span = &spans[0];
        assert_eq!(span.name, "Check: ok");
        assert_eq!(span.start_time, to_system_time(base()));
        assert_eq!(
            span.end_time,
            to_system_time(base() + Duration::milliseconds(40))
        );
        assert_eq!(span.status, Status::Ok);
        assert_eq!(
            span.parent_span_id,
            parent.span().span_context().span_id()
        );
        assert_eq!(
            span.span_context.trace_id(),
            parent.span().span_context().trace_id()
        );
        assert_eq!(attr_str(span, "supercheck.run_id").as_deref(), Some("run-7"));
    }

    #[test]
    fn records_exception_event_at_end() {
        let harness = TracerHarness::new();
        let parent = harness.parent();
        let mut emitter = Emitter::new(harness.tracer(), &parent, None);
        emitter.emit(
            SpanDraft::new("Test: login", base(), base() + Duration::seconds(1))
                .status(Status::error("failed"))
                .exception(ExceptionInfo {
                    kind: "TestFailure".into(),
                    message: "expected 200".into(),
                    stacktrace: Some("at login.spec.ts:4".into()),
                }),
        );

        let spans = harness.finished();
        let events = &spans[0].events.events;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "exception");
        assert_eq!(events[0].timestamp, to_system_time(base() + Duration::seconds(1)));
        assert_eq!(spans[0].status, Status::error("failed"));
    }

    #[test]
    fn ok_with_message_sets_attribute() {
        let harness = TracerHarness::new();
        let parent = harness.parent();
        let mut emitter = Emitter::new(harness.tracer(), &parent, None);
        emitter.emit(SpanDraft::new("x", base(), base()).ok_with_message("2 of 40 failed"));

        let spans = harness.finished();
        assert_eq!(spans[0].status, Status::Ok);
        assert_eq!(
            attr_str(&spans[0], STATUS_MESSAGE_KEY).as_deref(),
            Some("2 of 40 failed")
        );
    }

    #[test]
    fn failed_build_is_skipped_and_not_counted() {
        let harness = TracerHarness::new();
        let parent = harness.parent();
        let mut emitter = Emitter::new(harness.tracer(), &parent, None);

        assert!(!emitter.emit_with("broken", || Err(SynthError::Timestamp("boom".into()))));
        assert!(emitter.emit_with("fine", || Ok(SpanDraft::new("fine", base(), base()))));
        assert_eq!(emitter.emitted(), 1);
        assert_eq!(harness.finished().len(), 1);
    }

    #[test]
    fn end_before_start_is_clamped() {
        let draft = SpanDraft::new("x", base(), base() - Duration::seconds(5));
        assert_eq!(draft.window(), (base(), base()));
    }

    #[test]
    fn observed_window_stretches_single_points() {
        let (start, end) = observed_window(base(), base(), 250.0).unwrap();
        assert_eq!(start, base());
        assert_eq!(end - start, Duration::milliseconds(250));

        let later = base() + Duration::seconds(3);
        assert_eq!(observed_window(base(), later, 250.0).unwrap(), (base(), later));
    }
}
