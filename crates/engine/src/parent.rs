use opentelemetry::Context;
use opentelemetry::trace::{
    SpanContext, SpanId as OtelSpanId, TraceContextExt, TraceFlags, TraceId as OtelTraceId,
    TraceState,
};
use spansynth_core::ids::{SpanId, TraceId};
use spansynth_core::{Result, SynthError};

/// The parent to attach synthesized spans under, if it carries a valid span.
pub fn usable_parent(parent: Option<&Context>) -> Option<&Context> {
    parent.filter(|cx| cx.span().span_context().is_valid())
}

/// Builds a sampled remote parent from a propagated trace/span id pair.
pub fn remote_parent(trace_id: &TraceId, span_id: &SpanId) -> Result<Context> {
    let trace_id = OtelTraceId::from_hex(trace_id.as_str())
        .map_err(|e| SynthError::Parse(format!("trace id {}: {e}", trace_id.as_str())))?;
    let span_id = OtelSpanId::from_hex(span_id.as_str())
        .map_err(|e| SynthError::Parse(format!("span id {}: {e}", span_id.as_str())))?;
    let span_context = SpanContext::new(
        trace_id,
        span_id,
        TraceFlags::SAMPLED,
        true,
        TraceState::default(),
    );
    Ok(Context::new().with_remote_span_context(span_context))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_context_is_not_a_parent() {
        let cx = Context::new();
        assert!(usable_parent(Some(&cx)).is_none());
        assert!(usable_parent(None).is_none());
    }

    #[test]
    fn remote_parent_carries_ids() {
        let trace = TraceId::parse("4bf92f3577b34da6a3ce929d0e0e4736").unwrap();
        let span = SpanId::parse("00f067aa0ba902b7").unwrap();
        let cx = remote_parent(&trace, &span).unwrap();

        let parent = usable_parent(Some(&cx)).expect("valid parent");
        let sc = parent.span().span_context().clone();
        assert!(sc.is_remote());
        assert_eq!(sc.trace_id().to_string(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(sc.span_id().to_string(), "00f067aa0ba902b7");
    }
}
