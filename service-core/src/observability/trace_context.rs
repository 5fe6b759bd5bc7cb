//! W3C trace-context propagation for outbound HTTP calls.
//!
//! See: https://www.w3.org/TR/trace-context/

use opentelemetry::trace::TraceContextExt;
use reqwest::header::HeaderMap;
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

pub const TRACEPARENT_HEADER: &str = "traceparent";

pub const TRACESTATE_HEADER: &str = "tracestate";

/// Write the current span's context as `traceparent`/`tracestate` headers.
///
/// Leaves `headers` untouched when there is no sampled OpenTelemetry span,
/// e.g. when OTLP export is disabled.
pub fn inject_trace_context(headers: &mut HeaderMap) {
    let context = Span::current().context();
    let otel_span = context.span();
    let span_context = otel_span.span_context();

    if !span_context.is_valid() {
        return;
    }

    // version-trace_id-span_id-trace_flags
    let traceparent = format!(
        "00-{}-{}-{:02x}",
        span_context.trace_id(),
        span_context.span_id(),
        span_context.trace_flags().to_u8()
    );
    if let Ok(value) = traceparent.parse() {
        headers.insert(TRACEPARENT_HEADER, value);
    }

    let tracestate = span_context.trace_state().header();
    if !tracestate.is_empty()
        && let Ok(value) = tracestate.parse()
    {
        headers.insert(TRACESTATE_HEADER, value);
    }
}

/// Request builders that carry the caller's trace context.
pub trait TracedClientExt {
    fn traced_get(&self, url: &str) -> reqwest::RequestBuilder;
    fn traced_post(&self, url: &str) -> reqwest::RequestBuilder;
}

impl TracedClientExt for reqwest::Client {
    fn traced_get(&self, url: &str) -> reqwest::RequestBuilder {
        let mut headers = HeaderMap::new();
        inject_trace_context(&mut headers);
        self.get(url).headers(headers)
    }

    fn traced_post(&self, url: &str) -> reqwest::RequestBuilder {
        let mut headers = HeaderMap::new();
        inject_trace_context(&mut headers);
        self.post(url).headers(headers)
    }
}
