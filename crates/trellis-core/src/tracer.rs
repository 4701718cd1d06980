use serde_json::Value;

use crate::stream::StreamWriterManager;

/// Engine-level trace hook. Fire-and-continue: implementations must not
/// fail the caller.
pub trait Tracer: Send + Sync {
    fn trigger(&self, handler: &str, event: &str, fields: Value);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl Tracer for NoopTracer {
    fn trigger(&self, _handler: &str, _event: &str, _fields: Value) {}
}

/// Logs every event through `tracing` and forwards it as a trace chunk
/// when the trace stream mode is enabled.
#[derive(Debug, Clone, Default)]
pub struct StreamTracer {
    writer: StreamWriterManager,
}

impl StreamTracer {
    pub fn new(writer: StreamWriterManager) -> Self {
        Self { writer }
    }
}

impl Tracer for StreamTracer {
    fn trigger(&self, handler: &str, event: &str, fields: Value) {
        tracing::debug!(handler, event, fields = %fields, "trace event");
        self.writer.trace(format!("{handler}.{event}"), fields);
    }
}
