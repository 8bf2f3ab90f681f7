// SPDX-License-Identifier: MIT

//! Tracing context handed to every node execution
//!
//! Nodes only ever talk to the [`Span`] trait. [`NodeSpan`] forwards to a
//! `tracing::Span`; [`RecordingSpan`] keeps the events in memory for tests and
//! local harnesses.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Mutex;

/// Error-reporting surface of a trace span
pub trait Span: Send + Sync {
    /// Identifier forwarded to providers for request correlation
    fn trace_id(&self) -> &str;

    /// Attach a short error event
    fn add_error_event(&self, message: &str);

    /// Attach the full error, including its source chain
    fn record_exception(&self, err: &(dyn Error + 'static));
}

fn error_chain(err: &(dyn Error + 'static)) -> Vec<String> {
    let mut chain = vec![err.to_string()];
    let mut source = err.source();
    while let Some(inner) = source {
        chain.push(inner.to_string());
        source = inner.source();
    }
    chain
}

/// Span backed by the `tracing` crate
pub struct NodeSpan {
    trace_id: String,
    inner: tracing::Span,
}

impl NodeSpan {
    pub fn new(node_id: &str, flow_id: &str) -> Self {
        let trace_id = uuid::Uuid::new_v4().to_string();
        let inner = tracing::info_span!("node", node_id, flow_id, trace_id = %trace_id);
        Self { trace_id, inner }
    }
}

impl Span for NodeSpan {
    fn trace_id(&self) -> &str {
        &self.trace_id
    }

    fn add_error_event(&self, message: &str) {
        tracing::error!(parent: &self.inner, event = "error", "{}", message);
    }

    fn record_exception(&self, err: &(dyn Error + 'static)) {
        let chain = error_chain(err);
        tracing::error!(
            parent: &self.inner,
            event = "exception",
            exception.message = %err,
            exception.chain = ?chain
        );
    }
}

/// Event captured by [`RecordingSpan`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SpanEvent {
    Error(String),
    Exception { message: String, chain: Vec<String> },
}

/// In-memory span
#[derive(Debug, Default)]
pub struct RecordingSpan {
    trace_id: String,
    events: Mutex<Vec<SpanEvent>>,
}

impl RecordingSpan {
    pub fn new(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<SpanEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn push(&self, event: SpanEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}

impl Span for RecordingSpan {
    fn trace_id(&self) -> &str {
        &self.trace_id
    }

    fn add_error_event(&self, message: &str) {
        self.push(SpanEvent::Error(message.to_string()));
    }

    fn record_exception(&self, err: &(dyn Error + 'static)) {
        self.push(SpanEvent::Exception {
            message: err.to_string(),
            chain: error_chain(err),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adk::error::{ExecutionError, PoolError};

    #[test]
    fn test_recording_span_keeps_order() {
        let span = RecordingSpan::new("t-1");
        span.add_error_event("first");
        span.record_exception(&ExecutionError::unclassified(PoolError::key_not_found(
            "llm", "query",
        )));

        let events = span.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], SpanEvent::Error("first".to_string()));
        match &events[1] {
            SpanEvent::Exception { chain, .. } => {
                assert_eq!(chain.len(), 2);
                assert_eq!(chain[1], "variable 'query' not found for node 'llm'");
            }
            other => panic!("expected exception, got {:?}", other),
        }
    }

    #[test]
    fn test_node_span_has_trace_id() {
        let span = NodeSpan::new("llm-1", "flow-1");
        assert!(!span.trace_id().is_empty());
        // no subscriber installed; must not panic
        span.add_error_event("ignored");
    }
}
