//! Distributed-trace and span propagation
//!
//! The active trace rides in the same task-local scope as contexts.
//! Spans form a LIFO stack within a trace: ending the current span
//! restores its parent as current. A span ends exactly once.

use super::scope::with_scope;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    Active,
    Completed,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct Span {
    pub span_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    pub status: SpanStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

fn generate_trace_id() -> String {
    format!("trace_{}", Uuid::new_v4().simple())
}

fn generate_correlation_id() -> String {
    format!("corr_{}", &Uuid::new_v4().simple().to_string()[..16])
}

fn generate_span_id() -> String {
    format!("span_{}", &Uuid::new_v4().simple().to_string()[..12])
}

/// The active distributed trace: identifiers, the span stack, and the
/// append-only span list.
#[derive(Debug, Clone)]
pub struct TraceContext {
    pub trace_id: String,
    pub correlation_id: String,
    pub current_span_id: String,
    pub parent_span_id: Option<String>,
    span_stack: Vec<String>,
    spans: Vec<Span>,
    created_at: Instant,
}

impl TraceContext {
    pub fn new(trace_id: Option<String>, correlation_id: Option<String>) -> Self {
        Self {
            trace_id: trace_id.unwrap_or_else(generate_trace_id),
            correlation_id: correlation_id.unwrap_or_else(generate_correlation_id),
            current_span_id: generate_span_id(),
            parent_span_id: None,
            span_stack: Vec::new(),
            spans: Vec::new(),
            created_at: Instant::now(),
        }
    }

    /// Open a child of the current span, make it current, and return its
    /// id.
    pub fn start_span(
        &mut self,
        name: impl Into<String>,
        metadata: Option<HashMap<String, Value>>,
    ) -> String {
        let span_id = generate_span_id();
        self.spans.push(Span {
            span_id: span_id.clone(),
            name: name.into(),
            parent_span_id: Some(self.current_span_id.clone()),
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            status: SpanStatus::Active,
            error: None,
            metadata: metadata.unwrap_or_default(),
        });
        self.span_stack.push(self.current_span_id.clone());
        self.current_span_id = span_id.clone();
        span_id
    }

    /// Close a span. The first call transitions it out of `Active` and,
    /// when it is the current span, restores the parent from the stack.
    /// Unknown or already-ended spans return false with no state change.
    pub fn end_span(
        &mut self,
        span_id: &str,
        status: SpanStatus,
        error: Option<String>,
    ) -> bool {
        let Some(span) = self.spans.iter_mut().find(|s| s.span_id == span_id) else {
            return false;
        };
        if span.status != SpanStatus::Active {
            return false;
        }

        let ended_at = Utc::now();
        span.duration_ms = Some(
            (ended_at - span.started_at)
                .num_microseconds()
                .map_or(0.0, |us| us as f64 / 1_000.0),
        );
        span.ended_at = Some(ended_at);
        span.status = status;
        span.error = error;

        if self.current_span_id == span_id {
            if let Some(parent) = self.span_stack.pop() {
                self.current_span_id = parent;
            }
        }
        true
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    pub fn span(&self, span_id: &str) -> Option<&Span> {
        self.spans.iter().find(|s| s.span_id == span_id)
    }

    pub fn span_stack_depth(&self) -> usize {
        self.span_stack.len()
    }

    pub fn stats(&self) -> Value {
        let count_status =
            |status: SpanStatus| self.spans.iter().filter(|s| s.status == status).count();
        json!({
            "trace_id": self.trace_id,
            "correlation_id": self.correlation_id,
            "current_span_id": self.current_span_id,
            "total_spans": self.spans.len(),
            "active_spans": count_status(SpanStatus::Active),
            "completed_spans": count_status(SpanStatus::Completed),
            "error_spans": count_status(SpanStatus::Error),
            "span_stack_depth": self.span_stack_depth(),
            "age_seconds": self.created_at.elapsed().as_secs_f64(),
        })
    }
}

/// Identifiers of the active trace, for record construction:
/// `(trace_id, span_id, correlation_id)`.
pub fn current_trace_ids() -> Option<(String, String, String)> {
    with_scope(|scope| {
        scope.trace.as_ref().map(|trace| {
            (
                trace.trace_id.clone(),
                trace.current_span_id.clone(),
                trace.correlation_id.clone(),
            )
        })
    })
    .flatten()
}

/// Install a new trace as this task's current one. Returns a snapshot,
/// or `None` when the task has no scope installed.
pub fn start_trace(
    trace_id: Option<String>,
    correlation_id: Option<String>,
) -> Option<TraceContext> {
    with_scope(|scope| {
        let trace = TraceContext::new(trace_id, correlation_id);
        scope.trace = Some(trace.clone());
        trace
    })
}

/// Snapshot of the task's current trace.
pub fn current_trace() -> Option<TraceContext> {
    with_scope(|scope| scope.trace.clone()).flatten()
}

/// Discard the task's current trace.
pub fn clear_trace() {
    let _ = with_scope(|scope| scope.trace = None);
}

/// Start a span in the task's current trace.
pub fn start_span(
    name: impl Into<String>,
    metadata: Option<HashMap<String, Value>>,
) -> Option<String> {
    with_scope(|scope| {
        scope
            .trace
            .as_mut()
            .map(|trace| trace.start_span(name, metadata))
    })
    .flatten()
}

/// End a span in the task's current trace.
pub fn end_span(span_id: &str, status: SpanStatus, error: Option<String>) -> bool {
    with_scope(|scope| {
        scope
            .trace
            .as_mut()
            .map(|trace| trace.end_span(span_id, status, error))
    })
    .flatten()
    .unwrap_or(false)
}
