//! Task-local context and distributed-trace propagation

pub mod scope;
pub mod trace;

pub use scope::{Context, ContextStore, ContextSwitcher};
pub use trace::{Span, SpanStatus, TraceContext};

use std::future::Future;

struct ClearTraceOnDrop;

impl Drop for ClearTraceOnDrop {
    fn drop(&mut self) {
        trace::clear_trace();
    }
}

struct EndSpanOnDrop {
    span_id: String,
}

impl Drop for EndSpanOnDrop {
    fn drop(&mut self) {
        // No-op if the span was already ended explicitly.
        trace::end_span(&self.span_id, SpanStatus::Completed, None);
    }
}

impl ContextStore {
    /// Run `fut` with a new trace active; the trace is cleared on every
    /// exit path. Installs a root scope if the task has none.
    pub async fn with_trace<F: Future>(
        &self,
        trace_id: Option<String>,
        correlation_id: Option<String>,
        fut: F,
    ) -> F::Output {
        let scoped = async move {
            trace::start_trace(trace_id, correlation_id);
            let _clear = ClearTraceOnDrop;
            fut.await
        };
        if Self::in_scope() {
            scoped.await
        } else {
            self.scope(scoped).await
        }
    }

    /// Run `fut` inside a span of the current trace; the span is ended on
    /// every exit path (a no-op when `fut` already ended it). Without an
    /// active trace, `fut` simply runs.
    pub async fn with_span<F: Future>(&self, name: &str, fut: F) -> F::Output {
        let guard = trace::start_span(name, None).map(|span_id| EndSpanOnDrop { span_id });
        let output = fut.await;
        drop(guard);
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_trace_clears_on_exit() {
        let store = ContextStore::new();
        store
            .scope(async {
                store
                    .with_trace(Some("trace_t".into()), None, async {
                        assert_eq!(trace::current_trace().unwrap().trace_id, "trace_t");
                    })
                    .await;
                assert!(trace::current_trace().is_none());
            })
            .await;
    }

    #[tokio::test]
    async fn test_with_span_ends_on_exit() {
        let store = ContextStore::new();
        store
            .with_trace(None, None, async {
                let captured = std::sync::Arc::new(parking_lot::Mutex::new(String::new()));
                let slot = std::sync::Arc::clone(&captured);
                ContextStore::new()
                    .with_span("work", async move {
                        *slot.lock() = trace::current_trace_ids().unwrap().1;
                    })
                    .await;

                let span_id = captured.lock().clone();
                let trace = trace::current_trace().unwrap();
                assert_eq!(trace.span(&span_id).unwrap().status, SpanStatus::Completed);
                // Current span fell back to the root.
                assert_eq!(trace.span_stack_depth(), 0);
            })
            .await;
    }

    #[tokio::test]
    async fn test_with_span_without_trace_is_passthrough() {
        let store = ContextStore::new();
        store
            .scope(async {
                let value = store.with_span("noop", async { 7 }).await;
                assert_eq!(value, 7);
            })
            .await;
    }

    #[tokio::test]
    async fn test_with_trace_installs_scope_if_missing() {
        let store = ContextStore::new();
        // No surrounding scope() call.
        store
            .with_trace(None, None, async {
                assert!(trace::current_trace().is_some());
            })
            .await;
    }
}
