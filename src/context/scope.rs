//! Task-local context propagation
//!
//! Context is carried in runtime task-local storage: concurrent tasks are
//! fully isolated, and a context survives across suspension points within
//! its task. Entering a nested context pushes onto a per-task stack;
//! leaving restores the prior one, on every exit path.

use super::trace::TraceContext;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

tokio::task_local! {
    pub(crate) static TASK_SCOPE: RefCell<TaskScope>;
}

#[derive(Debug, Default)]
pub(crate) struct TaskScope {
    pub(crate) contexts: Vec<Context>,
    pub(crate) trace: Option<TraceContext>,
}

/// Run `f` against the current task's scope, or return `None` when no
/// scope is installed on this task.
pub(crate) fn with_scope<R>(f: impl FnOnce(&mut TaskScope) -> R) -> Option<R> {
    TASK_SCOPE.try_with(|scope| f(&mut scope.borrow_mut())).ok()
}

/// Per-task metadata bag propagated onto every record logged while it is
/// active.
#[derive(Debug, Clone)]
pub struct Context {
    pub context_id: String,
    pub metadata: HashMap<String, Value>,
    pub created_at: Instant,
    pub last_accessed: Instant,
    pub access_count: u64,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            context_id: format!("ctx_{}", &Uuid::new_v4().simple().to_string()[..8]),
            metadata: HashMap::new(),
            created_at: now,
            last_accessed: now,
            access_count: 0,
        }
    }

    pub fn with_id(context_id: impl Into<String>) -> Self {
        Self {
            context_id: context_id.into(),
            ..Self::new()
        }
    }

    #[must_use]
    pub fn with_metadata<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn set_metadata<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.touch();
        self.metadata.insert(key.into(), value.into());
    }

    pub fn get_metadata(&mut self, key: &str) -> Option<Value> {
        self.touch();
        self.metadata.get(key).cloned()
    }

    fn touch(&mut self) {
        self.last_accessed = Instant::now();
        self.access_count += 1;
    }

    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    pub fn stats(&self) -> Value {
        json!({
            "context_id": self.context_id,
            "metadata_keys": self.metadata.keys().cloned().collect::<Vec<_>>(),
            "access_count": self.access_count,
            "age_seconds": self.age().as_secs_f64(),
        })
    }
}

/// Counts context switches. Diagnostics only; never consulted for
/// correctness.
#[derive(Debug, Default)]
pub struct ContextSwitcher {
    switches: AtomicU64,
    last_switch: Mutex<Option<Instant>>,
}

impl ContextSwitcher {
    pub fn record_switch(&self) {
        self.switches.fetch_add(1, Ordering::Relaxed);
        *self.last_switch.lock() = Some(Instant::now());
    }

    pub fn switch_count(&self) -> u64 {
        self.switches.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.switches.store(0, Ordering::Relaxed);
        *self.last_switch.lock() = None;
    }

    pub fn stats(&self) -> Value {
        json!({
            "total_switches": self.switch_count(),
            "secs_since_last_switch": self
                .last_switch
                .lock()
                .map(|at| at.elapsed().as_secs_f64()),
        })
    }
}

/// Handle to the task-local context machinery. Clones share the same
/// switch diagnostics; the context stacks themselves live in task-local
/// storage and are never shared between tasks.
#[derive(Clone, Default)]
pub struct ContextStore {
    switcher: Arc<ContextSwitcher>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn switcher(&self) -> &ContextSwitcher {
        &self.switcher
    }

    /// Whether the current task has a scope installed.
    pub fn in_scope() -> bool {
        TASK_SCOPE.try_with(|_| ()).is_ok()
    }

    /// Install a fresh root scope for this task and run `fut` inside it.
    pub async fn scope<F: Future>(&self, fut: F) -> F::Output {
        TASK_SCOPE
            .scope(RefCell::new(TaskScope::default()), fut)
            .await
    }

    /// Run `fut` with `context` active. The prior context is restored on
    /// every exit path. Installs a root scope if the task has none.
    pub async fn with_context<F: Future>(&self, context: Context, fut: F) -> F::Output {
        let store = self.clone();
        let scoped = async move {
            store.push(context);
            let _restore = PopOnDrop {
                switcher: Arc::clone(&store.switcher),
            };
            fut.await
        };
        if Self::in_scope() {
            scoped.await
        } else {
            TASK_SCOPE
                .scope(RefCell::new(TaskScope::default()), scoped)
                .await
        }
    }

    /// Push a context onto this task's stack. Returns false when the
    /// task has no scope installed.
    pub fn push(&self, context: Context) -> bool {
        let pushed = with_scope(|scope| scope.contexts.push(context)).is_some();
        if pushed {
            self.switcher.record_switch();
        }
        pushed
    }

    /// Pop the active context, restoring the prior one.
    pub fn pop(&self) -> Option<Context> {
        let popped = with_scope(|scope| scope.contexts.pop()).flatten();
        if popped.is_some() {
            self.switcher.record_switch();
        }
        popped
    }

    /// Snapshot of the active context, if any. Touches access stats.
    pub fn current() -> Option<Context> {
        with_scope(|scope| {
            scope.contexts.last_mut().map(|context| {
                context.touch();
                context.clone()
            })
        })
        .flatten()
    }

    /// Update metadata on the active context. Returns false when no
    /// context is active.
    pub fn update_metadata<K, V>(key: K, value: V) -> bool
    where
        K: Into<String>,
        V: Into<Value>,
    {
        with_scope(|scope| match scope.contexts.last_mut() {
            Some(context) => {
                context.set_metadata(key, value);
                true
            }
            None => false,
        })
        .unwrap_or(false)
    }

    /// Depth of this task's context stack.
    pub fn depth() -> usize {
        with_scope(|scope| scope.contexts.len()).unwrap_or(0)
    }
}

struct PopOnDrop {
    switcher: Arc<ContextSwitcher>,
}

impl Drop for PopOnDrop {
    fn drop(&mut self) {
        let popped = with_scope(|scope| scope.contexts.pop().is_some()).unwrap_or(false);
        if popped {
            self.switcher.record_switch();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_no_scope_outside() {
        assert!(!ContextStore::in_scope());
        assert!(ContextStore::current().is_none());
        assert_eq!(ContextStore::depth(), 0);
    }

    #[tokio::test]
    async fn test_with_context_installs_and_restores() {
        let store = ContextStore::new();
        let ctx = Context::new().with_metadata("request_id", json!("r-1"));

        store
            .with_context(ctx, async {
                let current = ContextStore::current().unwrap();
                assert_eq!(current.metadata["request_id"], json!("r-1"));
                assert_eq!(ContextStore::depth(), 1);
            })
            .await;

        assert!(ContextStore::current().is_none());
    }

    #[tokio::test]
    async fn test_nested_contexts_restore_in_order() {
        let store = ContextStore::new();
        let outer = Context::with_id("ctx_outer");
        let inner = Context::with_id("ctx_inner");

        store
            .with_context(outer, async {
                assert_eq!(ContextStore::current().unwrap().context_id, "ctx_outer");
                store
                    .with_context(inner, async {
                        assert_eq!(ContextStore::current().unwrap().context_id, "ctx_inner");
                        assert_eq!(ContextStore::depth(), 2);
                    })
                    .await;
                assert_eq!(ContextStore::current().unwrap().context_id, "ctx_outer");
            })
            .await;

        // Two pushes and two pops.
        assert_eq!(store.switcher().switch_count(), 4);
    }

    #[tokio::test]
    async fn test_tasks_are_isolated() {
        let store = ContextStore::new();
        store
            .with_context(Context::with_id("ctx_main"), async {
                // A spawned task does not inherit this task's stack.
                let seen = tokio::spawn(async { ContextStore::current().map(|c| c.context_id) })
                    .await
                    .unwrap();
                assert!(seen.is_none());
                assert_eq!(ContextStore::current().unwrap().context_id, "ctx_main");
            })
            .await;
    }

    #[tokio::test]
    async fn test_update_metadata_on_active_context() {
        let store = ContextStore::new();
        store
            .with_context(Context::new(), async {
                assert!(ContextStore::update_metadata("user", json!("alice")));
                let current = ContextStore::current().unwrap();
                assert_eq!(current.metadata["user"], json!("alice"));
                assert!(current.access_count > 0);
            })
            .await;
        assert!(!ContextStore::update_metadata("user", json!("bob")));
    }

    #[tokio::test]
    async fn test_push_pop_manual() {
        let store = ContextStore::new();
        store
            .scope(async {
                assert!(store.push(Context::with_id("ctx_a")));
                assert_eq!(ContextStore::depth(), 1);
                let popped = store.pop().unwrap();
                assert_eq!(popped.context_id, "ctx_a");
                assert!(store.pop().is_none());
            })
            .await;
    }
}
