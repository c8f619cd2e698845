use parking_lot::RwLock;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::error;

/// Callback receiving the plain mapping of each published `TableState`
pub type StateCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Handle returned by [`ListenerRegistry::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Outcome of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Observer list. Each listener runs in isolation: a panicking listener is
/// logged and the remaining ones still receive the state.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, StateCallback)>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, callback: StateCallback) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.write().push((id, callback));
        id
    }

    /// Returns false when the id was not registered
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Deliver `payload` to every listener in registration order.
    ///
    /// When `stopped` is given it is checked before each listener; once set,
    /// the remaining listeners are skipped.
    pub fn dispatch(&self, payload: &Value, stopped: Option<&AtomicBool>) -> DispatchReport {
        // Clone the list so listeners may (un)register from inside a callback
        let listeners: Vec<(ListenerId, StateCallback)> = self.listeners.read().clone();

        let mut report = DispatchReport::default();
        for (idx, (id, callback)) in listeners.iter().enumerate() {
            if stopped.map(|flag| flag.load(Ordering::SeqCst)).unwrap_or(false) {
                report.skipped = listeners.len() - idx;
                break;
            }

            match catch_unwind(AssertUnwindSafe(|| callback(payload))) {
                Ok(()) => report.delivered += 1,
                Err(panic) => {
                    report.failed += 1;
                    error!(listener = ?id, reason = %panic_message(panic.as_ref()), "listener panicked");
                }
            }
        }
        report
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_dispatch_reaches_all_listeners() {
        let registry = ListenerRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b"] {
            let seen = seen.clone();
            registry.register(Arc::new(move |state: &Value| {
                seen.lock().push(format!("{}:{}", tag, state["pot"]));
            }));
        }

        let report = registry.dispatch(&json!({"pot": 40.0}), None);
        assert_eq!(report, DispatchReport { delivered: 2, failed: 0, skipped: 0 });
        assert_eq!(*seen.lock(), vec!["a:40.0", "b:40.0"]);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let registry = ListenerRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        registry.register(Arc::new(|_: &Value| panic!("listener bug")));
        let counter = calls.clone();
        registry.register(Arc::new(move |_: &Value| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let report = registry.dispatch(&json!({}), None);
        assert_eq!(report.failed, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Still works on the next dispatch
        registry.dispatch(&json!({}), None);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unregister() {
        let registry = ListenerRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let id = registry.register(Arc::new(move |_: &Value| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(registry.is_empty());

        registry.dispatch(&json!({}), None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stop_flag_skips_remaining_listeners() {
        let registry = ListenerRegistry::new();
        let stopped = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicUsize::new(0));

        let flag = stopped.clone();
        registry.register(Arc::new(move |_: &Value| flag.store(true, Ordering::SeqCst)));
        let counter = calls.clone();
        registry.register(Arc::new(move |_: &Value| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let report = registry.dispatch(&json!({}), Some(&*stopped));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_listener_can_unregister_itself() {
        let registry = Arc::new(ListenerRegistry::new());
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));

        let reg = registry.clone();
        let own = slot.clone();
        let id = registry.register(Arc::new(move |_: &Value| {
            if let Some(id) = *own.lock() {
                reg.unregister(id);
            }
        }));
        *slot.lock() = Some(id);

        registry.dispatch(&json!({}), None);
        assert!(registry.is_empty());
    }
}
