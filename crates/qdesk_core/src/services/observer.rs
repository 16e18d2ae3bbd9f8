//! Listener registration and isolated dispatch.

use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::models::{QueryResult, ServerConfig};

/// Receives query engine notifications.
///
/// Callbacks run synchronously on the query worker. A slow listener delays
/// the end of the query cycle, so listeners should hand work off rather
/// than block.
pub trait QueryListener: Send + Sync {
    /// A query is about to be sent.
    fn sending_query(&self, _server: &ServerConfig, _title: &str) {}

    /// A query finished, failed or was cancelled.
    fn query_result_returned(&self, _server: &ServerConfig, _result: &QueryResult) {}

    /// The selected server changed.
    fn selected_server_changed(&self, _server: Option<&str>) {}

    /// The list of known servers changed.
    fn server_listing_changed(&self, _servers: &[String]) {}

    /// A watched expression was added, edited or removed.
    fn watched_expressions_modified(&self) {}

    /// Watched expressions were re-evaluated.
    fn watched_expressions_refreshed(&self) {}
}

/// Ordered set of observers with per-observer panic isolation.
pub struct ObserverRegistry<L: ?Sized> {
    observers: RwLock<Vec<Arc<L>>>,
}

impl<L: ?Sized> Default for ObserverRegistry<L> {
    fn default() -> Self {
        Self { observers: RwLock::new(Vec::new()) }
    }
}

impl<L: ?Sized> ObserverRegistry<L> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer.
    pub fn add(&self, observer: Arc<L>) {
        self.observers.write().push(observer);
    }

    /// Unregister an observer. Returns true if it was registered.
    pub fn remove(&self, observer: &Arc<L>) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|o| !Arc::ptr_eq(o, observer));
        observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    /// Call `f` on every observer.
    ///
    /// Observers are snapshotted first so callbacks may register or remove
    /// observers. A panicking observer is logged and skipped. Returns true
    /// only if every observer returned normally.
    pub fn notify(&self, event: &'static str, f: impl Fn(&L)) -> bool {
        let observers: Vec<Arc<L>> = self.observers.read().clone();
        let mut all_ok = true;
        for (index, observer) in observers.iter().enumerate() {
            let outcome = catch_unwind(AssertUnwindSafe(|| f(observer)));
            if let Err(panic) = outcome {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown".to_string());
                tracing::error!(event, listener = index, reason = %reason, "Listener panicked");
                all_ok = false;
            }
        }
        all_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Ping: Send + Sync {
        fn ping(&self);
    }

    struct Counter(AtomicUsize);

    impl Ping for Counter {
        fn ping(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Exploding;

    impl Ping for Exploding {
        fn ping(&self) {
            panic!("boom");
        }
    }

    #[test]
    fn test_panicking_observer_does_not_block_others() {
        let registry: ObserverRegistry<dyn Ping> = ObserverRegistry::new();
        let first = Arc::new(Counter(AtomicUsize::new(0)));
        let last = Arc::new(Counter(AtomicUsize::new(0)));
        registry.add(first.clone());
        registry.add(Arc::new(Exploding));
        registry.add(last.clone());

        let ok = registry.notify("ping", |o| o.ping());

        assert!(!ok);
        assert_eq!(first.0.load(Ordering::SeqCst), 1);
        assert_eq!(last.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_notify_reports_success() {
        let registry: ObserverRegistry<dyn Ping> = ObserverRegistry::new();
        registry.add(Arc::new(Counter(AtomicUsize::new(0))));
        assert!(registry.notify("ping", |o| o.ping()));
        // Empty registry trivially succeeds.
        assert!(ObserverRegistry::<dyn Ping>::new().notify("ping", |o| o.ping()));
    }

    #[test]
    fn test_remove_by_identity() {
        let registry: ObserverRegistry<dyn Ping> = ObserverRegistry::new();
        let a: Arc<dyn Ping> = Arc::new(Counter(AtomicUsize::new(0)));
        let b: Arc<dyn Ping> = Arc::new(Counter(AtomicUsize::new(0)));
        registry.add(a.clone());
        registry.add(b.clone());

        assert!(registry.remove(&a));
        assert!(!registry.remove(&a));
        assert_eq!(registry.len(), 1);
    }
}
