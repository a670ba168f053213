//! Subscription table and callback isolation.
//!
//! Handlers are stored per event name with a [`HandlerId`] for removal.
//! Dispatch works on a cloned snapshot so callbacks run without any table
//! lock held, and every invocation goes through [`invoke_isolated`] so a
//! failing or panicking callback cannot affect its siblings.

// ============================================================================
// Imports
// ============================================================================

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::trace;

use crate::error::{Error, Result};
use crate::identifiers::HandlerId;

use super::state::ConnectionState;

// ============================================================================
// Handler Types
// ============================================================================

/// Callback for a named inbound event.
pub type EventHandler = Arc<dyn Fn(&Value) -> Result<()> + Send + Sync>;

/// Callback for session state changes.
pub type StateHandler = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Callback for errors absorbed by the session.
pub type ErrorHandler = Arc<dyn Fn(&Error) + Send + Sync>;

// ============================================================================
// Isolation
// ============================================================================

/// Runs `f`, converting an `Err` or a panic into [`Error::Handler`].
pub fn invoke_isolated<F>(event: &str, f: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(Error::handler(event, e.to_string())),
        Err(panic) => Err(Error::handler(
            event,
            format!("panicked: {}", panic_message(panic.as_ref())),
        )),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

// ============================================================================
// HandlerRegistry
// ============================================================================

/// Ordered set of callbacks keyed by [`HandlerId`].
pub struct HandlerRegistry<H> {
    entries: Vec<(HandlerId, H)>,
}

impl<H> Default for HandlerRegistry<H> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<H: Clone> HandlerRegistry<H> {
    /// Registers a callback.
    pub fn add(&mut self, handler: H) -> HandlerId {
        let id = HandlerId::next();
        self.entries.push((id, handler));
        id
    }

    /// Removes a callback. Returns `true` if it was registered.
    pub fn remove(&mut self, id: HandlerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(existing, _)| *existing != id);
        self.entries.len() != before
    }

    /// Clones the current callbacks.
    #[must_use]
    pub fn snapshot(&self) -> Vec<H> {
        self.entries.iter().map(|(_, h)| h.clone()).collect()
    }

    /// Number of callbacks.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Route
// ============================================================================

/// What to do with an inbound event.
pub enum Route {
    /// Invoke these handlers.
    Deliver(Vec<EventHandler>),
    /// Held for the first subscriber.
    Buffered,
    /// Nobody listens and buffering is off.
    Dropped,
}

// ============================================================================
// SubscriptionTable
// ============================================================================

/// Event-name to handler table with a bounded offline buffer.
pub struct SubscriptionTable {
    handlers: FxHashMap<String, HandlerRegistry<EventHandler>>,
    pending: FxHashMap<String, VecDeque<Value>>,
    buffer_capacity: usize,
}

impl SubscriptionTable {
    /// Creates a table buffering up to `buffer_capacity` events per name.
    #[must_use]
    pub fn new(buffer_capacity: usize) -> Self {
        Self {
            handlers: FxHashMap::default(),
            pending: FxHashMap::default(),
            buffer_capacity,
        }
    }

    /// Registers `handler` for `event`.
    ///
    /// Returns the handler ID and any buffered events for the caller to
    /// replay, oldest first.
    pub fn subscribe(&mut self, event: &str, handler: EventHandler) -> (HandlerId, Vec<Value>) {
        let id = self.handlers.entry(event.to_string()).or_default().add(handler);
        let replay = self
            .pending
            .remove(event)
            .map(Vec::from)
            .unwrap_or_default();
        (id, replay)
    }

    /// Removes a handler. Returns `true` if it was registered for `event`.
    pub fn unsubscribe(&mut self, event: &str, id: HandlerId) -> bool {
        let Some(registry) = self.handlers.get_mut(event) else {
            return false;
        };
        let removed = registry.remove(id);
        if registry.is_empty() {
            self.handlers.remove(event);
        }
        removed
    }

    /// Decides how to deliver `payload`.
    pub fn route(&mut self, event: &str, payload: &Value) -> Route {
        if let Some(registry) = self.handlers.get(event)
            && !registry.is_empty()
        {
            return Route::Deliver(registry.snapshot());
        }

        if self.buffer_capacity == 0 {
            return Route::Dropped;
        }

        let buffer = self.pending.entry(event.to_string()).or_default();
        if buffer.len() >= self.buffer_capacity {
            buffer.pop_front();
        }
        buffer.push_back(payload.clone());
        trace!(event, buffered = buffer.len(), "Event buffered until a subscriber registers");
        Route::Buffered
    }

    /// Number of handlers for `event`.
    #[must_use]
    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers.get(event).map_or(0, HandlerRegistry::len)
    }

    /// Number of buffered events for `event`.
    #[must_use]
    pub fn buffered_count(&self, event: &str) -> usize {
        self.pending.get(event).map_or(0, VecDeque::len)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    fn counting(counter: &Arc<AtomicUsize>) -> EventHandler {
        let counter = Arc::clone(counter);
        Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_route_delivers_to_all_handlers() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut table = SubscriptionTable::new(0);
        table.subscribe("ReceiveMessage", counting(&counter));
        table.subscribe("ReceiveMessage", counting(&counter));

        let Route::Deliver(handlers) = table.route("ReceiveMessage", &json!({})) else {
            panic!("expected delivery");
        };
        for handler in handlers {
            handler(&json!({})).expect("ok");
        }
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut table = SubscriptionTable::new(0);
        let (id, _) = table.subscribe("ReceiveMessage", counting(&counter));

        assert!(table.unsubscribe("ReceiveMessage", id));
        assert!(!table.unsubscribe("ReceiveMessage", id));
        assert_eq!(table.handler_count("ReceiveMessage"), 0);
        assert!(matches!(table.route("ReceiveMessage", &json!({})), Route::Dropped));
    }

    #[test]
    fn test_buffer_replays_to_first_subscriber() {
        let mut table = SubscriptionTable::new(2);
        for n in 0..3 {
            assert!(matches!(
                table.route("ReceiveNotification", &json!(n)),
                Route::Buffered
            ));
        }
        assert_eq!(table.buffered_count("ReceiveNotification"), 2);

        let counter = Arc::new(AtomicUsize::new(0));
        let (_, replay) = table.subscribe("ReceiveNotification", counting(&counter));
        assert_eq!(replay, vec![json!(1), json!(2)]);

        let (_, second) = table.subscribe("ReceiveNotification", counting(&counter));
        assert!(second.is_empty());
    }

    #[test]
    fn test_invoke_isolated_contains_errors() {
        let err = invoke_isolated("ReceiveMessage", || Err(Error::protocol("bad payload"))).unwrap_err();
        assert!(matches!(err, Error::Handler { .. }));
    }

    #[test]
    fn test_invoke_isolated_contains_panics() {
        let err = invoke_isolated("ReceiveMessage", || panic!("subscriber bug")).unwrap_err();
        assert!(err.to_string().contains("subscriber bug"));
    }

    #[test]
    fn test_registry_remove() {
        let mut registry: HandlerRegistry<StateHandler> = HandlerRegistry::default();
        let id = registry.add(Arc::new(|_| {}));
        registry.add(Arc::new(|_| {}));

        assert!(registry.remove(id));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.snapshot().len(), 1);
    }
}
