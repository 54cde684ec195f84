//! Event emitter/hub: subscribers register for `ResponseSent`/
//! `RequestHeadParsed` observations; emission iterates a stable snapshot
//! so a listener added mid-emission never observes a torn iteration.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::time::Instant;

/// A `ResponseSent` observation: `bytes` counts the whole wire write —
/// status line, headers, and body.
#[derive(Debug, Clone)]
pub struct ResponseSent {
    pub start: Instant,
    pub stop: Instant,
    pub bytes: u64,
}

/// A `RequestHeadParsed` observation, emitted once the request line and
/// headers have been parsed.
#[derive(Debug, Clone)]
pub struct RequestHeadParsed {
    pub method: crate::method::Method,
    pub target: String,
}

/// Implemented by anything that can receive emitted events of type `E`.
/// `Send + Sync` is required since listeners are shared across connection
/// tasks.
pub trait Listener<E>: Send + Sync {
    fn on_event(&self, event: &E);
}

impl<E, F: Fn(&E) + Send + Sync> Listener<E> for F {
    fn on_event(&self, event: &E) {
        self(event)
    }
}

type TypedListeners = HashMap<TypeId, Vec<Arc<dyn Any + Send + Sync>>>;

/// The emitter/hub. A concurrent map from event-type id to a set of typed
/// listener trait objects; subscription holds the write lock only long
/// enough to push, never across an `.await`.
#[derive(Default)]
pub struct Events {
    listeners: RwLock<TypedListeners>,
}

impl Events {
    pub fn new() -> Events {
        Events { listeners: RwLock::new(HashMap::new()) }
    }

    /// Subscribes `listener` to every emission of event type `E`.
    pub fn subscribe<E: 'static>(&self, listener: impl Listener<E> + 'static) {
        // `dyn Listener<E>` needs the auto traits spelled out explicitly to
        // be stored as `Arc<dyn Any + Send + Sync>` below: supertrait bounds
        // on the trait itself don't carry over to the trait object type.
        let typed: Arc<dyn Listener<E> + Send + Sync> = Arc::new(listener);
        let boxed: Arc<dyn Any + Send + Sync> = Arc::new(typed);
        let mut guard = self.listeners.write().expect("event listener table lock poisoned");
        guard.entry(TypeId::of::<E>()).or_default().push(boxed);
    }

    /// Emits `event` synchronously to every listener subscribed to `E`, in
    /// subscription order, over a snapshot taken under the lock.
    pub fn emit<E: 'static>(&self, event: &E) {
        let snapshot: Vec<Arc<dyn Any + Send + Sync>> = {
            let guard = self.listeners.read().expect("event listener table lock poisoned");
            match guard.get(&TypeId::of::<E>()) {
                Some(v) => v.clone(),
                None => return,
            }
        };
        for boxed in &snapshot {
            if let Some(listener) = boxed.downcast_ref::<Arc<dyn Listener<E> + Send + Sync>>() {
                listener.on_event(event);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn listeners_receive_emitted_events() {
        let events = Events::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counted = count.clone();
        events.subscribe::<RequestHeadParsed>(move |_: &RequestHeadParsed| {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        events.emit(&RequestHeadParsed { method: crate::method::Method::get(), target: "/x".into() });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unrelated_event_types_do_not_cross_deliver() {
        let events = Events::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        events.subscribe::<RequestHeadParsed>(move |_: &RequestHeadParsed| {
            seen2.fetch_add(1, Ordering::SeqCst);
        });
        events.emit(&ResponseSent { start: Instant::now(), stop: Instant::now(), bytes: 10 });
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }
}
