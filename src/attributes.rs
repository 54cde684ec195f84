//! Per-exchange typed attribute bag: a mutable typed key/value store that
//! lives for the whole exchange, used to propagate cross-cutting state
//! (an authenticated identity, a trace id) between before-actions, the
//! handler, and after-actions.

use std::any::{Any, TypeId};
use std::collections::HashMap;

/// A type-keyed slot store. One value per type is kept, matching the common
/// "attach one typed fact" use (e.g. an authenticated role struct) rather
/// than a general string-keyed map, which would need runtime downcasting
/// errors on every read.
#[derive(Default)]
pub struct Attributes {
    slots: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Attributes {
    pub fn new() -> Attributes {
        Attributes { slots: HashMap::new() }
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) -> Option<T> {
        self.slots
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|b| *b)
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.slots.get(&TypeId::of::<T>()).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any + Send + Sync>(&mut self) -> Option<&mut T> {
        self.slots.get_mut(&TypeId::of::<T>()).and_then(|v| v.downcast_mut::<T>())
    }

    pub fn remove<T: Any + Send + Sync>(&mut self) -> Option<T> {
        self.slots.remove(&TypeId::of::<T>()).and_then(|v| v.downcast::<T>().ok()).map(|b| *b)
    }
}

impl std::fmt::Debug for Attributes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Attributes {{ {} slot(s) }}", self.slots.len())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Role(&'static str);

    #[test]
    fn round_trips_a_typed_value() {
        let mut attrs = Attributes::new();
        assert!(attrs.get::<Role>().is_none());
        attrs.insert(Role("admin"));
        assert_eq!(attrs.get::<Role>(), Some(&Role("admin")));
    }

    #[test]
    fn insert_replaces_and_returns_the_previous_value() {
        let mut attrs = Attributes::new();
        attrs.insert(Role("admin"));
        let prev = attrs.insert(Role("guest"));
        assert_eq!(prev, Some(Role("admin")));
        assert_eq!(attrs.get::<Role>(), Some(&Role("guest")));
    }
}
