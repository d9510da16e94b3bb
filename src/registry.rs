//! The generic resource registry (§4.2).
//!
//! `managerTemplate<T>` in the original becomes `Registry<T>`, generic over
//! the concrete resource type. The only shared behavior every resource has
//! — name, readiness, a parameter map — lives in `ResourceHeader`, embedded
//! by composition rather than modeled through inheritance (§9).

use std::collections::HashMap;

use ahash::AHashMap;
use glam::Vec3;

use crate::signal::{Signal, SignalToken};

/// One entry of a resource's lifetime-bound parameter map. Keys are
/// precomputed string hashes (`hash_key`), not the strings themselves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    Bool(bool),
    U32(u32),
    F32(f32),
    Vec3(Vec3),
}

/// The behavior every `GenericResource` shares: name, readiness, and a
/// parameter map. Concrete resource types embed this rather than inherit
/// from a common base.
#[derive(Debug, Clone)]
pub struct ResourceHeader {
    name: String,
    class: &'static str,
    ready: bool,
    params: HashMap<u64, ParamValue>,
}

impl ResourceHeader {
    pub fn new(name: impl Into<String>, class: &'static str) -> Self {
        Self {
            name: name.into(),
            class,
            ready: false,
            params: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class(&self) -> &'static str {
        self.class
    }

    pub fn ready(&self) -> bool {
        self.ready
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    pub fn param(&self, key: u64) -> Option<ParamValue> {
        self.params.get(&key).copied()
    }

    pub fn set_param(&mut self, key: u64, value: ParamValue) {
        self.params.insert(key, value);
    }
}

/// Anything a `Registry` can manage must expose its header.
pub trait Resource {
    fn header(&self) -> &ResourceHeader;
    fn header_mut(&mut self) -> &mut ResourceHeader;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Created,
    Changed,
    Removed,
}

/// A typed, named store of one resource kind, with change-notification.
///
/// Invariants: names are unique within a registry; a resource is only
/// observable (`get`) while `ready == true` between its creation and an
/// in-progress resize; `resize` always toggles `ready` false then true and
/// always fires `Changed` on completion, even if the caller-provided resize
/// closure did not actually change anything observable.
pub struct Registry<T: Resource> {
    items: AHashMap<String, T>,
    subscribers: AHashMap<(String, EventKind), Signal<()>>,
}

impl<T: Resource> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Resource> Registry<T> {
    pub fn new() -> Self {
        Self {
            items: AHashMap::new(),
            subscribers: AHashMap::new(),
        }
    }

    /// Build a new resource by name. If `name` already exists, the
    /// existing resource is returned unchanged (a recovered
    /// `ResourceAlreadyExists`); `builder` is not called in that case.
    pub fn build(&mut self, name: &str, builder: impl FnOnce() -> T) -> &T {
        if !self.items.contains_key(name) {
            let mut resource = builder();
            resource.header_mut().set_ready(true);
            self.items.insert(name.to_string(), resource);
            self.notify(name, EventKind::Created);
        } else {
            log::warn!("resource {name:?} already exists, returning existing instance");
        }

        self.items.get(name).expect("just inserted or pre-existing")
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.items.get(name).filter(|item| item.header().ready())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut T> {
        self.items.get_mut(name).filter(|item| item.header().ready())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.items.contains_key(name)
    }

    /// Destructively rebuild a resource in place. `ready` is false for the
    /// duration of `rebuild`; subscribers are notified with `Changed` only
    /// after `ready` is restored to true.
    pub fn resize(&mut self, name: &str, rebuild: impl FnOnce(T) -> T) -> bool {
        let Some(existing) = self.items.remove(name) else {
            log::warn!("resize of unknown resource {name:?}");
            return false;
        };

        let mut rebuilt = rebuild(existing);
        rebuilt.header_mut().set_ready(true);
        self.items.insert(name.to_string(), rebuilt);
        self.notify(name, EventKind::Changed);
        true
    }

    pub fn remove(&mut self, name: &str) -> Option<T> {
        let removed = self.items.remove(name);
        if removed.is_some() {
            self.notify(name, EventKind::Removed);
        }
        removed
    }

    pub fn for_each(&self, mut visit: impl FnMut(&str, &T)) {
        for (name, item) in &self.items {
            visit(name, item);
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Subscribe to one event kind on one named resource. Delivery is
    /// synchronous on whichever thread causes the event (the scheduler
    /// thread, in practice); handlers may themselves trigger further
    /// resizes, including on this same registry.
    pub fn subscribe(
        &mut self,
        name: &str,
        kind: EventKind,
        callback: impl FnMut(()) + 'static,
    ) -> SignalToken<()> {
        self.subscribers
            .entry((name.to_string(), kind))
            .or_default()
            .connect(callback)
    }

    fn notify(&self, name: &str, kind: EventKind) {
        if let Some(signal) = self.subscribers.get(&(name.to_string(), kind)) {
            signal.emit(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Dummy {
        header: ResourceHeader,
        value: u32,
    }

    impl Resource for Dummy {
        fn header(&self) -> &ResourceHeader {
            &self.header
        }
        fn header_mut(&mut self) -> &mut ResourceHeader {
            &mut self.header
        }
    }

    #[test]
    fn build_is_idempotent_by_name() {
        let mut registry: Registry<Dummy> = Registry::new();

        registry.build("a", || Dummy {
            header: ResourceHeader::new("a", "dummy"),
            value: 1,
        });
        registry.build("a", || Dummy {
            header: ResourceHeader::new("a", "dummy"),
            value: 2,
        });

        assert_eq!(registry.get("a").unwrap().value, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn get_hides_not_ready_resources() {
        let mut registry: Registry<Dummy> = Registry::new();
        registry.build("a", || Dummy {
            header: ResourceHeader::new("a", "dummy"),
            value: 1,
        });

        registry.get_mut("a").unwrap().header.set_ready(false);
        assert!(registry.get("a").is_none());
        assert!(registry.exists("a"));
    }

    #[test]
    fn resize_always_notifies_changed() {
        let mut registry: Registry<Dummy> = Registry::new();
        registry.build("a", || Dummy {
            header: ResourceHeader::new("a", "dummy"),
            value: 1,
        });

        let notified = Rc::new(Cell::new(false));
        let notified_clone = Rc::clone(&notified);
        let _token = registry.subscribe("a", EventKind::Changed, move |_| {
            notified_clone.set(true)
        });

        registry.resize("a", |mut dummy| {
            dummy.value = 99;
            dummy
        });

        assert!(notified.get());
        assert_eq!(registry.get("a").unwrap().value, 99);
    }

    #[test]
    fn remove_notifies_and_drops() {
        let mut registry: Registry<Dummy> = Registry::new();
        registry.build("a", || Dummy {
            header: ResourceHeader::new("a", "dummy"),
            value: 1,
        });

        let removed_count = Rc::new(Cell::new(0));
        let removed_clone = Rc::clone(&removed_count);
        let _token = registry.subscribe("a", EventKind::Removed, move |_| {
            removed_clone.set(removed_clone.get() + 1)
        });

        assert!(registry.remove("a").is_some());
        assert_eq!(removed_count.get(), 1);
        assert!(!registry.exists("a"));
    }
}
