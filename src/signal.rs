//! A tiny hand-rolled signal/slot hub, replacing the header-only signal
//! library the original implementation pulls in. Delivery is synchronous:
//! `emit` calls every connected slot inline, on the caller's thread, before
//! returning. `connect` returns a token that disconnects the slot when
//! dropped.
//!
//! Handlers are allowed to be re-entrant: connecting a new slot, or letting
//! a token drop, from inside a slot callback does not panic or corrupt the
//! subscriber list currently being iterated. This is required by the
//! scheduler, whose resource-change notifications may themselves trigger
//! further resizes.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

type Slot<T> = Rc<RefCell<dyn FnMut(T)>>;

struct Inner<T> {
    next_id: u64,
    slots: Vec<(u64, Slot<T>)>,
}

/// A synchronous broadcast channel for event payloads of type `T`.
pub struct Signal<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + 'static> Signal<T> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                next_id: 0,
                slots: Vec::new(),
            })),
        }
    }

    /// Subscribe a callback. The returned token must be kept alive for as
    /// long as the subscription should exist; dropping it disconnects.
    pub fn connect(&self, callback: impl FnMut(T) + 'static) -> SignalToken<T> {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        inner
            .slots
            .push((id, Rc::new(RefCell::new(callback)) as Slot<T>));

        SignalToken {
            id,
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Invoke every connected slot, in connection order, with a clone of
    /// `value`. Slots are snapshotted before any are called, so a slot that
    /// connects or disconnects during emission does not affect this
    /// emission.
    pub fn emit(&self, value: T) {
        let snapshot: Vec<Slot<T>> = {
            let inner = self.inner.borrow();
            inner.slots.iter().map(|(_, slot)| Rc::clone(slot)).collect()
        };

        for slot in snapshot {
            slot.borrow_mut()(value.clone());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().slots.len()
    }
}

/// Disconnects its slot from the originating `Signal` on drop.
pub struct SignalToken<T> {
    id: u64,
    inner: Weak<RefCell<Inner<T>>>,
}

impl<T> Drop for SignalToken<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.borrow_mut().slots.retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn emits_to_connected_slots_in_order() {
        let signal: Signal<i32> = Signal::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let log_a = Rc::clone(&log);
        let _token_a = signal.connect(move |value| log_a.borrow_mut().push(("a", value)));
        let log_b = Rc::clone(&log);
        let _token_b = signal.connect(move |value| log_b.borrow_mut().push(("b", value)));

        signal.emit(7);

        assert_eq!(*log.borrow(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn dropping_token_disconnects() {
        let signal: Signal<i32> = Signal::new();
        let count = Rc::new(Cell::new(0));

        let count_clone = Rc::clone(&count);
        let token = signal.connect(move |_| count_clone.set(count_clone.get() + 1));

        signal.emit(1);
        assert_eq!(count.get(), 1);

        drop(token);
        signal.emit(1);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn reentrant_connect_during_emit_is_safe() {
        let signal: Signal<i32> = Signal::new();
        let tokens: Rc<RefCell<Vec<SignalToken<i32>>>> = Rc::new(RefCell::new(Vec::new()));

        let signal_clone = signal.clone();
        let tokens_clone = Rc::clone(&tokens);
        let _token = signal.connect(move |_| {
            let new_token = signal_clone.connect(|_| {});
            tokens_clone.borrow_mut().push(new_token);
        });

        signal.emit(1);
        assert_eq!(signal.subscriber_count(), 2);
    }
}
