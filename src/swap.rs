//! Wait-free latest-value channel
//!
//! A triple buffer: the sender and receiver each own one slot and trade a third through a single
//! atomic. Used to publish the voice table to the render callback without locking it and without
//! ever freeing memory on the receiving side.

use std::{
    cell::UnsafeCell,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

/// Create a channel whose receiver initially observes `initial`
pub fn channel<T: Clone>(initial: T) -> (Sender<T>, Receiver<T>) {
    let shared = Arc::new(Shared {
        slots: [
            UnsafeCell::new(initial.clone()),
            UnsafeCell::new(initial.clone()),
            UnsafeCell::new(initial),
        ],
        shared: AtomicUsize::new(1),
    });
    (
        Sender {
            shared: shared.clone(),
            index: 0,
        },
        Receiver { shared, index: 2 },
    )
}

struct Shared<T> {
    slots: [UnsafeCell<T>; 3],
    /// Index of the slot in flight, plus `FRESH_BIT` if the receiver hasn't seen it yet
    shared: AtomicUsize,
}

unsafe impl<T: Send> Sync for Shared<T> {}

/// Publishing half of a [`channel`]
pub struct Sender<T> {
    shared: Arc<Shared<T>>,
    index: usize,
}

impl<T> Sender<T> {
    /// Make `value` the newest value available to the receiver
    ///
    /// Returns whatever previously occupied the sender's slot, so that it is dropped on this
    /// thread rather than the receiver's.
    pub fn send(&mut self, value: T) -> T {
        let old = unsafe { std::mem::replace(&mut *self.shared.slots[self.index].get(), value) };
        self.index = self
            .shared
            .shared
            .swap(self.index | FRESH_BIT, Ordering::AcqRel)
            & INDEX_MASK;
        old
    }
}

impl<T: Clone> Sender<T> {
    /// Overwrite every slot the receiver can no longer observe with `placeholder`
    ///
    /// The displaced values are dropped on this thread. Returns `false` if the receiver has yet to
    /// adopt the newest value, in which case the value it still holds stays alive until a later
    /// call.
    pub fn reclaim(&mut self, placeholder: &T) -> bool {
        unsafe {
            *self.shared.slots[self.index].get() = placeholder.clone();
        }
        let current = self.shared.shared.load(Ordering::Acquire);
        if current & FRESH_BIT != 0 {
            return false;
        }
        // The receiver only swaps fresh slots, so a stale one can be traded for ours
        if self
            .shared
            .shared
            .compare_exchange(current, self.index, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.index = current;
        unsafe {
            *self.shared.slots[self.index].get() = placeholder.clone();
        }
        true
    }
}

unsafe impl<T: Send> Send for Sender<T> {}

/// Receiving half of a [`channel`]
pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
    index: usize,
}

impl<T> Receiver<T> {
    /// Adopt the newest sent value, if any. Returns whether anything changed.
    pub fn refresh(&mut self) -> bool {
        if self.shared.shared.load(Ordering::Relaxed) & FRESH_BIT == 0 {
            return false;
        }
        self.index = self.shared.shared.swap(self.index, Ordering::AcqRel) & INDEX_MASK;
        true
    }

    /// The value adopted by the most recent `refresh`
    pub fn get(&self) -> &T {
        unsafe { &*self.shared.slots[self.index].get() }
    }
}

unsafe impl<T: Send> Send for Receiver<T> {}

const FRESH_BIT: usize = 0b100;
const INDEX_MASK: usize = 0b011;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_wins() {
        let (mut tx, mut rx) = channel(0);
        assert!(!rx.refresh());
        assert_eq!(*rx.get(), 0);
        tx.send(1);
        tx.send(2);
        assert_eq!(*rx.get(), 0);
        assert!(rx.refresh());
        assert_eq!(*rx.get(), 2);
        assert!(!rx.refresh());
        assert_eq!(*rx.get(), 2);
    }

    #[test]
    fn old_values_return_to_sender() {
        let (mut tx, mut rx) = channel(String::from("a"));
        assert_eq!(tx.send("b".into()), "a");
        assert!(rx.refresh());
        assert_eq!(tx.send("c".into()), "a");
        assert_eq!(tx.send("d".into()), "a");
        // "c" was superseded before the receiver saw it
        assert_eq!(tx.send("e".into()), "c");
        assert!(rx.refresh());
        assert_eq!(rx.get(), "e");
    }

    #[test]
    fn reclaim_releases_stale_values() {
        let value = Arc::new(());
        let weak = Arc::downgrade(&value);
        let empty = Arc::new(());
        let (mut tx, mut rx) = channel(empty.clone());
        drop(tx.send(value));
        assert!(rx.refresh());
        drop(tx.send(empty.clone()));
        // The receiver still holds the old value
        assert!(!tx.reclaim(&empty));
        assert!(weak.upgrade().is_some());
        assert!(rx.refresh());
        assert!(tx.reclaim(&empty));
        assert!(weak.upgrade().is_none());
        assert!(!rx.refresh());
        assert!(Arc::ptr_eq(rx.get(), &empty));
    }
}
