//! Snapshot fan-out shared by the state owners.
//!
//! Every state container (config store, connection manager, run session)
//! is the single writer of its state and hands out clones to any number of
//! subscribers. A subscriber gets the current snapshot as soon as it
//! subscribes and then one message per change. Dropping the receiver
//! unsubscribes.

use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Receiving end handed to subscribers
pub type Subscription<T> = mpsc::UnboundedReceiver<T>;

pub struct Observers<T: Clone> {
    senders: Mutex<Vec<mpsc::UnboundedSender<T>>>,
}

impl<T: Clone> Observers<T> {
    pub fn new() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }

    fn senders(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<T>>> {
        self.senders.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a subscriber, seeding it with `current`.
    ///
    /// Callers hold their own state lock while calling this so no change can
    /// slip in between the seed and the registration.
    pub fn subscribe(&self, current: T) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(current);
        self.senders().push(tx);
        rx
    }

    /// Deliver a snapshot to every live subscriber, pruning dropped ones
    pub fn notify(&self, snapshot: &T) {
        self.senders().retain(|tx| tx.send(snapshot.clone()).is_ok());
    }

    pub fn len(&self) -> usize {
        self.senders().iter().filter(|tx| !tx.is_closed()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for Observers<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_gets_current_then_changes() {
        let observers = Observers::new();
        let mut rx = observers.subscribe(1);
        observers.notify(&2);
        observers.notify(&3);

        assert_eq!(rx.try_recv().unwrap(), 1);
        assert_eq!(rx.try_recv().unwrap(), 2);
        assert_eq!(rx.try_recv().unwrap(), 3);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let observers = Observers::new();
        let mut kept = observers.subscribe("a");
        let dropped = observers.subscribe("a");
        assert_eq!(observers.len(), 2);

        drop(dropped);
        observers.notify(&"b");
        assert_eq!(observers.len(), 1);

        assert_eq!(kept.try_recv().unwrap(), "a");
        assert_eq!(kept.try_recv().unwrap(), "b");
    }
}
