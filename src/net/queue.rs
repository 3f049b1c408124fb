//! Bounded FIFO between the acceptor and the worker.
//!
//! # Design Decisions
//! - Drop-on-overflow: a full queue rejects the newest arrival instead of
//!   blocking the reactor thread
//! - The queue mutex and the wake mutex are separate, so the worker can sleep
//!   on the condition variable without holding up pushes

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Default number of sessions that may wait for the worker.
pub const MAX_SESSION_QUEUE_LENGTH: usize = 16;

/// Capacity-bounded, thread-safe FIFO with a wake-up signal.
#[derive(Debug)]
pub struct SessionQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    wake_lock: Mutex<()>,
    wake: Condvar,
}

impl<T> SessionQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            wake_lock: Mutex::new(()),
            wake: Condvar::new(),
        }
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `item` unless the queue is full. A rejected item is dropped.
    pub fn push(&self, item: T) -> bool {
        let size = {
            let mut items = self.items();
            if items.len() >= self.capacity {
                None
            } else {
                items.push_back(item);
                Some(items.len())
            }
        };

        match size {
            Some(size) => {
                self.wake_one();
                tracing::debug!(queue_len = size, "Put on queue");
                true
            }
            None => {
                tracing::debug!(capacity = self.capacity, "Queue is overflown, dropping session");
                false
            }
        }
    }

    /// Remove the oldest item, if any.
    pub fn pop(&self) -> Option<T> {
        let (item, left) = {
            let mut items = self.items();
            let item = items.pop_front()?;
            (item, items.len())
        };
        tracing::debug!(queue_len = left, "Found connection on queue");
        Some(item)
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sleep until the queue is non-empty or `timeout` elapses.
    ///
    /// Returns `true` when woken with work available.
    pub fn wait_for_item(&self, timeout: Duration) -> bool {
        let guard = self.wake_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (_guard, result) = self
            .wake
            .wait_timeout_while(guard, timeout, |_| self.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        !result.timed_out()
    }

    fn wake_one(&self) {
        let _guard = self.wake_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.wake.notify_one();
    }

    /// Wake every waiter, e.g. so a stopping worker re-checks its flag.
    pub fn wake_all(&self) {
        let _guard = self.wake_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.wake.notify_all();
    }
}
