//! Bounded FIFO with a suspending push.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

/// A fixed-capacity FIFO shared between async callers.
///
/// Design:
/// - Critical sections are short and never cross an `.await`, so a std
///   `Mutex` is enough and the `try_*` operations stay synchronous.
/// - `push` waits on `space` while the queue is full. Every pop wakes all
///   waiters; losers of the race simply wait again.
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    space: Notify,
}

impl<T> BoundedQueue<T> {
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "bounded queue capacity must be at least 1");
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            space: Notify::new(),
        }
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append without waiting. Hands the item back when full.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        let mut items = self.items();
        if items.len() >= self.capacity {
            return Err(item);
        }
        items.push_back(item);
        Ok(())
    }

    /// Append, suspending while the queue is full.
    ///
    /// Cancel-safe in the sense that dropping the future before it completes
    /// drops the item without ever having enqueued it.
    pub async fn push(&self, item: T) {
        let mut item = item;
        loop {
            // 先に登録してから判定する（pop の通知を取りこぼさないため）
            let notified = self.space.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_push(item) {
                Ok(()) => return,
                Err(back) => item = back,
            }
            notified.await;
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        let item = self.items().pop_front();
        if item.is_some() {
            self.space.notify_waiters();
        }
        item
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

    /// Give back buffer memory if the queue is empty.
    pub fn shrink(&self) {
        let mut items = self.items();
        if items.is_empty() {
            items.shrink_to_fit();
        }
    }
}
