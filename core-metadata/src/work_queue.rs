//! Bounded best-effort work queue.
//!
//! Producers never wait: ids offered while the queue is full are dropped. The
//! consumer blocks in [`WorkQueue::take`] until an id arrives or its
//! cancellation token fires.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct WorkQueue {
    items: Mutex<VecDeque<String>>,
    capacity: usize,
    notify: Notify,
}

impl WorkQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueue as many ids as fit. Returns how many were accepted.
    pub fn offer<I, S>(&self, ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let accepted = {
            let mut items = self.lock();
            let mut accepted = 0;
            for id in ids {
                if items.len() >= self.capacity {
                    break;
                }
                items.push_back(id.into());
                accepted += 1;
            }
            accepted
        };

        for _ in 0..accepted {
            self.notify.notify_one();
        }
        accepted
    }

    /// Drop every pending id.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn try_take(&self) -> Option<String> {
        self.lock().pop_front()
    }

    /// Wait for the next id. Returns `None` once `cancel` fires.
    pub async fn take(&self, cancel: &CancellationToken) -> Option<String> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            if let Some(id) = self.try_take() {
                return Some(id);
            }
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = self.notify.notified() => {}
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<String>> {
        // A panic while holding the lock cannot leave the deque half-updated.
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
