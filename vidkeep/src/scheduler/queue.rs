//! FIFO dispatch queue.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::domain::JobId;

/// Pending job ids in admission order.
///
/// The queue only orders dispatch; whether a popped job may still run is
/// decided by the registry's PENDING -> RUNNING transition.
#[derive(Default)]
pub struct JobQueue {
    items: Mutex<VecDeque<JobId>>,
    notify: Arc<Notify>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job and wake one idle worker. Ids already queued are ignored.
    pub fn push(&self, id: JobId) -> bool {
        {
            let mut items = self.items.lock();
            if items.contains(&id) {
                return false;
            }
            items.push_back(id);
        }
        self.notify.notify_one();
        true
    }

    pub fn pop(&self) -> Option<JobId> {
        self.items.lock().pop_front()
    }

    /// Drop a job from the queue, e.g. after it was cancelled while pending.
    pub fn remove(&self, id: &JobId) -> bool {
        let mut items = self.items.lock();
        match items.iter().position(|queued| queued == id) {
            Some(index) => items.remove(index).is_some(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Handle workers wait on for new work.
    pub fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }
}
