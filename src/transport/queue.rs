//! Bounded, multi-producer single-consumer FIFO with drop-head overflow
//! (spec §3 `TransportQueue`, §4.3).

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::timeout;

use crate::types::Frame;

pub struct DropHeadQueue {
    capacity: usize,
    inner: Mutex<VecDeque<Frame>>,
    notify: Notify,
}

impl DropHeadQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            notify: Notify::new(),
        }
    }

    /// Enqueues `frame` at the tail. If full, discards the current head and
    /// retries once — the new frame is always enqueued (spec §4.3). Never
    /// blocks.
    pub fn push(&self, frame: Frame) {
        let mut guard = self.inner.lock().expect("queue mutex poisoned");
        if guard.len() >= self.capacity {
            guard.pop_front();
        }
        guard.push_back(frame);
        drop(guard);
        self.notify.notify_one();
    }

    /// Pops the head, waiting up to `wait` for a frame to arrive if the
    /// queue is currently empty. Returns `None` on timeout.
    pub async fn pop_wait(&self, wait: Duration) -> Option<Frame> {
        if let Some(frame) = self.pop_now() {
            return Some(frame);
        }
        let notified = self.notify.notified();
        tokio::pin!(notified);
        let _ = timeout(wait, &mut notified).await;
        self.pop_now()
    }

    fn pop_now(&self) -> Option<Frame> {
        self.inner.lock().expect("queue mutex poisoned").pop_front()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue mutex poisoned").len()
    }
}
