//! Concurrent FIFO used between pipeline stages.
//!
//! Producers push without blocking and are expected to poll [`len`] against
//! a high-water mark; consumers block in [`wait_and_pop`] until an item
//! arrives or the queue is closed. Closing wakes every waiter.
//!
//! [`len`]: SharedQueue::len
//! [`wait_and_pop`]: SharedQueue::wait_and_pop

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

struct Inner<T> {
    data: Mutex<State<T>>,
    cond: Condvar,
}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

pub struct SharedQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for SharedQueue<T> {
    fn clone(&self) -> Self {
        SharedQueue {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for SharedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SharedQueue<T> {
    pub fn new() -> Self {
        SharedQueue {
            inner: Arc::new(Inner {
                data: Mutex::new(State {
                    items: VecDeque::new(),
                    closed: false,
                }),
                cond: Condvar::new(),
            }),
        }
    }

    /// Enqueues an item. Never blocks; items pushed after `close` are
    /// dropped silently.
    pub fn push(&self, item: T) {
        let mut state = self.inner.data.lock();
        if state.closed {
            return;
        }
        state.items.push_back(item);
        self.inner.cond.notify_one();
    }

    /// Blocks until an item is available or the queue has been closed and
    /// drained. `None` is the end sentinel.
    pub fn wait_and_pop(&self) -> Option<T> {
        let mut state = self.inner.data.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            self.inner.cond.wait(&mut state);
        }
    }

    /// Pops without blocking; `None` means empty or closed.
    pub fn try_pop(&self) -> Option<T> {
        self.inner.data.lock().items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.data.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes the queue and wakes all waiters. Already queued items remain
    /// poppable; after the drain every `wait_and_pop` returns `None`.
    pub fn close(&self) {
        let mut state = self.inner.data.lock();
        state.closed = true;
        self.inner.cond.notify_all();
    }
}
