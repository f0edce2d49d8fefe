#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

struct QueueState<T> {
    items: VecDeque<T>,
    shutdown: bool,
}

/// Bounded blocking FIFO used between pipeline stages.
///
/// `push` blocks while the queue is full, `pop` blocks while it is empty;
/// both wait conditions include the shutdown flag so no waiter can be left
/// behind. After `shutdown`, pushes become no-ops and pops drain whatever
/// is still queued before returning `None`.
pub struct BoundedQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        BoundedQueue {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                shutdown: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, item: T) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        while state.items.len() >= self.capacity && !state.shutdown {
            state = match self.not_full.wait(state) {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        if state.shutdown {
            return;
        }
        state.items.push_back(item);
        self.not_empty.notify_one();
    }

    pub fn try_push(&self, item: T) -> bool {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.items.len() >= self.capacity || state.shutdown {
            return false;
        }
        state.items.push_back(item);
        self.not_empty.notify_one();
        true
    }

    pub fn pop(&self) -> Option<T> {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        while state.items.is_empty() && !state.shutdown {
            state = match self.not_empty.wait(state) {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        let item = state.items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// As `pop`, but gives up after `timeout`. Workers use this to run
    /// periodic maintenance while their input is idle.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        let (mut state, _timed_out) = match self
            .not_empty
            .wait_timeout_while(state, timeout, |s| s.items.is_empty() && !s.shutdown)
        {
            Ok((state, result)) => (state, result.timed_out()),
            Err(poisoned) => {
                let (state, result) = poisoned.into_inner();
                (state, result.timed_out())
            }
        };
        let item = state.items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Idempotent. Wakes every waiter; producers stop enqueueing and
    /// consumers drain the remainder.
    pub fn shutdown(&self) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.shutdown = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        match self.state.lock() {
            Ok(state) => state.shutdown,
            Err(poisoned) => poisoned.into_inner().shutdown,
        }
    }

    pub fn len(&self) -> usize {
        match self.state.lock() {
            Ok(state) => state.items.len(),
            Err(poisoned) => poisoned.into_inner().items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn keeps_fifo_order() {
        let queue = BoundedQueue::new(8);
        for i in 0..5 {
            queue.push(i);
        }
        for i in 0..5 {
            assert_eq!(queue.pop(), Some(i));
        }
    }

    #[test]
    fn try_push_refuses_when_full_or_shutdown() {
        let queue = BoundedQueue::new(2);
        assert!(queue.try_push(1));
        assert!(queue.try_push(2));
        assert!(!queue.try_push(3));
        queue.pop();
        assert!(queue.try_push(3));
        queue.shutdown();
        assert!(!queue.try_push(4));
    }

    #[test]
    fn pop_timeout_expires_on_empty_queue() {
        let queue: BoundedQueue<u32> = BoundedQueue::new(4);
        let started = Instant::now();
        assert_eq!(queue.pop_timeout(Duration::from_millis(50)), None);
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn shutdown_wakes_blocked_consumer() {
        let queue: Arc<BoundedQueue<u32>> = Arc::new(BoundedQueue::new(4));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };
        thread::sleep(Duration::from_millis(20));
        queue.shutdown();
        assert_eq!(consumer.join().expect("join consumer"), None);
    }

    #[test]
    fn shutdown_wakes_blocked_producer() {
        let queue: Arc<BoundedQueue<u32>> = Arc::new(BoundedQueue::new(1));
        queue.push(1);
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push(2))
        };
        thread::sleep(Duration::from_millis(20));
        queue.shutdown();
        producer.join().expect("join producer");
        // the blocked push was discarded; the original item drains
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn drains_remaining_items_after_shutdown() {
        let queue = BoundedQueue::new(8);
        queue.push("a");
        queue.push("b");
        queue.shutdown();
        queue.push("c");
        assert_eq!(queue.pop(), Some("a"));
        assert_eq!(queue.pop(), Some("b"));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn full_queue_applies_backpressure() {
        let queue: Arc<BoundedQueue<u32>> = Arc::new(BoundedQueue::new(2));
        queue.push(1);
        queue.push(2);
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                queue.push(3);
                3
            })
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(producer.join().expect("join producer"), 3);
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
    }
}
