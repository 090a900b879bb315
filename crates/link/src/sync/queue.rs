use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Mutex-protected FIFO shared between producer and consumer threads.
///
/// The lock is only held for the push/pop itself, never across I/O.
#[derive(Debug)]
pub struct GuardedQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Condvar,
}

impl<T> Default for GuardedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> GuardedQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    pub fn push(&self, value: T) {
        self.items.lock().push_back(value);
        self.available.notify_one();
    }

    /// Pushes unless the queue already holds `limit` items, in which case
    /// the value is handed back.
    pub fn try_push(&self, value: T, limit: usize) -> Result<(), T> {
        let mut items = self.items.lock();
        if items.len() >= limit {
            return Err(value);
        }
        items.push_back(value);
        drop(items);
        self.available.notify_one();
        Ok(())
    }

    /// Drops whatever is queued and leaves `value` as the only item.
    pub fn replace_all(&self, value: T) {
        let mut items = self.items.lock();
        items.clear();
        items.push_back(value);
        drop(items);
        self.available.notify_one();
    }

    pub fn try_pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Blocks until an item is available or `timeout` elapses.
    pub fn pop_wait(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();
        loop {
            if let Some(value) = items.pop_front() {
                return Some(value);
            }
            if self.available.wait_until(&mut items, deadline).timed_out() {
                return items.pop_front();
            }
        }
    }

    pub fn drain(&self) -> Vec<T> {
        self.items.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_preserves_fifo_order() {
        let queue = GuardedQueue::new();
        for i in 0..5 {
            queue.push(i);
        }
        let popped: Vec<_> = std::iter::from_fn(|| queue.try_pop()).collect();
        assert_eq!(popped, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_wait_times_out_on_empty_queue() {
        let queue: GuardedQueue<u32> = GuardedQueue::new();
        let start = Instant::now();
        assert_eq!(queue.pop_wait(Duration::from_millis(30)), None);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_pop_wait_wakes_on_push() {
        let queue = Arc::new(GuardedQueue::new());
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                queue.push("hello");
            })
        };

        let start = Instant::now();
        assert_eq!(queue.pop_wait(Duration::from_secs(5)), Some("hello"));
        assert!(start.elapsed() < Duration::from_secs(5));
        producer.join().unwrap();
    }

    #[test]
    fn test_try_push_respects_limit() {
        let queue = GuardedQueue::new();
        assert!(queue.try_push(1, 2).is_ok());
        assert!(queue.try_push(2, 2).is_ok());
        assert_eq!(queue.try_push(3, 2), Err(3));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_replace_all_keeps_only_latest() {
        let queue = GuardedQueue::new();
        queue.push(1);
        queue.push(2);
        queue.replace_all(3);
        assert_eq!(queue.drain(), vec![3]);
    }
}
