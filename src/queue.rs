use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Fixed-capacity blocking FIFO shared between pipeline stages
///
/// Producers block while the queue is full and consumers block while it is
/// empty. `stop()` wakes everybody: pending pushes fail and hand the item
/// back, pops keep draining what is left and then report `None`.
pub struct BoundedQueue<T> {
    name: &'static str,
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    stats: QueueStats,
}

struct Inner<T> {
    items: VecDeque<T>,
    stopped: bool,
}

/// Returned by `push` once the queue has been stopped
pub struct Stopped<T>(pub T);

impl<T> fmt::Debug for Stopped<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Stopped(..)")
    }
}

/// Reason a non-blocking push did not enqueue
pub enum TryPushError<T> {
    Full(T),
    Stopped(T),
}

impl<T> TryPushError<T> {
    pub fn into_inner(self) -> T {
        match self {
            TryPushError::Full(item) | TryPushError::Stopped(item) => item,
        }
    }
}

impl<T> fmt::Debug for TryPushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryPushError::Full(_) => f.write_str("Full(..)"),
            TryPushError::Stopped(_) => f.write_str("Stopped(..)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopError {
    /// Nothing arrived in time; the queue is still running
    Timeout,
    /// The queue was stopped and has been drained
    Stopped,
}

/// Queue counters
#[derive(Debug, Default)]
pub struct QueueStats {
    pub pushed: AtomicU64,
    pub popped: AtomicU64,
    pub dropped: AtomicU64,
}

/// Snapshot of queue counters
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueueStatsSnapshot {
    pub name: &'static str,
    pub capacity: usize,
    pub len: usize,
    pub pushed: u64,
    pub popped: u64,
    pub dropped: u64,
    pub stopped: bool,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items
    ///
    /// # Panics
    /// If `capacity` is zero.
    pub fn new(name: &'static str, capacity: usize) -> Self {
        if capacity == 0 {
            panic!("Queue capacity must be greater than 0");
        }

        debug!("Created queue '{}' with capacity {}", name, capacity);

        Self {
            name,
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                stopped: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            stats: QueueStats::default(),
        }
    }

    /// Enqueue, blocking while the queue is full
    pub fn push(&self, item: T) -> Result<(), Stopped<T>> {
        let mut inner = self.inner.lock();
        while inner.items.len() >= self.capacity && !inner.stopped {
            self.not_full.wait(&mut inner);
        }
        if inner.stopped {
            return Err(Stopped(item));
        }
        inner.items.push_back(item);
        drop(inner);

        self.stats.pushed.fetch_add(1, Ordering::Relaxed);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Enqueue without blocking; full queues count the item as dropped
    pub fn try_push(&self, item: T) -> Result<(), TryPushError<T>> {
        let mut inner = self.inner.lock();
        if inner.stopped {
            return Err(TryPushError::Stopped(item));
        }
        if inner.items.len() >= self.capacity {
            drop(inner);
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            trace!("Queue '{}' full, item dropped", self.name);
            return Err(TryPushError::Full(item));
        }
        inner.items.push_back(item);
        drop(inner);

        self.stats.pushed.fetch_add(1, Ordering::Relaxed);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Dequeue, blocking while empty; `None` once stopped and drained
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                drop(inner);
                self.on_popped();
                return Some(item);
            }
            if inner.stopped {
                return None;
            }
            self.not_empty.wait(&mut inner);
        }
    }

    /// Dequeue, waiting at most `timeout`
    pub fn pop_timeout(&self, timeout: Duration) -> Result<T, PopError> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                drop(inner);
                self.on_popped();
                return Ok(item);
            }
            if inner.stopped {
                return Err(PopError::Stopped);
            }
            if self.not_empty.wait_until(&mut inner, deadline).timed_out() {
                // One last look: an item may have landed right at the deadline
                return match inner.items.pop_front() {
                    Some(item) => {
                        drop(inner);
                        self.on_popped();
                        Ok(item)
                    }
                    None if inner.stopped => Err(PopError::Stopped),
                    None => Err(PopError::Timeout),
                };
            }
        }
    }

    /// Stop the queue and wake every blocked producer and consumer
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        if inner.stopped {
            return;
        }
        inner.stopped = true;
        drop(inner);

        debug!("Queue '{}' stopped", self.name);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.lock().stopped
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn stats(&self) -> QueueStatsSnapshot {
        let (len, stopped) = {
            let inner = self.inner.lock();
            (inner.items.len(), inner.stopped)
        };
        QueueStatsSnapshot {
            name: self.name,
            capacity: self.capacity,
            len,
            pushed: self.stats.pushed.load(Ordering::Relaxed),
            popped: self.stats.popped.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
            stopped,
        }
    }

    fn on_popped(&self) {
        self.stats.popped.fetch_add(1, Ordering::Relaxed);
        self.not_full.notify_one();
    }
}

/// Type-erased view of a queue's counters
pub trait QueueStatus: Send + Sync {
    fn snapshot(&self) -> QueueStatsSnapshot;
}

impl<T: Send> QueueStatus for BoundedQueue<T> {
    fn snapshot(&self) -> QueueStatsSnapshot {
        self.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = BoundedQueue::new("test", 4);
        for i in 0..4 {
            queue.push(i).unwrap();
        }
        assert_eq!(queue.len(), 4);
        for i in 0..4 {
            assert_eq!(queue.pop(), Some(i));
        }
        assert!(queue.is_empty());
    }

    #[test]
    #[should_panic]
    fn test_zero_capacity_panics() {
        let _ = BoundedQueue::<u8>::new("test", 0);
    }

    #[test]
    fn test_try_push_on_full_queue() {
        let queue = BoundedQueue::new("test", 2);
        queue.try_push(1).unwrap();
        queue.try_push(2).unwrap();
        match queue.try_push(3) {
            Err(TryPushError::Full(3)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.stats().dropped, 1);
    }

    #[test]
    fn test_full_push_blocks_until_pop() {
        let queue = Arc::new(BoundedQueue::new("test", 1));
        queue.push(1).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push(2).is_ok())
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(queue.len(), 1, "queue must never exceed capacity");
        assert!(!producer.is_finished());

        assert_eq!(queue.pop(), Some(1));
        assert!(producer.join().unwrap());
        assert_eq!(queue.pop(), Some(2));
    }

    #[test]
    fn test_stop_drains_then_returns_none() {
        let queue = BoundedQueue::new("test", 4);
        queue.push("a").unwrap();
        queue.push("b").unwrap();
        queue.stop();

        assert_eq!(queue.pop(), Some("a"));
        assert_eq!(queue.pop(), Some("b"));
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_push_after_stop_returns_item() {
        let queue = BoundedQueue::new("test", 4);
        queue.stop();
        let Stopped(item) = queue.push(42).unwrap_err();
        assert_eq!(item, 42);
        assert!(matches!(queue.try_push(7), Err(TryPushError::Stopped(7))));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let queue = BoundedQueue::<u32>::new("test", 1);
        queue.stop();
        queue.stop();
        assert!(queue.is_stopped());
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_stop_wakes_blocked_pop() {
        let queue = Arc::new(BoundedQueue::<u32>::new("test", 1));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };

        thread::sleep(Duration::from_millis(50));
        queue.stop();
        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn test_stop_wakes_blocked_push() {
        let queue = Arc::new(BoundedQueue::new("test", 1));
        queue.push(1).unwrap();
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push(2).map_err(|Stopped(item)| item))
        };

        thread::sleep(Duration::from_millis(50));
        queue.stop();
        assert_eq!(producer.join().unwrap(), Err(2));
    }

    #[test]
    fn test_pop_timeout_distinguishes_stop() {
        let queue = BoundedQueue::<u32>::new("test", 1);
        assert_eq!(
            queue.pop_timeout(Duration::from_millis(10)),
            Err(PopError::Timeout)
        );
        queue.push(5).unwrap();
        assert_eq!(queue.pop_timeout(Duration::from_millis(10)), Ok(5));
        queue.stop();
        assert_eq!(
            queue.pop_timeout(Duration::from_millis(10)),
            Err(PopError::Stopped)
        );
    }

    #[test]
    fn test_stats_snapshot() {
        let queue = BoundedQueue::new("frames", 3);
        queue.push(1).unwrap();
        queue.push(2).unwrap();
        queue.pop();
        let stats = queue.stats();
        assert_eq!(stats.name, "frames");
        assert_eq!(stats.pushed, 2);
        assert_eq!(stats.popped, 1);
        assert_eq!(stats.len, 1);
        assert!(!stats.stopped);
    }
}
