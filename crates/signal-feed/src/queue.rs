use parking_lot::Mutex;
use perp_guard_core::Signal;
use std::collections::VecDeque;
use tokio::sync::Notify;

/// Bounded FIFO of pending signals.
///
/// When full, the oldest entry is evicted to admit the newest: a stale
/// signal is worse than a missing one. Intended for a single consumer.
#[derive(Debug)]
pub struct SignalQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<Signal>,
    closed: bool,
    dropped: u64,
}

impl SignalQueue {
    /// Creates a queue holding at most `capacity` signals (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                ..QueueState::default()
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Enqueues `signal`, returning the evicted oldest entry if the queue was full.
    ///
    /// Signals pushed after [`close`](Self::close) are discarded and returned.
    pub fn push(&self, signal: Signal) -> Option<Signal> {
        let evicted = {
            let mut state = self.state.lock();
            if state.closed {
                return Some(signal);
            }
            let evicted = if state.items.len() >= self.capacity {
                state.dropped += 1;
                state.items.pop_front()
            } else {
                None
            };
            state.items.push_back(signal);
            evicted
        };
        self.notify.notify_one();
        evicted
    }

    /// Waits for the next signal in arrival order.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<Signal> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock();
                if let Some(signal) = state.items.pop_front() {
                    return Some(signal);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    #[must_use]
    pub fn try_pop(&self) -> Option<Signal> {
        self.state.lock().items.pop_front()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of signals evicted by overflow since creation.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }

    /// Stops accepting signals and wakes the consumer.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}
