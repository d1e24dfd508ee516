//! Bounded inbound event queue.
//!
//! The read loop pushes, the consumer pops.  When the queue is full the
//! **oldest** event is discarded to make room and a counter is bumped, so a
//! slow consumer loses history but always sees the most recent traffic and
//! never stalls the socket reader.
//!
//! Closing the queue wakes any waiting consumer; events already queued can
//! still be drained after close.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use can_relay_core::Event;
use tokio::sync::Notify;

/// Default number of events kept before the oldest is dropped.
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug)]
struct QueueState {
    events: VecDeque<Event>,
    dropped: u64,
    closed: bool,
}

/// FIFO of received events with a drop-oldest overflow policy.
#[derive(Debug)]
pub struct EventQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

impl EventQueue {
    /// Creates an open queue.  A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                events: VecDeque::with_capacity(capacity.min(DEFAULT_EVENT_QUEUE_CAPACITY)),
                dropped: 0,
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends an event.  Returns `true` if an older event was discarded.
    pub fn push(&self, event: Event) -> bool {
        let dropped_one = {
            let mut state = self.lock();
            let overflow = state.events.len() >= self.capacity;
            if overflow {
                state.events.pop_front();
                state.dropped += 1;
            }
            state.events.push_back(event);
            overflow
        };
        self.notify.notify_one();
        dropped_one
    }

    /// Removes the oldest event without waiting.
    pub fn pop(&self) -> Option<Event> {
        self.lock().events.pop_front()
    }

    /// Waits for the next event.
    ///
    /// Returns `None` once the queue is closed and empty.
    pub async fn recv(&self) -> Option<Event> {
        loop {
            // Registered before the state check so a close in between is not missed.
            let notified = self.notify.notified();
            {
                let mut state = self.lock();
                if let Some(event) = state.events.pop_front() {
                    return Some(event);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Marks the queue closed and wakes every waiting consumer.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Re-opens a closed queue, keeping queued events and the drop counter.
    pub fn reopen(&self) {
        self.lock().closed = false;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total events discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_QUEUE_CAPACITY)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use can_relay_core::{Direction, Frame};

    fn event(id: u32) -> Event {
        Event::Frame(Frame::with_timestamp(id, vec![], Direction::Rx, 0).unwrap())
    }

    #[test]
    fn test_event_queue_preserves_fifo_order() {
        // Arrange
        let queue = EventQueue::new(8);

        // Act
        for id in 1..=3 {
            queue.push(event(id));
        }

        // Assert
        assert_eq!(queue.pop(), Some(event(1)));
        assert_eq!(queue.pop(), Some(event(2)));
        assert_eq!(queue.pop(), Some(event(3)));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_event_queue_drops_oldest_when_full() {
        // Arrange
        let queue = EventQueue::new(2);
        queue.push(event(1));
        queue.push(event(2));

        // Act
        let dropped = queue.push(event(3));

        // Assert
        assert!(dropped);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some(event(2)));
        assert_eq!(queue.pop(), Some(event(3)));
    }

    #[test]
    fn test_event_queue_zero_capacity_holds_one() {
        let queue = EventQueue::new(0);

        queue.push(event(1));
        queue.push(event(2));

        assert_eq!(queue.capacity(), 1);
        assert_eq!(queue.pop(), Some(event(2)));
        assert_eq!(queue.dropped(), 1);
    }

    #[test]
    fn test_event_queue_drains_after_close() {
        let queue = EventQueue::new(4);
        queue.push(event(7));

        queue.close();

        assert!(queue.is_closed());
        assert_eq!(queue.pop(), Some(event(7)));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_event_queue_recv_waits_for_push() {
        // Arrange
        let queue = Arc::new(EventQueue::new(4));
        let producer = Arc::clone(&queue);

        // Act
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.push(event(0x42));
        });
        let received = tokio::time::timeout(Duration::from_secs(2), queue.recv())
            .await
            .expect("recv must complete after push");

        // Assert
        assert_eq!(received, Some(event(0x42)));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_event_queue_recv_returns_none_after_close() {
        let queue = Arc::new(EventQueue::new(4));
        let closer = Arc::clone(&queue);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            closer.close();
        });
        let received = tokio::time::timeout(Duration::from_secs(2), queue.recv())
            .await
            .expect("close must wake the consumer");

        assert_eq!(received, None);
        handle.await.unwrap();
    }

    #[test]
    fn test_event_queue_reopen_clears_closed_flag() {
        let queue = EventQueue::new(4);
        queue.close();

        queue.reopen();

        assert!(!queue.is_closed());
    }
}
