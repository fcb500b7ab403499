//! Admission control between tokenization producers and the appender.
//!
//! Producers reserve `(rows, bytes)` for a file's chunks before handing them
//! to the appender; the reservation is released once the chunks have been
//! appended. The item the appender is waiting for (the head of line) is
//! always admitted, even over the ceilings, so the pipeline cannot stall.

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct QueueState {
    items: usize,
    rows: usize,
    bytes: u64,
    next_index: usize,
    closed: bool,
}

/// Count, row and byte ceilings on work waiting to be appended.
#[derive(Debug)]
pub struct PendingQueue {
    state: Mutex<QueueState>,
    changed: Condvar,
    max_items: usize,
    max_rows: usize,
    max_bytes: u64,
}

/// Capacity held by one pending item; released on drop.
#[derive(Debug)]
#[must_use = "dropping a reservation releases it immediately"]
pub struct Reservation<'q> {
    queue: &'q PendingQueue,
    rows: usize,
    bytes: u64,
}

impl PendingQueue {
    pub fn new(max_items: usize, max_rows: usize, max_bytes: u64) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            changed: Condvar::new(),
            max_items: max_items.max(1),
            max_rows: max_rows.max(1),
            max_bytes: max_bytes.max(1),
        }
    }

    /// Reserve capacity for item `index`, blocking until it fits.
    ///
    /// Returns `None` once the queue is closed.
    pub fn reserve(&self, index: usize, rows: usize, bytes: u64) -> Option<Reservation<'_>> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            let fits = state.items < self.max_items
                && state.rows + rows <= self.max_rows
                && state.bytes + bytes <= self.max_bytes;
            if fits || index <= state.next_index {
                break;
            }
            self.changed.wait(&mut state);
        }
        state.items += 1;
        state.rows += rows;
        state.bytes += bytes;
        Some(Reservation {
            queue: self,
            rows,
            bytes,
        })
    }

    /// Tell waiting producers which item the appender needs next.
    pub fn advance(&self, next_index: usize) {
        let mut state = self.state.lock();
        if next_index > state.next_index {
            state.next_index = next_index;
            self.changed.notify_all();
        }
    }

    /// Wake every producer and refuse further reservations.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.changed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Current `(items, rows, bytes)` held
    pub fn usage(&self) -> (usize, usize, u64) {
        let state = self.state.lock();
        (state.items, state.rows, state.bytes)
    }

    fn release(&self, rows: usize, bytes: u64) {
        let mut state = self.state.lock();
        state.items = state.items.saturating_sub(1);
        state.rows = state.rows.saturating_sub(rows);
        state.bytes = state.bytes.saturating_sub(bytes);
        self.changed.notify_all();
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.queue.release(self.rows, self.bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[test]
    fn test_reservation_accounting() {
        let queue = PendingQueue::new(4, 100, 1000);
        let first = queue.reserve(0, 10, 100).unwrap();
        let second = queue.reserve(1, 20, 200).unwrap();
        assert_eq!(queue.usage(), (2, 30, 300));
        drop(first);
        assert_eq!(queue.usage(), (1, 20, 200));
        drop(second);
        assert_eq!(queue.usage(), (0, 0, 0));
    }

    #[test]
    fn test_head_of_line_bypasses_ceilings() {
        let queue = PendingQueue::new(1, 10, 10);
        // Oversized, but it is the item the appender waits for
        let head = queue.reserve(0, 500, 5000).unwrap();
        assert_eq!(queue.usage(), (1, 500, 5000));
        drop(head);
    }

    #[test]
    fn test_blocked_producer_wakes_on_release() {
        let queue = Arc::new(PendingQueue::new(1, 10, 10));
        let held = queue.reserve(0, 5, 5).unwrap();
        let admitted = Arc::new(AtomicBool::new(false));

        std::thread::scope(|scope| {
            let queue = Arc::clone(&queue);
            let admitted_flag = Arc::clone(&admitted);
            scope.spawn(move || {
                let reservation = queue.reserve(3, 5, 5);
                admitted_flag.store(reservation.is_some(), Ordering::SeqCst);
            });

            std::thread::sleep(Duration::from_millis(50));
            assert!(!admitted.load(Ordering::SeqCst));
            drop(held);
        });

        assert!(admitted.load(Ordering::SeqCst));
    }

    #[test]
    fn test_advance_admits_new_head() {
        let queue = Arc::new(PendingQueue::new(1, 10, 10));
        let held = queue.reserve(0, 10, 10).unwrap();

        std::thread::scope(|scope| {
            let waiter = {
                let queue = Arc::clone(&queue);
                scope.spawn(move || queue.reserve(1, 10, 10).map(|r| r.rows))
            };
            std::thread::sleep(Duration::from_millis(20));
            queue.advance(1);
            assert_eq!(waiter.join().unwrap(), Some(10));
        });
        drop(held);
    }

    #[test]
    fn test_close_releases_waiters() {
        let queue = Arc::new(PendingQueue::new(1, 1, 1));
        let _held = queue.reserve(0, 1, 1).unwrap();

        std::thread::scope(|scope| {
            let waiter = {
                let queue = Arc::clone(&queue);
                scope.spawn(move || queue.reserve(5, 1, 1).is_none())
            };
            std::thread::sleep(Duration::from_millis(20));
            queue.close();
            assert!(waiter.join().unwrap());
        });
        assert!(queue.is_closed());
    }
}
