//! Bounded pipeline queues between the bridge threads. Timed send and
//! receive return timeouts as ordinary values so the worker loops can poll
//! their shutdown flag between attempts.

use crossbeam::channel;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub enum SendStatus<T> {
    Sent,
    /// The queue stayed full; the item is handed back.
    TimedOut(T),
    /// The consumer is gone.
    Closed(T),
}

#[derive(Debug)]
pub enum RecvStatus<T> {
    Item(T),
    TimedOut,
    /// The producer is gone and the queue is drained.
    Closed,
}

#[derive(Debug)]
pub struct PipeSender<T> {
    tx: channel::Sender<T>,
    timeout: Duration,
}

#[derive(Debug)]
pub struct PipeReceiver<T> {
    rx: channel::Receiver<T>,
    timeout: Duration,
}

/// A bounded single-producer single-consumer pipe with a shared timeout.
pub fn pipe<T>(capacity: usize, timeout: Duration) -> (PipeSender<T>, PipeReceiver<T>) {
    let (tx, rx) = channel::bounded(capacity);
    (PipeSender { tx, timeout }, PipeReceiver { rx, timeout })
}

impl<T> PipeSender<T> {
    pub fn enqueue(&self, item: T) -> SendStatus<T> {
        match self.tx.send_timeout(item, self.timeout) {
            Ok(()) => SendStatus::Sent,
            Err(channel::SendTimeoutError::Timeout(item)) => SendStatus::TimedOut(item),
            Err(channel::SendTimeoutError::Disconnected(item)) => SendStatus::Closed(item),
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

impl<T> PipeReceiver<T> {
    pub fn dequeue(&self) -> RecvStatus<T> {
        match self.rx.recv_timeout(self.timeout) {
            Ok(item) => RecvStatus::Item(item),
            Err(channel::RecvTimeoutError::Timeout) => RecvStatus::TimedOut,
            Err(channel::RecvTimeoutError::Disconnected) => RecvStatus::Closed,
        }
    }

    /// Drop everything currently queued without blocking.
    pub fn clear(&self) {
        while self.rx.try_recv().is_ok() {}
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_items_in_order() {
        let (tx, rx) = pipe(4, Duration::from_millis(50));
        for i in 0..4 {
            assert!(matches!(tx.enqueue(i), SendStatus::Sent));
        }
        for i in 0..4 {
            match rx.dequeue() {
                RecvStatus::Item(v) => assert_eq!(v, i),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn full_queue_times_out_and_returns_the_item() {
        let (tx, rx) = pipe(1, Duration::from_millis(10));
        assert!(matches!(tx.enqueue(1), SendStatus::Sent));
        match tx.enqueue(2) {
            SendStatus::TimedOut(v) => assert_eq!(v, 2),
            other => panic!("unexpected {other:?}"),
        }
        let _ = rx;
    }

    #[test]
    fn empty_queue_times_out() {
        let (tx, rx) = pipe::<u32>(1, Duration::from_millis(10));
        assert!(matches!(rx.dequeue(), RecvStatus::TimedOut));
        drop(tx);
        assert!(matches!(rx.dequeue(), RecvStatus::Closed));
    }

    #[test]
    fn clear_drains_without_blocking() {
        let (tx, rx) = pipe(8, Duration::from_millis(10));
        for i in 0..8 {
            assert!(matches!(tx.enqueue(i), SendStatus::Sent));
        }
        rx.clear();
        assert!(rx.is_empty());
        assert!(matches!(rx.dequeue(), RecvStatus::TimedOut));
    }

    #[test]
    fn ownership_moves_through_the_pipe() {
        let (tx, rx) = pipe(1, Duration::from_millis(50));
        let payload = vec![1u8, 2, 3];
        assert!(matches!(tx.enqueue(payload), SendStatus::Sent));
        match rx.dequeue() {
            RecvStatus::Item(v) => assert_eq!(v, vec![1, 2, 3]),
            other => panic!("unexpected {other:?}"),
        }
    }
}
