//! The delayed event queue: the single FIFO that gives every dispatch in a
//! store a well-defined, total order.
//!
//! Earlier, queue-less designs let a `dispatch` call re-enter the store
//! synchronously -- a reducer observing its own output behavior could see a
//! *later* reduction before the one that was logically "in flight". Moving
//! every dispatch onto one microtask-boundary-equivalent queue, drained by
//! a single task, removes that whole class of bug at the cost of making
//! `dispatch` resolve asynchronously.
//!
//! The "microtask boundary" here is realized the way `tokio::sync::mpsc` is
//! used throughout the teacher crate for internal fan-out (see
//! `inmemory.rs`'s broadcast channel): one unbounded channel, one consumer
//! task. Because there is exactly one consumer reading one FIFO channel,
//! ordering falls out for free -- no additional locking is needed to
//! preserve it.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::{mpsc, oneshot};

struct QueueItem {
    task: Box<dyn FnOnce() -> bool + Send>,
    ack: oneshot::Sender<bool>,
}

/// A FIFO of pending dispatches, drained by a single background task.
///
/// Cloning a `DelayedQueue` shares the same underlying channel and drain
/// task; every clone enqueues onto the same queue, which is what preserves
/// store-wide (not per-identifier) ordering.
#[derive(Clone)]
pub(crate) struct DelayedQueue {
    sender: mpsc::UnboundedSender<QueueItem>,
}

impl DelayedQueue {
    pub(crate) fn new() -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<QueueItem>();

        tokio::spawn(async move {
            while let Some(item) = receiver.recv().await {
                let delivered = (item.task)();
                // The caller may have dropped the `DispatchHandle`; that is
                // not an error, it just means nobody is waiting on the ack.
                let _ = item.ack.send(delivered);
            }
        });

        Self { sender }
    }

    /// Enqueues a unit of work onto the tail of the queue.
    ///
    /// `task` runs synchronously on the drain task once every
    /// already-queued item has run; it may itself call [`enqueue`] again
    /// (e.g. a reducer that reacts to a new state value by dispatching a
    /// further event), and that nested dispatch lands strictly after every
    /// item already queued, never interleaved with the current one.
    ///
    /// [`enqueue`]: DelayedQueue::enqueue
    pub(crate) fn enqueue<F>(&self, task: F) -> DispatchHandle
    where
        F: FnOnce() -> bool + Send + 'static,
    {
        let (ack, recv) = oneshot::channel();
        let item = QueueItem {
            task: Box::new(task),
            ack,
        };

        // A send error means the drain task (and thus the store) is gone;
        // the handle will simply resolve to `false` below.
        let _ = self.sender.send(item);

        DispatchHandle { recv }
    }
}

/// A pending dispatch's completion handle.
///
/// Resolves to `true` iff at least one subscriber received the dispatched
/// event at delivery time, `false` otherwise.
#[must_use = "a DispatchHandle does nothing unless polled/awaited"]
pub struct DispatchHandle {
    recv: oneshot::Receiver<bool>,
}

impl Future for DispatchHandle {
    type Output = bool;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.recv).poll(cx) {
            Poll::Ready(Ok(delivered)) => Poll::Ready(delivered),
            Poll::Ready(Err(_)) => Poll::Ready(false),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn dispatches_run_in_program_order() {
        let queue = DelayedQueue::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..10 {
            let order = order.clone();
            handles.push(queue.enqueue(move || {
                order.lock().push(i);
                true
            }));
        }

        for handle in handles {
            assert!(handle.await);
        }

        assert_eq!(*order.lock(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn nested_dispatch_lands_after_already_queued_items() {
        let queue = DelayedQueue::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let ran_nested = Arc::new(AtomicUsize::new(0));

        let inner_queue = queue.clone();
        let inner_order = order.clone();
        let inner_ran = ran_nested.clone();

        let first = queue.enqueue(move || {
            inner_order.lock().push("first");
            // Synchronously enqueue further work while processing.
            let order = inner_order.clone();
            let ran = inner_ran.clone();
            let _ = inner_queue.enqueue(move || {
                order.lock().push("nested");
                ran.fetch_add(1, Ordering::SeqCst);
                true
            });
            true
        });

        let second = queue.enqueue(move || {
            order.lock().push("second");
            true
        });

        assert!(first.await);
        assert!(second.await);

        // give the nested dispatch a chance to drain
        tokio::task::yield_now().await;
        assert_eq!(ran_nested.load(Ordering::SeqCst), 1);
    }
}
