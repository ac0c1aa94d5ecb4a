//! Controlled subjects: the multicast sinks that back every identifier
//! registered on a [`Store`](crate::store::Store).
//!
//! `eventually`'s `InMemoryEventStore` (`inmemory.rs`) multicasts committed
//! events to subscribers through a `tokio::sync::broadcast` channel that
//! keeps working after every subscriber drops and the channel drains. The
//! same channel is the right primitive here: it is a multicast sink with no
//! built-in replay, whose subscriber count can be observed independently
//! of any one subscription. [`EventSubject`] wraps it directly;
//! [`BehaviorSubject`] layers a last-value slot on top for the replay
//! semantics a behavior needs.
//!
//! Neither subject retains subscriber closures once every subscription has
//! been dropped -- only the refcount and (for behaviors) the last value
//! slot survive, so re-subscribing after the last unsubscribe sees the
//! latest value rather than an empty one.

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::Stream;
use parking_lot::RwLock;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

/// Shared subscription accounting for one subject: how many subscriptions
/// are currently live, exposed both as a plain counter and as an
/// `isSubscribed` boolean stream (a `watch` channel, which -- like a
/// behavior -- always replays its last value to new watchers).
pub(crate) struct RefCount {
    count: AtomicUsize,
    is_subscribed: watch::Sender<bool>,
}

impl RefCount {
    fn new() -> (Arc<Self>, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (
            Arc::new(Self {
                count: AtomicUsize::new(0),
                is_subscribed: tx,
            }),
            rx,
        )
    }

    fn increment(&self) {
        if self.count.fetch_add(1, Ordering::SeqCst) == 0 {
            let _ = self.is_subscribed.send(true);
        }
    }

    fn decrement(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _ = self.is_subscribed.send(false);
        }
    }

    pub(crate) fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

/// Decrements a subject's [`RefCount`] when a subscription is dropped,
/// without retaining anything else about the subscriber.
struct RefCountGuard {
    refcount: Arc<RefCount>,
}

impl Drop for RefCountGuard {
    fn drop(&mut self) {
        self.refcount.decrement();
    }
}

/// A live subscription to a [`EventSubject`] or [`BehaviorSubject`].
///
/// Implements [`Stream`]; dropping it releases the subscription slot.
/// Lagged broadcast receivers (the subscriber fell behind the channel's
/// ring buffer) are treated as a gap in the stream, not an error: the
/// subject is not failed, only the missed values are skipped.
pub struct Subscription<T> {
    inner: BroadcastStream<T>,
    completed: Arc<AtomicBool>,
    _guard: RefCountGuard,
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

impl<T: Clone + Send + 'static> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.completed.load(Ordering::SeqCst) {
            return Poll::Ready(None);
        }

        loop {
            return match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(value))) => Poll::Ready(Some(value)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(_)))) => continue,
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Pending => Poll::Pending,
            };
        }
    }
}

/// Multicast sink for one event identifier: no replay, just fan-out to
/// whoever is currently subscribed.
pub(crate) struct EventSubject<T> {
    sender: RwLock<Option<broadcast::Sender<T>>>,
    refcount: Arc<RefCount>,
    is_subscribed: watch::Receiver<bool>,
    completed: Arc<AtomicBool>,
}

impl<T: Clone + Send + 'static> EventSubject<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, _rx) = broadcast::channel(capacity.max(1));
        let (refcount, is_subscribed) = RefCount::new();

        Self {
            sender: RwLock::new(Some(sender)),
            refcount,
            is_subscribed,
            completed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn subscribe(&self) -> Subscription<T> {
        self.refcount.increment();

        let inner = match self.sender.read().as_ref() {
            Some(sender) => BroadcastStream::new(sender.subscribe()),
            None => {
                // Already completed: hand back a receiver on a throwaway,
                // already-closed channel rather than keeping a live sender
                // of our own around just to subscribe from it.
                let (sender, receiver) = broadcast::channel(1);
                drop(sender);
                BroadcastStream::new(receiver)
            }
        };

        Subscription {
            inner,
            completed: self.completed.clone(),
            _guard: RefCountGuard {
                refcount: self.refcount.clone(),
            },
        }
    }

    /// Publishes a value, returning `true` iff at least one subscriber
    /// received it.
    pub(crate) fn publish(&self, value: T) -> bool {
        if self.completed.load(Ordering::SeqCst) {
            return false;
        }
        match self.sender.read().as_ref() {
            Some(sender) => sender.send(value).map(|n| n > 0).unwrap_or(false),
            None => false,
        }
    }

    pub(crate) fn refcount(&self) -> usize {
        self.refcount.get()
    }

    pub(crate) fn is_subscribed_stream(&self) -> watch::Receiver<bool> {
        self.is_subscribed.clone()
    }

    /// Marks the subject completed and drops its broadcast sender, which
    /// closes the channel for every subscriber -- including one currently
    /// parked in `poll_next` waiting on a value that will now never come.
    /// Closing wakes it with a channel-closed error, which `Subscription`
    /// already translates into the end of the stream.
    pub(crate) fn complete(&self) {
        self.completed.store(true, Ordering::SeqCst);
        self.sender.write().take();
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }
}

/// Multicast sink for one behavior or state identifier: like
/// [`EventSubject`], plus a last-value slot that is replayed to every new
/// subscriber and that survives down to zero subscribers.
pub(crate) struct BehaviorSubject<T> {
    events: EventSubject<T>,
    last_value: RwLock<Option<T>>,
}

impl<T: Clone + Send + 'static> BehaviorSubject<T> {
    pub(crate) fn new(capacity: usize, initial: Option<T>) -> Self {
        Self {
            events: EventSubject::new(capacity),
            last_value: RwLock::new(initial),
        }
    }

    /// Publishes a new value, updating the replay slot first so that any
    /// subscription created concurrently with delivery still sees a
    /// consistent value.
    pub(crate) fn next(&self, value: T) {
        *self.last_value.write() = Some(value.clone());
        self.events.publish(value);
    }

    /// Seeds the replay slot without notifying current subscribers -- used
    /// when a late reducer source needs to see the current value without
    /// re-publishing it.
    pub(crate) fn seed(&self, value: T) {
        let mut slot = self.last_value.write();
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    pub(crate) fn current(&self) -> Option<T> {
        self.last_value.read().clone()
    }

    /// Subscribes, replaying the last known value (if any) ahead of live
    /// updates.
    pub(crate) fn subscribe(&self) -> impl Stream<Item = T> + Send + 'static
    where
        T: Unpin,
    {
        use futures::stream::StreamExt;

        let seed = self.current();
        let live = self.events.subscribe();

        futures::stream::iter(seed).chain(live)
    }

    pub(crate) fn refcount(&self) -> usize {
        self.events.refcount()
    }

    pub(crate) fn is_subscribed_stream(&self) -> watch::Receiver<bool> {
        self.events.is_subscribed_stream()
    }

    pub(crate) fn complete(&self) {
        self.events.complete();
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.events.is_completed()
    }
}
