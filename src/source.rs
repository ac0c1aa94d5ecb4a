//! Wiring an external stream into a controlled subject, lazily or eagerly.
//!
//! A [`crate::subject::BehaviorSubject`]/[`crate::subject::EventSubject`] is
//! a passive sink: something else has to pull values out of the registered
//! source stream and push them in. That "something else" is a background
//! task, supervised here so that:
//!
//! * a **non-lazy** source starts forwarding immediately and keeps running
//!   regardless of how many subscribers the target subject has;
//! * a **lazy** source only forwards while the target subject's refcount is
//!   greater than zero, and is cleanly cancelled (not merely ignored) the
//!   moment the last subscriber goes away, freeing whatever resources the
//!   upstream stream was holding.
//!
//! Either way, a source that completes on its own removes only itself: the
//! subject keeps its last value and remains subscribable, exactly like
//! `eventually`'s `InMemoryEventStore` keeps its broadcast sender alive
//! after a subscriber drops off.

use futures::stream::{Stream, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::trace;

/// Anything a background forwarder can push a value into.
pub(crate) trait Sink<T>: Send + Sync + 'static {
    fn publish(&self, value: T);
}

impl<T: Clone + Send + Sync + 'static> Sink<T> for crate::subject::BehaviorSubject<T> {
    fn publish(&self, value: T) {
        self.next(value);
    }
}

impl<T: Clone + Send + Sync + 'static> Sink<T> for crate::subject::EventSubject<T> {
    fn publish(&self, value: T) {
        self.publish(value);
    }
}

/// A handle onto a running (or gated) source-forwarding task.
///
/// Dropping or calling [`SourceHandle::abort`] stops forwarding
/// immediately; this is what backs `removeBehaviorSources` and
/// `completeBehavior`.
pub(crate) struct SourceHandle {
    task: JoinHandle<()>,
}

impl SourceHandle {
    pub(crate) fn abort(&self) {
        self.task.abort();
    }
}

impl Drop for SourceHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawns a task that forwards `stream` into `sink`.
///
/// When `gate` is `None` the source is non-lazy: forwarding starts right
/// away and never stops on its own account. When `gate` is `Some`, the
/// source is lazy: the task waits for the gate to read `true` before
/// forwarding, and aborts the in-flight forward (without exiting the
/// supervisor loop) as soon as the gate reads `false` again. Either way,
/// the task exits for good once the upstream stream completes -- that is
/// the one thing that permanently removes a source.
pub(crate) fn spawn<T, S, U>(
    debug_name: &'static str,
    mut stream: S,
    sink: std::sync::Arc<U>,
    gate: Option<watch::Receiver<bool>>,
    on_complete: impl FnOnce() + Send + 'static,
) -> SourceHandle
where
    T: Send + 'static,
    S: Stream<Item = T> + Send + Unpin + 'static,
    U: Sink<T>,
{
    let task = tokio::spawn(async move {
        match gate {
            None => {
                while let Some(value) = stream.next().await {
                    sink.publish(value);
                }
                trace!(source = debug_name, "non-lazy source completed");
            }
            Some(mut gate) => loop {
                // Wait until somebody is subscribed.
                if !*gate.borrow() && gate.changed().await.is_err() {
                    return;
                }
                if !*gate.borrow() {
                    continue;
                }

                trace!(source = debug_name, "lazy source activated");

                loop {
                    tokio::select! {
                        biased;

                        changed = gate.changed() => {
                            if changed.is_err() {
                                return;
                            }
                            if !*gate.borrow() {
                                trace!(source = debug_name, "lazy source deactivated");
                                break;
                            }
                        }
                        item = stream.next() => {
                            match item {
                                Some(value) => sink.publish(value),
                                None => {
                                    trace!(source = debug_name, "lazy source completed");
                                    on_complete();
                                    return;
                                }
                            }
                        }
                    }
                }
            },
        }
        on_complete();
    });

    SourceHandle { task }
}
