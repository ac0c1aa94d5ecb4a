//! The [`Store`] facade: the single entry point through which every
//! behavior, event, state and effect identifier is registered, consumed,
//! dispatched and torn down.
//!
//! Structurally this plays the role `eventually`'s `Repository` plays for
//! an aggregate root -- a thin, cheaply-cloneable handle (`Store` is just an
//! `Arc` around its tables) in front of storage that is itself oblivious to
//! the specific payload types flowing through it.

mod child;
pub mod diagnostics;
mod inner;
pub mod lifecycle;

use std::any::Any;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use futures::stream::{BoxStream, Stream, StreamExt};
use tokio_stream::wrappers::WatchStream;
use tracing::instrument;

use crate::error::ConfigError;
use crate::id::{BehaviorId, EventId, RawId, StateId};
use crate::queue::DelayedQueue;
pub use crate::queue::DispatchHandle;
use crate::source;
use crate::store::inner::{ReducerBinding, SourceSlot, StoreTables};
use crate::store::lifecycle::ScopeId;

/// A stream of values handed back by every consume-side [`Store`] method.
///
/// Boxing here (rather than returning `impl Stream`) is what lets
/// `get_behavior` transparently delegate to a parent store (see the
/// `child` module) without the two branches needing the same concrete
/// type.
pub type SignalStream<T> = BoxStream<'static, T>;

/// Tunables threaded through [`Store::with_config`], analogous to
/// `InMemoryEventStore::new(buffer_size)` taking its broadcast capacity as
/// a constructor argument rather than hard-coding it.
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    /// Capacity of the `tokio::sync::broadcast` channel backing every
    /// subject. A subscriber that falls behind by more than this many
    /// published values observes a gap (see [`crate::subject::Subscription`]),
    /// never an error.
    pub channel_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { channel_capacity: 128 }
    }
}

pub(crate) struct StoreInner {
    tables: StoreTables,
    queue: DelayedQueue,
    config: StoreConfig,
    in_lifecycle_registration: AtomicBool,
}

/// A reactive store: a registry of behaviors, events, state and effects,
/// plus the machinery (a [`DelayedQueue`]) that gives every dispatch a
/// well-defined global order.
///
/// Cloning a `Store` is cheap and shares everything; clones are how a
/// [`lifecycle::LifecycleHandle`] and a child store each keep their own
/// reference to the same underlying tables.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
    parent: Option<Box<Store>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Creates a store with the default [`StoreConfig`].
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Creates a store with an explicit configuration.
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                tables: StoreTables::default(),
                queue: DelayedQueue::new(),
                config,
                in_lifecycle_registration: AtomicBool::new(false),
            }),
            parent: None,
        }
    }

    pub(crate) fn tables(&self) -> &StoreTables {
        &self.inner.tables
    }

    fn capacity(&self) -> usize {
        self.inner.config.channel_capacity
    }

    // ---- behaviors -----------------------------------------------------

    /// Registers `stream` as the source of `id`.
    ///
    /// When `lazy` is `true`, `stream` is only polled while at least one
    /// subscriber is attached to `id`; it is cancelled (not merely paused)
    /// the moment the last subscriber drops, and restarted from scratch the
    /// next time somebody subscribes. When `lazy` is `false`, `stream`
    /// starts forwarding immediately and keeps running regardless of
    /// subscriber count.
    ///
    /// Fails with [`ConfigError::SourceAlreadyAdded`] if `id` already has a
    /// source; a behavior accepts exactly one.
    #[instrument(skip(self, stream), fields(behavior = ?id))]
    pub fn add_behavior<T>(
        &self,
        id: BehaviorId<T>,
        stream: impl Stream<Item = T> + Send + Unpin + 'static,
        lazy: bool,
    ) -> Result<(), ConfigError>
    where
        T: Clone + Send + Sync + Unpin + 'static,
    {
        self.add_behavior_scoped(id, stream, lazy, None)
    }

    /// A derived state: shorthand for a non-replaying, lazily-subscribed
    /// [`add_behavior`](Store::add_behavior) -- the common shape for a
    /// behavior computed purely from other behaviors.
    pub fn add_derived_state<T>(
        &self,
        id: BehaviorId<T>,
        stream: impl Stream<Item = T> + Send + Unpin + 'static,
    ) -> Result<(), ConfigError>
    where
        T: Clone + Send + Sync + Unpin + 'static,
    {
        self.add_behavior(id, stream, true)
    }

    pub(crate) fn add_behavior_scoped<T>(
        &self,
        id: BehaviorId<T>,
        stream: impl Stream<Item = T> + Send + Unpin + 'static,
        lazy: bool,
        scope: Option<ScopeId>,
    ) -> Result<(), ConfigError>
    where
        T: Clone + Send + Sync + Unpin + 'static,
    {
        let raw = id.raw();
        self.tables().record_name(raw, id.debug_name());

        let capacity = self.capacity();
        // Touch the entry into existence (sourceless, if new) before
        // checking/mutating its source list.
        let subject = self.tables().behavior_subject::<T>(raw, capacity);

        if self.tables().behavior_source_count(raw) > 0 {
            return Err(ConfigError::SourceAlreadyAdded);
        }

        let gate = if lazy {
            Some(subject.is_subscribed_stream())
        } else {
            None
        };

        let debug_name = id.debug_name().unwrap_or("behavior");
        let handle = source::spawn(debug_name, stream, subject, gate, || {});

        self.tables().push_behavior_source(raw, SourceSlot::Stream { handle, scope });
        Ok(())
    }

    /// Registers `id` as a reducer-driven state with the given initial
    /// value. Reducers are then attached one event at a time via
    /// [`add_reducer`](Store::add_reducer).
    #[instrument(skip(self, initial), fields(state = ?id))]
    pub fn add_state<T>(&self, id: StateId<T>, initial: T) -> Result<(), ConfigError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let raw = id.raw();
        self.tables().record_name(raw, id.debug_name());
        let capacity = self.capacity();

        self.tables().with_behavior::<T, ()>(raw, capacity, |subject| {
            subject.seed(initial);
        });

        Ok(())
    }

    /// Binds `reducer` so that every future dispatch of `event` folds into
    /// `state`. At most one reducer may be bound per `(StateId, EventId)`
    /// pair; a second call with the same pair fails with
    /// [`ConfigError::ReducerAlreadyAdded`].
    ///
    /// The reducer runs synchronously on the store's single dispatch-drain
    /// task (see `queue.rs`), never as an independently-scheduled task, so
    /// that cross-reducer ordering matches dispatch order exactly.
    #[instrument(skip(self, reducer), fields(state = ?state, event = ?event))]
    pub fn add_reducer<S, E>(
        &self,
        state: StateId<S>,
        event: EventId<E>,
        reducer: impl Fn(S, E) -> S + Send + Sync + 'static,
    ) -> Result<(), ConfigError>
    where
        S: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        self.add_reducer_scoped(state, event, reducer, None)
    }

    pub(crate) fn add_reducer_scoped<S, E>(
        &self,
        state: StateId<S>,
        event: EventId<E>,
        reducer: impl Fn(S, E) -> S + Send + Sync + 'static,
        scope: Option<ScopeId>,
    ) -> Result<(), ConfigError>
    where
        S: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        let state_raw = state.raw();
        let event_raw = event.raw();

        {
            let mut pairs = self.inner.tables.reducer_pairs.write();
            if !pairs.insert((state_raw, event_raw)) {
                return Err(ConfigError::ReducerAlreadyAdded);
            }
        }

        let capacity = self.capacity();
        // Ensure the state subject exists even if `add_state` has not run
        // yet: a reducer can legally be registered first.
        let state_subject = self.tables().behavior_subject::<S>(state_raw, capacity);
        self.tables().push_behavior_source(
            state_raw,
            SourceSlot::Reducer {
                event: event_raw,
                scope,
            },
        );

        let apply: Box<dyn Fn(Box<dyn Any + Send>) + Send + Sync> = Box::new(move |payload| {
            let event: E = *payload
                .downcast::<E>()
                .expect("reducer invoked with a mismatched event payload type");
            // Before `add_state` seeds an initial value there is nothing to
            // reduce over yet; the dispatch is accumulated (subscribers of
            // the event still see it) but produces no new state value.
            if let Some(current) = state_subject.current() {
                state_subject.next(reducer(current, event));
            }
        });

        self.inner
            .tables
            .reducers_by_event
            .write()
            .entry(event_raw)
            .or_default()
            .push(ReducerBinding {
                state: state_raw,
                apply,
            });

        Ok(())
    }

    /// Registers `stream` as one of possibly several sources feeding event
    /// `id`. Unlike behaviors, events accept any number of sources, all
    /// forwarded concurrently.
    #[instrument(skip(self, stream), fields(event = ?id))]
    pub fn add_event_source<T>(
        &self,
        id: EventId<T>,
        stream: impl Stream<Item = T> + Send + Unpin + 'static,
    ) where
        T: Clone + Send + Sync + 'static,
    {
        self.add_event_source_scoped(id, stream, None)
    }

    pub(crate) fn add_event_source_scoped<T>(
        &self,
        id: EventId<T>,
        stream: impl Stream<Item = T> + Send + Unpin + 'static,
        scope: Option<ScopeId>,
    ) where
        T: Clone + Send + Sync + 'static,
    {
        let raw = id.raw();
        self.tables().record_name(raw, id.debug_name());
        let capacity = self.capacity();
        let subject = self.tables().event_subject::<T>(raw, capacity);

        let debug_name = id.debug_name().unwrap_or("event");
        let handle = source::spawn(debug_name, stream, subject, None, || {});
        self.tables().push_event_source(raw, SourceSlot::Stream { handle, scope });
    }

    /// Wires one behavior's current stream of values as the source of
    /// another. Equivalent to `add_behavior(target, store.get_behavior(source), lazy)`.
    pub fn connect<T>(&self, source_id: BehaviorId<T>, target: BehaviorId<T>, lazy: bool) -> Result<(), ConfigError>
    where
        T: Clone + Send + Sync + Unpin + 'static,
    {
        let upstream = self.get_behavior(source_id);
        self.add_behavior(target, upstream, lazy)
    }

    /// Wires an arbitrary external stream as the source of a behavior.
    /// Equivalent to `add_behavior`, named separately to mirror the
    /// `connectObservable` operation in the wider reactive-store family
    /// this API belongs to.
    pub fn connect_observable<T>(
        &self,
        observable: impl Stream<Item = T> + Send + Unpin + 'static,
        target: BehaviorId<T>,
        lazy: bool,
    ) -> Result<(), ConfigError>
    where
        T: Clone + Send + Sync + Unpin + 'static,
    {
        self.add_behavior(target, observable, lazy)
    }

    // ---- consuming -------------------------------------------------

    /// Returns a stream of every future (and, for a behavior, the current)
    /// value of `id`.
    ///
    /// `id` need not have a source yet: the returned stream simply stays
    /// quiet until one is attached, mirroring `addBehavior`/`getBehavior`
    /// being independent, order-insensitive calls.
    pub fn get_behavior<T>(&self, id: BehaviorId<T>) -> SignalStream<T>
    where
        T: Clone + Send + Sync + Unpin + 'static,
    {
        let raw = id.raw();
        // A behavior with no source of its own on this store delegates to
        // the parent's subject for the same identifier; one with a source
        // always wins locally, even if the parent also has one.
        if self.tables().behavior_source_count(raw) == 0 {
            if let Some(parent) = &self.parent {
                return parent.get_behavior(id);
            }
        }

        let capacity = self.capacity();
        self.tables()
            .with_behavior::<T, _>(raw, capacity, |subject| subject.subscribe())
            .boxed()
    }

    /// [`get_behavior`](Store::get_behavior) for a reducer-driven state.
    pub fn get_state<T>(&self, id: StateId<T>) -> SignalStream<T>
    where
        T: Clone + Send + Sync + Unpin + 'static,
    {
        let capacity = self.capacity();
        self.tables()
            .with_behavior::<T, _>(id.raw(), capacity, |subject| subject.subscribe())
            .boxed()
    }

    /// Returns a stream of every future value dispatched to event `id`.
    /// Never replays a value published before subscription.
    ///
    /// Unlike behaviors, events never delegate to a parent store: each
    /// store's event namespace is independent, since replaying an event
    /// across a store boundary would silently change its "happened once"
    /// semantics.
    pub fn get_event_stream<T>(&self, id: EventId<T>) -> SignalStream<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let raw = id.raw();
        let capacity = self.capacity();
        self.tables()
            .with_event::<T, _>(raw, capacity, |subject| subject.subscribe())
            .boxed()
    }

    /// A stream of `true`/`false` reflecting whether `id` currently has at
    /// least one live subscriber. Always replays its current value to a
    /// new subscriber, like a behavior.
    pub fn get_is_subscribed_observable<T>(&self, id: BehaviorId<T>) -> SignalStream<bool>
    where
        T: Clone + Send + Sync + 'static,
    {
        let capacity = self.capacity();
        let receiver = self
            .tables()
            .with_behavior::<T, _>(id.raw(), capacity, |subject| subject.is_subscribed_stream());
        WatchStream::new(receiver).boxed()
    }

    // ---- dispatch --------------------------------------------------

    /// Enqueues `payload` for delivery to event `id`'s subscribers and any
    /// reducers bound to it, preserving global dispatch order across the
    /// whole store (including dispatches made from within a reducer).
    ///
    /// Resolves to `true` iff the event had at least one subscriber (a
    /// plain subscription or a bound reducer) at delivery time.
    pub fn dispatch<T>(&self, id: EventId<T>, payload: T) -> DispatchHandle
    where
        T: Clone + Send + Sync + 'static,
    {
        let raw = id.raw();
        let capacity = self.capacity();
        let subject = self.tables().event_subject::<T>(raw, capacity);
        let reducers = self.tables_handle();

        self.inner.queue.enqueue(move || {
            let mut delivered = subject.publish(payload.clone());

            let bindings = reducers.reducers_by_event.read();
            if let Some(bindings) = bindings.get(&raw) {
                for binding in bindings {
                    (binding.apply)(Box::new(payload.clone()));
                    delivered = true;
                }
            }

            delivered
        })
    }

    fn tables_handle(&self) -> Arc<StoreHandleForClosures> {
        Arc::new(StoreHandleForClosures { store: self.clone() })
    }

    // ---- teardown ----------------------------------------------------

    /// Removes and cancels every source registered for `id`, leaving its
    /// last value (if any) and subscribers in place.
    pub fn remove_behavior_sources<T>(&self, id: BehaviorId<T>) {
        self.remove_behavior_sources_raw(id.raw());
    }

    pub(crate) fn remove_behavior_sources_raw(&self, raw: RawId) {
        for slot in self.tables().drain_behavior_sources(raw) {
            match slot {
                SourceSlot::Stream { handle, .. } => handle.abort(),
                SourceSlot::Reducer { event, .. } => {
                    self.inner
                        .tables
                        .reducers_by_event
                        .write()
                        .entry(event)
                        .or_default()
                        .retain(|b| b.state != raw);
                    self.inner.tables.reducer_pairs.write().remove(&(raw, event));
                }
            }
        }
    }

    /// Unbinds a single reducer from a `(StateId, EventId)` pair.
    pub fn remove_reducer<S, E>(&self, state: StateId<S>, event: EventId<E>) {
        let state_raw = state.raw();
        let event_raw = event.raw();

        self.inner
            .tables
            .reducers_by_event
            .write()
            .entry(event_raw)
            .or_default()
            .retain(|b| b.state != state_raw);
        self.inner.tables.reducer_pairs.write().remove(&(state_raw, event_raw));
        self.tables().remove_reducer_slot(state_raw, event_raw);
    }

    /// Permanently completes a behavior: no further values are delivered,
    /// existing subscriptions end, and any source is cancelled.
    pub fn complete_behavior<T>(&self, id: BehaviorId<T>)
    where
        T: Clone + Send + Sync + 'static,
    {
        let raw = id.raw();
        let capacity = self.capacity();
        self.tables().with_behavior::<T, _>(raw, capacity, |subject| subject.complete());
        self.remove_behavior_sources_raw(raw);
    }

    /// Permanently completes a reducer-driven state.
    pub fn complete_state<T>(&self, id: StateId<T>)
    where
        T: Clone + Send + Sync + 'static,
    {
        let raw = id.raw();
        let capacity = self.capacity();
        self.tables().with_behavior::<T, _>(raw, capacity, |subject| subject.complete());
        self.remove_behavior_sources_raw(raw);
    }

    /// Completes every behavior and state currently registered on this
    /// store. Used when the whole store (not just one lifecycle scope) is
    /// being torn down.
    pub fn complete_all_signals(&self) {
        let ids: Vec<RawId> = self.inner.tables.behaviors.read().keys().copied().collect();
        for raw in ids {
            if let Some(entry) = self.inner.tables.behaviors.read().get(&raw) {
                entry.erased.complete();
            }
            self.remove_behavior_sources_raw(raw);
        }
    }

    /// Tears down every source and reducer tagged with `scope`, leaving
    /// sources registered outside that scope (or with no scope at all)
    /// untouched.
    pub(crate) fn teardown_scope(&self, scope: ScopeId) {
        let behavior_ids: Vec<RawId> = self.inner.tables.behaviors.read().keys().copied().collect();

        for raw in behavior_ids {
            let removed = {
                let table = self.inner.tables.behaviors.read();
                let Some(entry) = table.get(&raw) else { continue };
                let mut sources = entry.sources.lock();
                let all = std::mem::take(&mut *sources);
                let (removed, kept): (Vec<_>, Vec<_>) = all.into_iter().partition(|slot| match slot {
                    SourceSlot::Stream { scope: Some(s), .. } => *s == scope,
                    SourceSlot::Reducer { scope: Some(s), .. } => *s == scope,
                    _ => false,
                });
                *sources = kept;
                removed
            };

            for slot in removed {
                match slot {
                    SourceSlot::Stream { handle, .. } => handle.abort(),
                    SourceSlot::Reducer { event, .. } => {
                        self.inner
                            .tables
                            .reducers_by_event
                            .write()
                            .entry(event)
                            .or_default()
                            .retain(|b| b.state != raw);
                        self.inner.tables.reducer_pairs.write().remove(&(raw, event));
                    }
                }
            }
        }

        let event_ids: Vec<RawId> = self.inner.tables.events.read().keys().copied().collect();
        for raw in event_ids {
            let removed = {
                let table = self.inner.tables.events.read();
                let Some(entry) = table.get(&raw) else { continue };
                let mut sources = entry.sources.lock();
                let all = std::mem::take(&mut *sources);
                let (removed, kept): (Vec<_>, Vec<_>) = all.into_iter().partition(|slot| {
                    matches!(slot, SourceSlot::Stream { scope: Some(s), .. } if *s == scope)
                });
                *sources = kept;
                removed
            };
            for slot in removed {
                if let SourceSlot::Stream { handle, .. } = slot {
                    handle.abort();
                }
            }
        }
    }
}

/// A small `Arc`-held view of a [`Store`]'s tables that closures handed to
/// the dispatch queue can capture without capturing `Store` itself
/// (avoiding an accidental reference cycle through `parent`).
struct StoreHandleForClosures {
    store: Store,
}

impl std::ops::Deref for StoreHandleForClosures {
    type Target = StoreTables;

    fn deref(&self) -> &StoreTables {
        self.store.tables()
    }
}
