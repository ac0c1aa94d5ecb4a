//! Type-erased bookkeeping behind the [`Store`](super::Store) facade.
//!
//! Every behavior/state identifier maps to one [`BehaviorEntry`]; every
//! event identifier maps to one [`EventEntry`]. Both are looked up by
//! [`RawId`] so the tables can be plain `HashMap`s despite the public API
//! being fully generic over payload types -- the same type-erasure trick
//! `eventually`'s `inmemory.rs` uses for its `indexed_event_streams` map,
//! just one level further since here the *value* type varies too, not only
//! the key.
//!
//! Each entry keeps its subject two ways: as `Arc<dyn Any + Send + Sync>`,
//! from which the concrete `Arc<BehaviorSubject<T>>`/`Arc<EventSubject<T>>`
//! can be recovered (needed to hand a real sink to `source::spawn`), and as
//! a small non-generic trait object for diagnostics that must iterate every
//! entry regardless of payload type. Both point at the same allocation --
//! they are two views, not two copies.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;

use crate::id::RawId;
use crate::source::SourceHandle;
use crate::store::lifecycle::ScopeId;
use crate::subject::{BehaviorSubject, EventSubject};

/// Type-erased view onto a [`BehaviorSubject<T>`] for some `T` the table
/// itself does not know about.
pub(crate) trait BehaviorErased: Send + Sync {
    fn refcount(&self) -> usize;
    fn is_completed(&self) -> bool;
    fn complete(&self);
    fn is_subscribed_stream(&self) -> watch::Receiver<bool>;
}

impl<T> BehaviorErased for BehaviorSubject<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn refcount(&self) -> usize {
        BehaviorSubject::refcount(self)
    }

    fn is_completed(&self) -> bool {
        BehaviorSubject::is_completed(self)
    }

    fn complete(&self) {
        BehaviorSubject::complete(self)
    }

    fn is_subscribed_stream(&self) -> watch::Receiver<bool> {
        BehaviorSubject::is_subscribed_stream(self)
    }
}

/// Type-erased view onto an [`EventSubject<T>`].
pub(crate) trait EventErased: Send + Sync {
    fn refcount(&self) -> usize;
}

impl<T> EventErased for EventSubject<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn refcount(&self) -> usize {
        EventSubject::refcount(self)
    }
}

/// One registered upstream of a behavior or state identifier.
pub(crate) enum SourceSlot {
    /// A `Stream`-backed source (`addBehavior`, `addDerivedState`,
    /// `connect`, `connectObservable`), forwarded by a supervised task.
    Stream {
        handle: SourceHandle,
        scope: Option<ScopeId>,
    },
    /// A reducer bound to one event identifier. The actual apply-function
    /// lives in [`StoreTables::reducers_by_event`]; this slot exists purely
    /// so diagnostics and lifecycle teardown can count and remove it
    /// without knowing the reducer's payload types.
    Reducer {
        event: RawId,
        scope: Option<ScopeId>,
    },
}

pub(crate) struct BehaviorEntry {
    pub(crate) any: Arc<dyn Any + Send + Sync>,
    pub(crate) erased: Arc<dyn BehaviorErased>,
    pub(crate) sources: Mutex<Vec<SourceSlot>>,
}

pub(crate) struct EventEntry {
    pub(crate) any: Arc<dyn Any + Send + Sync>,
    pub(crate) erased: Arc<dyn EventErased>,
    pub(crate) sources: Mutex<Vec<SourceSlot>>,
}

/// A reducer bound to a `(StateId, EventId)` pair, applied synchronously
/// from the store's dispatch path -- never via a spawned task -- so that
/// reduction is causally ordered with the dispatch that triggered it (see
/// `queue.rs`).
pub(crate) struct ReducerBinding {
    pub(crate) state: RawId,
    pub(crate) apply: Box<dyn Fn(Box<dyn Any + Send>) + Send + Sync>,
}

/// All the type-erased tables a [`Store`](super::Store) owns.
#[derive(Default)]
pub(crate) struct StoreTables {
    pub(crate) behaviors: RwLock<HashMap<RawId, BehaviorEntry>>,
    pub(crate) events: RwLock<HashMap<RawId, EventEntry>>,
    pub(crate) reducers_by_event: RwLock<HashMap<RawId, Vec<ReducerBinding>>>,
    pub(crate) reducer_pairs: RwLock<HashSet<(RawId, RawId)>>,
    pub(crate) debug_names: RwLock<HashMap<RawId, &'static str>>,
    /// Type-erased effect functions registered via `Store::add_effect`,
    /// downcast back to their concrete `Arc<dyn Fn(I) -> SignalStream<R> +
    /// Send + Sync>` form by the effect registry at lookup time.
    pub(crate) effects: RwLock<HashMap<RawId, Arc<dyn Any + Send + Sync>>>,
}

impl StoreTables {
    pub(crate) fn record_name(&self, id: RawId, name: Option<&'static str>) {
        if let Some(name) = name {
            self.debug_names.write().insert(id, name);
        }
    }

    pub(crate) fn display_name(&self, id: RawId) -> String {
        match self.debug_names.read().get(&id) {
            Some(name) => format!("{name} (#{})", id.value()),
            None => format!("#{}", id.value()),
        }
    }

    fn ensure_behavior<T>(&self, id: RawId, capacity: usize)
    where
        T: Clone + Send + Sync + 'static,
    {
        if self.behaviors.read().contains_key(&id) {
            return;
        }
        let mut table = self.behaviors.write();
        table.entry(id).or_insert_with(|| {
            let subject = Arc::new(BehaviorSubject::<T>::new(capacity, None));
            BehaviorEntry {
                any: subject.clone(),
                erased: subject,
                sources: Mutex::new(Vec::new()),
            }
        });
    }

    fn ensure_event<T>(&self, id: RawId, capacity: usize)
    where
        T: Clone + Send + Sync + 'static,
    {
        if self.events.read().contains_key(&id) {
            return;
        }
        let mut table = self.events.write();
        table.entry(id).or_insert_with(|| {
            let subject = Arc::new(EventSubject::<T>::new(capacity));
            EventEntry {
                any: subject.clone(),
                erased: subject,
                sources: Mutex::new(Vec::new()),
            }
        });
    }

    /// Looks up (creating if absent) the behavior/state subject for `id`
    /// and runs `f` against it while the table's read lock is held. `f`
    /// must not re-enter any `StoreTables` method that takes the write
    /// lock or it will deadlock.
    pub(crate) fn with_behavior<T, R>(
        &self,
        id: RawId,
        capacity: usize,
        f: impl FnOnce(&BehaviorSubject<T>) -> R,
    ) -> R
    where
        T: Clone + Send + Sync + 'static,
    {
        self.ensure_behavior::<T>(id, capacity);
        let table = self.behaviors.read();
        let entry = table.get(&id).expect("just ensured");
        f(entry
            .any
            .downcast_ref::<BehaviorSubject<T>>()
            .expect("behavior identifier reused with a mismatched payload type"))
    }

    /// Returns a concrete, clonable handle onto the behavior subject for
    /// `id`, creating a sourceless one if absent. Used where an owned
    /// `'static` handle is required (e.g. as the sink of `source::spawn`).
    pub(crate) fn behavior_subject<T>(&self, id: RawId, capacity: usize) -> Arc<BehaviorSubject<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.ensure_behavior::<T>(id, capacity);
        let table = self.behaviors.read();
        table
            .get(&id)
            .expect("just ensured")
            .any
            .clone()
            .downcast::<BehaviorSubject<T>>()
            .expect("behavior identifier reused with a mismatched payload type")
    }

    pub(crate) fn with_event<T, R>(
        &self,
        id: RawId,
        capacity: usize,
        f: impl FnOnce(&EventSubject<T>) -> R,
    ) -> R
    where
        T: Clone + Send + Sync + 'static,
    {
        self.ensure_event::<T>(id, capacity);
        let table = self.events.read();
        let entry = table.get(&id).expect("just ensured");
        f(entry
            .any
            .downcast_ref::<EventSubject<T>>()
            .expect("event identifier reused with a mismatched payload type"))
    }

    pub(crate) fn event_subject<T>(&self, id: RawId, capacity: usize) -> Arc<EventSubject<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.ensure_event::<T>(id, capacity);
        let table = self.events.read();
        table
            .get(&id)
            .expect("just ensured")
            .any
            .clone()
            .downcast::<EventSubject<T>>()
            .expect("event identifier reused with a mismatched payload type")
    }

    pub(crate) fn push_behavior_source(&self, id: RawId, slot: SourceSlot) {
        self.behaviors
            .read()
            .get(&id)
            .expect("behavior entry must already exist")
            .sources
            .lock()
            .push(slot);
    }

    pub(crate) fn push_event_source(&self, id: RawId, slot: SourceSlot) {
        self.events
            .read()
            .get(&id)
            .expect("event entry must already exist")
            .sources
            .lock()
            .push(slot);
    }

    /// Removes and returns every source currently registered for a
    /// behavior/state identifier. Callers are responsible for aborting any
    /// [`SourceSlot::Stream`] handles and for removing any
    /// [`SourceSlot::Reducer`] bindings from `reducers_by_event`.
    pub(crate) fn drain_behavior_sources(&self, id: RawId) -> Vec<SourceSlot> {
        self.behaviors
            .read()
            .get(&id)
            .map(|entry| std::mem::take(&mut *entry.sources.lock()))
            .unwrap_or_default()
    }

    pub(crate) fn behavior_source_count(&self, id: RawId) -> usize {
        self.behaviors
            .read()
            .get(&id)
            .map(|e| e.sources.lock().len())
            .unwrap_or(0)
    }

    pub(crate) fn event_source_count(&self, id: RawId) -> usize {
        self.events
            .read()
            .get(&id)
            .map(|e| e.sources.lock().len())
            .unwrap_or(0)
    }

    /// Removes the `SourceSlot::Reducer` entry bookkeeping a single
    /// `(state, event)` reducer binding, leaving any other sources on
    /// `state` untouched.
    pub(crate) fn remove_reducer_slot(&self, state: RawId, event: RawId) {
        if let Some(entry) = self.behaviors.read().get(&state) {
            entry
                .sources
                .lock()
                .retain(|slot| !matches!(slot, SourceSlot::Reducer { event: e, .. } if *e == event));
        }
    }

    pub(crate) fn behavior_exists(&self, id: RawId) -> bool {
        self.behaviors.read().contains_key(&id)
    }

    pub(crate) fn event_exists(&self, id: RawId) -> bool {
        self.events.read().contains_key(&id)
    }
}
