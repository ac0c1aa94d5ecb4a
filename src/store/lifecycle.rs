//! Scoped teardown: registering a batch of sources/reducers that can later
//! be torn down together, without having to track every identifier by hand.
//!
//! Grounded on `eventually`'s `command::Scenario` given/when/then builder in
//! spirit only (the dataflow is unrelated): both hand the caller a small
//! token object whose lifetime brackets a batch of related registrations,
//! so the caller composes behavior out of closures instead of juggling
//! cleanup lists themselves.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::stream::Stream;

use crate::error::ConfigError;
use crate::id::{BehaviorId, EventId, StateId};
use crate::store::Store;

/// Identifies one `getLifecycleHandle` scope. Every source or reducer
/// registered while a scope is active is tagged with its `ScopeId`, so
/// [`LifecycleHandle::end`] and [`LifecycleHandle::reset`] know which
/// entries to tear down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ScopeId(u64);

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

fn next_scope_id() -> ScopeId {
    ScopeId(NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed))
}

/// A view onto the store passed into a lifecycle registration callback.
///
/// Every `add_*` call made through this scope (rather than directly on a
/// [`Store`]) is tagged with the owning [`LifecycleHandle`], so it can be
/// torn down as a unit.
pub struct LifecycleScope<'a> {
    pub(crate) store: &'a Store,
    pub(crate) id: ScopeId,
}

impl<'a> LifecycleScope<'a> {
    /// The store this scope was opened on, for registration calls that do
    /// not need scope tagging (e.g. a one-off `dispatch`).
    pub fn store(&self) -> &Store {
        self.store
    }

    pub(crate) fn tag(&self) -> Option<ScopeId> {
        Some(self.id)
    }

    /// Registers `stream` as `id`'s source, tagged with this scope so
    /// [`LifecycleHandle::end`]/[`reset`](LifecycleHandle::reset) can tear
    /// it down together with everything else registered here.
    pub fn add_behavior<T>(
        &self,
        id: BehaviorId<T>,
        stream: impl Stream<Item = T> + Send + Unpin + 'static,
        lazy: bool,
    ) -> Result<(), ConfigError>
    where
        T: Clone + Send + Sync + Unpin + 'static,
    {
        self.store.add_behavior_scoped(id, stream, lazy, self.tag())
    }

    /// Scope-tagged shorthand for a lazy [`add_behavior`](Self::add_behavior).
    pub fn add_derived_state<T>(&self, id: BehaviorId<T>, stream: impl Stream<Item = T> + Send + Unpin + 'static) -> Result<(), ConfigError>
    where
        T: Clone + Send + Sync + Unpin + 'static,
    {
        self.add_behavior(id, stream, true)
    }

    /// Binds `reducer` to `(state, event)`, tagged with this scope.
    pub fn add_reducer<S, E>(&self, state: StateId<S>, event: EventId<E>, reducer: impl Fn(S, E) -> S + Send + Sync + 'static) -> Result<(), ConfigError>
    where
        S: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        self.store.add_reducer_scoped(state, event, reducer, self.tag())
    }

    /// Registers `stream` as one source of event `id`, tagged with this
    /// scope.
    pub fn add_event_source<T>(&self, id: EventId<T>, stream: impl Stream<Item = T> + Send + Unpin + 'static)
    where
        T: Clone + Send + Sync + 'static,
    {
        self.store.add_event_source_scoped(id, stream, self.tag())
    }
}

/// A handle returned by [`Store::get_lifecycle_handle`], governing every
/// source and reducer registered through the [`LifecycleScope`] it was
/// opened with.
pub struct LifecycleHandle {
    store: Store,
    id: ScopeId,
    register: Arc<dyn Fn(&LifecycleScope) + Send + Sync>,
}

impl LifecycleHandle {
    pub(crate) fn new(
        store: Store,
        id: ScopeId,
        register: Arc<dyn Fn(&LifecycleScope) + Send + Sync>,
    ) -> Self {
        Self { store, id, register }
    }

    /// Tears down every source and reducer registered under this scope,
    /// completes nothing, and does not re-register. Use this when the scope
    /// is permanently done (e.g. a component unmounting for good).
    pub fn end(&self) {
        self.store.teardown_scope(self.id);
    }

    /// Tears down every source and reducer registered under this scope and
    /// immediately re-runs the original registration callback, restoring a
    /// clean slate. Use this for a component that remounts with fresh
    /// initial state.
    pub fn reset(&self) {
        self.store.teardown_scope(self.id);
        let scope = LifecycleScope {
            store: &self.store,
            id: self.id,
        };
        (self.register)(&scope);
    }
}

impl Store {
    /// Opens a new lifecycle scope and immediately runs `register` against
    /// it, returning a handle that can later tear the scope down
    /// ([`LifecycleHandle::end`]) or tear down and replay it
    /// ([`LifecycleHandle::reset`]).
    ///
    /// Calling this from within another lifecycle registration callback is
    /// rejected with [`ConfigError::NestedLifecycleRegistration`]: nesting
    /// would make it ambiguous which scope newly-registered sources belong
    /// to.
    pub fn get_lifecycle_handle(
        &self,
        register: impl Fn(&LifecycleScope) + Send + Sync + 'static,
    ) -> Result<LifecycleHandle, ConfigError> {
        if self.inner.in_lifecycle_registration.swap(true, Ordering::SeqCst) {
            return Err(ConfigError::NestedLifecycleRegistration);
        }

        let id = next_scope_id();
        let register: Arc<dyn Fn(&LifecycleScope) + Send + Sync> = Arc::new(register);

        let scope = LifecycleScope { store: self, id };
        (register)(&scope);

        self.inner.in_lifecycle_registration.store(false, Ordering::SeqCst);

        Ok(LifecycleHandle::new(self.clone(), id, register))
    }
}
