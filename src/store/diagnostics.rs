//! Read-only introspection over a store's current wiring.
//!
//! Grounded on `eventually::tracing::AggregateRepositoryExt`: that
//! extension trait layers observability onto an existing type without the
//! core type needing to know about it. Here the observability lives
//! directly on [`Store`] since there is no natural "wrapped" vs
//! "unwrapped" distinction, but the spirit -- surface facts about the
//! store's internal state without touching dispatch/consume behavior -- is
//! the same.

use crate::id::{BehaviorId, EventId};
use crate::store::Store;

impl Store {
    /// Whether `id` currently has at least one live subscriber.
    pub fn is_subscribed<T>(&self, id: BehaviorId<T>) -> bool
    where
        T: Clone + Send + Sync + 'static,
    {
        let capacity = self.capacity();
        self.tables()
            .with_behavior::<T, _>(id.raw(), capacity, |subject| subject.refcount() > 0)
    }

    /// Whether a behavior has at least one source attached.
    pub fn is_behavior_added<T>(&self, id: BehaviorId<T>) -> bool {
        self.tables().behavior_source_count(id.raw()) > 0
    }

    /// Whether an event has at least one source attached.
    pub fn is_event_added<T>(&self, id: EventId<T>) -> bool {
        self.tables().event_source_count(id.raw()) > 0
    }

    /// How many independent sources are currently feeding `id`. Normally
    /// `0` or `1` for a behavior (`addBehavior` rejects a second source);
    /// for a state, this counts its bound reducers.
    pub fn number_of_behavior_sources<T>(&self, id: BehaviorId<T>) -> usize {
        self.tables().behavior_source_count(id.raw())
    }

    /// Debug-friendly names (or raw-id fallbacks) of every registered
    /// behavior with zero current subscribers. Intended for spotting
    /// wiring that was set up but never consumed.
    pub fn unsubscribed_identifiers(&self) -> Vec<String> {
        let table = self.tables().behaviors.read();
        table
            .iter()
            .filter(|(_, entry)| entry.erased.refcount() == 0)
            .map(|(raw, _)| self.tables().display_name(*raw))
            .collect()
    }

    /// Debug-friendly names (or raw-id fallbacks) of every registered
    /// behavior with zero sources. Intended for spotting a consumer that
    /// subscribed to an identifier nobody ever produces for.
    pub fn no_source_behavior_identifiers(&self) -> Vec<String> {
        let table = self.tables().behaviors.read();
        table
            .iter()
            .filter(|(_, entry)| entry.sources.lock().is_empty())
            .map(|(raw, _)| self.tables().display_name(*raw))
            .collect()
    }
}
