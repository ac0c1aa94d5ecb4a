//! Mapping from [`EffectId`] to the function it currently runs.
//!
//! Grounded on `eventually`'s `inmemory.rs` event-store registry pattern
//! (one `RwLock<HashMap<...>>`, short critical sections) and on
//! `eventually::tracing::AggregateRepositoryExt`, whose `with_tracing()`
//! wraps an existing value without changing its type's core behavior --
//! the same shape [`EffectRegistryExt::with_tracing`] gives the registry.

use std::any::Any;
use std::sync::Arc;

use tracing::{instrument, trace};

use crate::effect::config::EffectBoxed;
use crate::id::EffectId;
use crate::store::{SignalStream, Store};

/// Context handed to an effect function alongside its input: the owning
/// store plus the previous run's `(input, result)`, when one exists.
pub struct EffectContext<I, R> {
    pub store: Store,
    pub previous_input: Option<I>,
    pub previous_result: Option<R>,
}

/// The store-wide table of registered effect functions.
///
/// Lives as one of [`crate::store::inner::StoreTables`]'s fields,
/// type-erased the same way behavior/event subjects are.
pub(crate) struct EffectRegistry;

impl EffectRegistry {
    /// Registers (or replaces) the function behind `id`. Replacing an
    /// effect does not disturb any already-running orchestrator: the new
    /// function is picked up starting with the next run it decides to
    /// start.
    #[instrument(skip(store, effect), fields(effect = ?id))]
    pub(crate) fn register<I, R>(
        store: &Store,
        id: EffectId<I, R>,
        effect: EffectBoxed<I, R>,
    ) where
        I: Send + Sync + 'static,
        R: Send + Sync + 'static,
    {
        store.tables().record_name(id.raw(), id.debug_name());
        let erased: Arc<dyn Any + Send + Sync> = Arc::new(effect);
        store.tables().effects.write().insert(id.raw(), erased);
        trace!("effect function registered");
    }

    pub(crate) fn lookup<I, R>(store: &Store, id: EffectId<I, R>) -> Option<EffectBoxed<I, R>>
    where
        I: Send + Sync + 'static,
        R: Send + Sync + 'static,
    {
        let erased = store.tables().effects.read().get(&id.raw())?.clone();
        let boxed = erased
            .downcast::<EffectBoxed<I, R>>()
            .expect("effect identifier reused with a mismatched function signature");
        Some((*boxed).clone())
    }
}

impl Store {
    /// Registers `effect` as the function run by every orchestrator built
    /// against `id`. Always legal; replaces any prior function.
    pub fn add_effect<I, R>(
        &self,
        id: EffectId<I, R>,
        effect: impl Fn(I, EffectContext<I, R>) -> SignalStream<R> + Send + Sync + 'static,
    ) where
        I: Send + Sync + 'static,
        R: Send + Sync + 'static,
    {
        EffectRegistry::register(self, id, Arc::new(effect));
    }

    pub(crate) fn get_effect<I, R>(&self, id: EffectId<I, R>) -> Option<EffectBoxed<I, R>>
    where
        I: Send + Sync + 'static,
        R: Send + Sync + 'static,
    {
        EffectRegistry::lookup(self, id)
    }
}

/// Extension trait letting call sites opt into per-invocation
/// instrumentation of effect registration without changing
/// [`Store::add_effect`] itself, in the style of
/// `eventually::tracing::AggregateRepositoryExt`.
pub trait EffectRegistryExt {
    /// Wraps `effect` so every invocation emits a `tracing` span carrying
    /// the effect identifier's debug name.
    fn with_tracing<I, R>(
        self,
        id: EffectId<I, R>,
        effect: impl Fn(I, EffectContext<I, R>) -> SignalStream<R> + Send + Sync + 'static,
    ) -> Self
    where
        I: Send + Sync + 'static,
        R: Send + Sync + 'static;
}

impl EffectRegistryExt for Store {
    fn with_tracing<I, R>(
        self,
        id: EffectId<I, R>,
        effect: impl Fn(I, EffectContext<I, R>) -> SignalStream<R> + Send + Sync + 'static,
    ) -> Self
    where
        I: Send + Sync + 'static,
        R: Send + Sync + 'static,
    {
        let name = id.debug_name().unwrap_or("effect");
        self.add_effect(id, move |input, ctx| {
            let _span = tracing::trace_span!("effect_invocation", effect = name).entered();
            effect(input, ctx)
        });
        self
    }
}
