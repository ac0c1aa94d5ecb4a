//! The thin `SignalsFactory` wrapper: packages a store-wiring recipe as a
//! reusable, composable value, in the staged-builder style
//! `AggregateRootScenario` uses for `given`/`when`/`then` -- here the
//! stages are `new`/`extend_setup`/`connect`/`build` instead.
//!
//! This is deliberately the thin contract only: the full bind/fmap/compose
//! monadic algebra over factories is not implemented. Composing two
//! factories' outputs nests them as a plain `(O1, O2)` tuple rather than
//! merging named fields with a `conflicts1`/`conflicts2` renaming
//! discipline -- Rust's static field access makes that renaming scheme
//! unnecessary: two factories can never collide on a field name they
//! don't share a struct with.

use crate::error::ConfigError;
use crate::store::Store;

/// A deferred recipe for wiring some set of identifiers into a [`Store`],
/// producing `O` (typically a small `Copy` struct of the identifiers it
/// just registered) once [`build`](SignalsFactory::build) runs it.
pub struct SignalsFactory<O> {
    setup: Box<dyn FnOnce(&Store) -> Result<O, ConfigError> + Send>,
}

impl<O> SignalsFactory<O>
where
    O: 'static,
{
    /// Wraps a wiring closure without running it.
    pub fn new(setup: impl FnOnce(&Store) -> Result<O, ConfigError> + Send + 'static) -> Self {
        Self { setup: Box::new(setup) }
    }

    /// Runs `self`'s recipe against `store`, then `f` against the same
    /// store and `self`'s output, producing a factory for the combined
    /// result.
    pub fn extend_setup<O2>(self, f: impl FnOnce(&Store, O) -> Result<O2, ConfigError> + Send + 'static) -> SignalsFactory<O2>
    where
        O2: 'static,
    {
        SignalsFactory::new(move |store| {
            let out = (self.setup)(store)?;
            f(store, out)
        })
    }

    /// Runs both `self` and `other` against the same store, pairing their
    /// outputs. Registration order is `self` then `other`.
    pub fn connect<O2>(self, other: SignalsFactory<O2>) -> SignalsFactory<(O, O2)>
    where
        O2: 'static,
    {
        SignalsFactory::new(move |store| {
            let a = (self.setup)(store)?;
            let b = (other.setup)(store)?;
            Ok((a, b))
        })
    }

    /// Runs the recipe against `store`, consuming the factory.
    pub fn build(self, store: &Store) -> Result<O, ConfigError> {
        (self.setup)(store)
    }
}

#[cfg(test)]
mod tests {
    use futures::stream::StreamExt;

    use super::*;
    use crate::id::{BehaviorId, StateId};

    #[tokio::test]
    async fn connect_runs_both_recipes_and_pairs_their_output() {
        let store = Store::new();
        let counter = StateId::<i32>::named("counter");
        let flag = StateId::<bool>::named("flag");

        let counters = SignalsFactory::new(move |store| {
            store.add_state(counter, 41)?;
            Ok(counter)
        });
        let flags = SignalsFactory::new(move |store| {
            store.add_state(flag, true)?;
            Ok(flag)
        });

        let (counter_id, flag_id) = counters.connect(flags).build(&store).expect("both recipes succeed");

        assert_eq!(store.get_state(counter_id).next().await, Some(41));
        assert_eq!(store.get_state(flag_id).next().await, Some(true));
    }

    #[tokio::test]
    async fn extend_setup_sees_the_prior_stages_output() {
        let store = Store::new();
        let base = StateId::<i32>::named("base");
        let doubled = BehaviorId::<i32>::named("doubled");

        let factory = SignalsFactory::new(move |store| {
            store.add_state(base, 21)?;
            Ok(base)
        })
        .extend_setup(move |store, base_id| {
            store.add_derived_state(doubled, store.get_state(base_id).map(|v| v * 2))?;
            Ok((base_id, doubled))
        });

        let (_base_id, doubled_id) = factory.build(&store).expect("setup succeeds");
        assert_eq!(store.get_behavior(doubled_id).next().await, Some(42));
    }
}
