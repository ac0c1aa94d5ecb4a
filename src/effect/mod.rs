//! The Effect Signals Factory: wires one [`EffectSignalsConfig`] into a
//! running orchestrator and the six identifiers a consumer observes it
//! through.

pub mod config;
pub mod orchestrator;
pub mod registry;
pub mod types;

use futures::stream::{self, StreamExt};

use crate::id::{BehaviorId, EventId};
use crate::store::Store;

pub use config::{EffectBoxed, EffectSignalsConfig};
pub use registry::{EffectContext, EffectRegistryExt};
pub use types::{
    CombinedEffectResult, CombinedEffectResultInSuccessState, EffectError, EffectOutcome, EffectState, InvalidationToken,
    ResultEvent,
};

/// The identifiers a built effect orchestrator publishes through.
///
/// Cheap to clone/copy around: every field is itself a `Copy` identifier
/// token, never the data flowing through it.
#[derive(Clone, Copy)]
pub struct EffectSignals<I, R> {
    pub combined: BehaviorId<CombinedEffectResult<I, R>>,
    pub results: EventId<ResultEvent<I, R>>,
    pub completed_results: EventId<ResultEvent<I, R>>,
    pub errors: EventId<EffectError<I>>,
    pub result: BehaviorId<CombinedEffectResultInSuccessState<I, R>>,
    pub pending: BehaviorId<bool>,
}

impl<I, R> EffectSignals<I, R> {
    fn new() -> Self {
        Self {
            combined: BehaviorId::new(),
            results: EventId::new(),
            completed_results: EventId::new(),
            errors: EventId::new(),
            result: BehaviorId::new(),
            pending: BehaviorId::new(),
        }
    }
}

impl Store {
    /// Builds and wires a new effect orchestrator from `config`, returning
    /// the identifiers a consumer subscribes to observe it.
    ///
    /// Subscribing to `result` or `pending` (and not `combined` itself)
    /// still counts as observing `combined`, since both are plain derived
    /// states sourced from it; subscribing only to `results`, `errors` or
    /// `completed_results` never starts the effect (see
    /// [`EffectSignals`]'s fields and §4.6's lazy-subscription guarantee).
    pub fn build_effect_signals<I, R>(&self, config: EffectSignalsConfig<I, R>) -> EffectSignals<I, R>
    where
        I: Clone + Send + Sync + Unpin + 'static,
        R: Clone + Send + Sync + Unpin + 'static,
    {
        let signals = EffectSignals::new();
        let input = config.input;
        let eager = config.eager_input_subscription;

        let driver = orchestrator::drive(
            self.clone(),
            config,
            signals.results,
            signals.completed_results,
            signals.errors,
        );

        self.add_derived_state(signals.combined, driver)
            .expect("freshly-minted identifier cannot already have a source");

        // `result`/`pending` must not subscribe to `combined` until they
        // themselves are subscribed -- otherwise `combined`'s refcount
        // would be pinned above zero from this point on, defeating the
        // whole point of it being a lazy source. `stream::once` defers the
        // actual `get_behavior` call to the lazy source's first poll,
        // which only happens once its own gate opens.
        let combined_id = signals.combined;

        let store_for_result = self.clone();
        self.add_derived_state(
            signals.result,
            stream::once(async move { store_for_result.get_behavior(combined_id) })
                .flatten()
                .map(|combined| CombinedEffectResultInSuccessState::from(&combined))
                .boxed(),
        )
        .expect("freshly-minted identifier cannot already have a source");

        let store_for_pending = self.clone();
        self.add_derived_state(
            signals.pending,
            stream::once(async move { store_for_pending.get_behavior(combined_id) })
                .flatten()
                .map(|combined| combined.result_pending)
                .boxed(),
        )
        .expect("freshly-minted identifier cannot already have a source");

        if eager {
            self.keep_behavior_warm(input);
        }

        signals
    }

    /// Holds a standing subscription to `id` open for as long as `self`
    /// lives, so a lazy upstream source attached to `id` starts producing
    /// values immediately rather than waiting for a consumer-side
    /// subscriber. Used by [`build_effect_signals`](Store::build_effect_signals)
    /// when [`EffectSignalsConfig::eager_input_subscription`] is set.
    fn keep_behavior_warm<T>(&self, id: BehaviorId<T>)
    where
        T: Clone + Send + Sync + Unpin + 'static,
    {
        let mut stream = self.get_behavior(id);
        tokio::spawn(async move { while stream.next().await.is_some() {} });
    }
}
