//! Configuration for one effect orchestrator instance (built by
//! [`Store::build_effect_signals`](crate::store::Store::build_effect_signals)):
//! which effect to run, when to consider its input "new", and how
//! eagerly/aggressively to run it.

use std::sync::Arc;

use crate::id::{BehaviorId, EffectId, EventId};

/// Builder-style configuration for an effect orchestrator, mirroring the
/// way `eventually::command::Handler` configuration is assembled: a plain
/// data value that is only ever read, never mutated, once the
/// orchestrator starts running.
pub struct EffectSignalsConfig<I, R> {
    pub(crate) effect_id: EffectId<I, R>,
    pub(crate) input: BehaviorId<I>,
    pub(crate) invalidate: Option<EventId<()>>,
    pub(crate) trigger: Option<EventId<()>>,
    pub(crate) effect_input_equals: Arc<dyn Fn(&I, &I) -> bool + Send + Sync>,
    pub(crate) initial_result: Option<Arc<dyn Fn() -> R + Send + Sync>>,
    pub(crate) debounce: Option<std::time::Duration>,
    pub(crate) eager_input_subscription: bool,
    pub(crate) wrap_effect: Option<Arc<dyn Fn(EffectBoxed<I, R>) -> EffectBoxed<I, R> + Send + Sync>>,
}

/// Type-erased shape of a registered effect function, boxed so
/// [`EffectSignalsConfig::wrapped_effect_getter`] can intercept it without
/// knowing the function's concrete closure type.
pub type EffectBoxed<I, R> = Arc<dyn Fn(I, super::registry::EffectContext<I, R>) -> crate::store::SignalStream<R> + Send + Sync>;

impl<I, R> EffectSignalsConfig<I, R>
where
    I: PartialEq + Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    /// Configuration with reference-equality-like defaults (`PartialEq`),
    /// no invalidation/trigger sources, no debounce, no initial result,
    /// and lazy input subscription.
    pub fn new(effect_id: EffectId<I, R>, input: BehaviorId<I>) -> Self {
        Self {
            effect_id,
            input,
            invalidate: None,
            trigger: None,
            effect_input_equals: Arc::new(|a, b| a == b),
            initial_result: None,
            debounce: None,
            eager_input_subscription: false,
            wrap_effect: None,
        }
    }

    /// Overrides the equality used to decide whether a new input warrants
    /// a new effect run.
    pub fn with_input_equals(mut self, equals: impl Fn(&I, &I) -> bool + Send + Sync + 'static) -> Self {
        self.effect_input_equals = Arc::new(equals);
        self
    }

    /// Attaches the event that forces a re-run even for an input the
    /// equality function considers unchanged.
    pub fn with_invalidate(mut self, invalidate: EventId<()>) -> Self {
        self.invalidate = Some(invalidate);
        self
    }

    /// Gates effect runs behind `trigger`: inputs are tracked but do not
    /// invoke the effect until `trigger` fires for the current input.
    pub fn with_trigger(mut self, trigger: EventId<()>) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// Seeds `combined`'s `result` before any input has arrived, and makes
    /// the initial `resultPending` read `false`.
    pub fn initial_result_getter(mut self, getter: impl Fn() -> R + Send + Sync + 'static) -> Self {
        self.initial_result = Some(Arc::new(getter));
        self
    }

    /// Debounces effect *invocation* by `duration`; `combined`'s
    /// `currentInput` still updates immediately on every input change.
    pub fn effect_debounce_time(mut self, duration: std::time::Duration) -> Self {
        self.debounce = Some(duration);
        self
    }

    /// Subscribes the `input` behavior eagerly, even before anyone
    /// subscribes to `combined`.
    pub fn eager_input_subscription(mut self, eager: bool) -> Self {
        self.eager_input_subscription = eager;
        self
    }

    /// Wraps the registered effect function with an interceptor, e.g. to
    /// transform results before they reach `combined`/`results`.
    pub fn wrapped_effect_getter(
        mut self,
        wrap: impl Fn(EffectBoxed<I, R>) -> EffectBoxed<I, R> + Send + Sync + 'static,
    ) -> Self {
        self.wrap_effect = Some(Arc::new(wrap));
        self
    }
}
