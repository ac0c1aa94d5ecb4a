//! Value types exchanged by the effect orchestrator.
//!
//! `NO_VALUE`-style sentinels from the source material collapse onto plain
//! `Option<T>` here: unlike a dynamically typed host, Rust's `Option` is
//! already orthogonal to whatever `T` itself can hold, so no separate
//! "absent" marker value is needed.

use std::fmt;

use thiserror::Error;

/// An unhandled error raised by an effect function or its result stream.
///
/// Mirrors [`eventually::store::AppendError`]'s shape: a fixed message
/// plus the input that was being processed when the failure happened,
/// never a bare `String` standing in for the whole error.
#[derive(Debug, Clone, Error)]
#[error("unhandled effect error")]
pub struct EffectError<I> {
    /// The input that was in flight when the effect failed.
    pub error_input: I,
    /// Human-readable detail, usually the wrapped error's `Display` output.
    pub message: String,
}

impl<I> EffectError<I> {
    pub fn new(error_input: I, message: impl Into<String>) -> Self {
        Self {
            error_input,
            message: message.into(),
        }
    }
}

/// One emission out of an effect's result stream, published on `results`
/// (and, for the final one, also on `completedResults`).
#[derive(Debug, Clone)]
pub struct ResultEvent<I, R> {
    pub input: I,
    pub value: Option<R>,
    /// `true` exactly once per effect run, on the event that reports the
    /// run's stream has ended (successfully or not).
    pub completed: bool,
}

/// Either a successful emission or the unhandled error that ended a run,
/// tagged so `combined` can discriminate success/error without losing the
/// input the outcome belongs to.
#[derive(Debug, Clone)]
pub enum EffectOutcome<I, R> {
    Success(R),
    Error(EffectError<I>),
}

/// The four-state joint view of an effect orchestrator's input and
/// latest result, published on `combined`.
///
/// The discriminator falls out of the field combination rather than
/// being stored directly; see [`CombinedEffectResult::state`].
#[derive(Debug, Clone)]
pub struct CombinedEffectResult<I, R> {
    pub current_input: Option<I>,
    pub result: Option<EffectOutcome<I, R>>,
    pub result_input: Option<I>,
    pub result_pending: bool,
}

/// The four states a [`CombinedEffectResult`] can be read as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectState {
    Initial,
    Pending,
    Success,
    Error,
}

impl<I, R> CombinedEffectResult<I, R> {
    pub fn initial() -> Self {
        Self {
            current_input: None,
            result: None,
            result_input: None,
            result_pending: false,
        }
    }

    pub fn state(&self) -> EffectState {
        if self.result_pending {
            return EffectState::Pending;
        }
        match &self.result {
            Some(EffectOutcome::Success(_)) => EffectState::Success,
            Some(EffectOutcome::Error(_)) => EffectState::Error,
            None => EffectState::Initial,
        }
    }
}

impl<I, R> fmt::Debug for CombinedEffectResultInSuccessState<I, R>
where
    I: fmt::Debug,
    R: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CombinedEffectResultInSuccessState")
            .field("current_input", &self.current_input)
            .field("result", &self.result)
            .field("result_input", &self.result_input)
            .field("result_pending", &self.result_pending)
            .finish()
    }
}

/// Convenience projection of [`CombinedEffectResult`] that drops the error
/// variant, exposed as `result` by the orchestrator.
#[derive(Clone)]
pub struct CombinedEffectResultInSuccessState<I, R> {
    pub current_input: Option<I>,
    pub result: Option<R>,
    pub result_input: Option<I>,
    pub result_pending: bool,
}

impl<I: Clone, R: Clone> From<&CombinedEffectResult<I, R>> for CombinedEffectResultInSuccessState<I, R> {
    fn from(combined: &CombinedEffectResult<I, R>) -> Self {
        let result = match &combined.result {
            Some(EffectOutcome::Success(value)) => Some(value.clone()),
            _ => None,
        };
        Self {
            current_input: combined.current_input.clone(),
            result,
            result_input: combined.result_input.clone(),
            result_pending: combined.result_pending,
        }
    }
}

/// An opaque token stamped on the orchestrator's stored result, bumped
/// every time `invalidate` fires. Equality (not ordering) is all that
/// matters: a stored result is stale exactly when its token differs from
/// the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InvalidationToken(pub(crate) u64);
