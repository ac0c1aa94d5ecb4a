//! The effect orchestrator: the state machine that turns an `input`
//! behavior (plus optional `invalidate`/`trigger` events) into a
//! `combined` behavior, two result event streams and an error stream.
//!
//! Grounded on `eventually`'s `Repository::get`/`save` pattern of driving
//! a single logical operation from a combination of inputs, and on
//! `source::spawn`'s lazy-gate idiom: the whole machine is just another
//! stream handed to [`Store::add_behavior`](crate::store::Store::add_behavior)
//! with `lazy = true`, so it only runs while `combined` (or one of its
//! convenience projections) has a live subscriber -- see
//! [`Store::build_effect_signals`](crate::store::Store::build_effect_signals).

use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::time::Duration;

use futures::future::FutureExt;
use futures::stream::StreamExt;
use tracing::{instrument, trace, warn};

use crate::effect::config::EffectSignalsConfig;
use crate::effect::registry::EffectContext;
use crate::effect::types::{CombinedEffectResult, EffectError, EffectOutcome, InvalidationToken, ResultEvent};
use crate::id::EventId;
use crate::store::{SignalStream, Store};

/// Guarded item out of a running effect stream: either a value or the
/// message of a panic caught while polling for the next one.
enum RunItem<R> {
    Value(R),
    Panicked(String),
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "effect panicked".to_string()
    }
}

/// Wraps an effect's stream so a panic raised while polling for its next
/// item surfaces as one final [`RunItem::Panicked`] instead of unwinding
/// through the orchestrator's own task.
fn guard_run_stream<R>(mut inner: SignalStream<R>) -> SignalStream<RunItem<R>>
where
    R: Send + 'static,
{
    async_stream::stream! {
        loop {
            match AssertUnwindSafe(inner.next()).catch_unwind().await {
                Ok(Some(value)) => yield RunItem::Value(value),
                Ok(None) => break,
                Err(payload) => {
                    yield RunItem::Panicked(panic_message(&payload));
                    break;
                }
            }
        }
    }
    .boxed()
}

/// Whether the current tuple of (input, stored result, invalidation
/// token, triggered input) warrants starting a new effect run.
///
/// Mirrors §4.6's rule 1 verbatim: stale iff the invalidation token moved,
/// no result has ever been stored, or the configured equality says the
/// input changed; in trigger mode, additionally gated on the trigger
/// having already fired for this exact input.
fn should_start_run<I, R>(
    cfg: &EffectSignalsConfig<I, R>,
    current_input: &I,
    result_input: Option<&I>,
    result_token: InvalidationToken,
    invalidation_token: InvalidationToken,
    triggered_input: Option<&I>,
) -> bool {
    let stale = invalidation_token != result_token
        || match result_input {
            None => true,
            Some(ri) => !(cfg.effect_input_equals)(current_input, ri),
        };

    if !stale {
        return false;
    }

    if cfg.trigger.is_some() {
        matches!(triggered_input, Some(t) if (cfg.effect_input_equals)(current_input, t))
    } else {
        true
    }
}

/// Builds the stream that, added as `combined`'s lazy source, *is* the
/// orchestrator: it owns all of the machine's state locally, since it is
/// restarted from scratch every time `combined` goes from zero to one
/// subscriber (matching `addBehavior`'s existing lazy-restart semantics).
#[instrument(skip_all, fields(effect = ?cfg.effect_id))]
pub(crate) fn drive<I, R>(
    store: Store,
    cfg: EffectSignalsConfig<I, R>,
    results: EventId<ResultEvent<I, R>>,
    completed_results: EventId<ResultEvent<I, R>>,
    errors: EventId<EffectError<I>>,
) -> SignalStream<CombinedEffectResult<I, R>>
where
    I: Clone + Send + Sync + Unpin + 'static,
    R: Clone + Send + Sync + Unpin + 'static,
{
    async_stream::stream! {
        let mut current_input: Option<I> = None;
        let mut result: Option<EffectOutcome<I, R>> = None;
        let mut result_input: Option<I> = None;
        let mut result_token = InvalidationToken::default();
        let mut invalidation_token = InvalidationToken::default();
        let mut triggered_input: Option<I> = None;
        let mut result_pending = false;

        if let Some(getter) = &cfg.initial_result {
            result = Some(EffectOutcome::Success(getter()));
        }

        yield CombinedEffectResult {
            current_input: current_input.clone(),
            result: result.clone(),
            result_input: result_input.clone(),
            result_pending,
        };

        let mut input_stream = store.get_behavior(cfg.input);
        let mut invalidate_stream = cfg.invalidate.map(|id| store.get_event_stream(id));
        let mut trigger_stream = cfg.trigger.map(|id| store.get_event_stream(id));

        let mut run_stream: Option<SignalStream<RunItem<R>>> = None;
        let mut debounce_sleep: Option<Pin<Box<tokio::time::Sleep>>> = None;
        let mut pending_run_input: Option<I> = None;

        loop {
            let decided = tokio::select! {
                biased;

                maybe_input = input_stream.next() => {
                    match maybe_input {
                        Some(new_input) => {
                            current_input = Some(new_input);
                            true
                        }
                        None => break,
                    }
                }

                maybe_tick = async { invalidate_stream.as_mut().unwrap().next().await }, if invalidate_stream.is_some() => {
                    if maybe_tick.is_none() {
                        invalidate_stream = None;
                        false
                    } else {
                        invalidation_token = InvalidationToken(invalidation_token.0.wrapping_add(1));
                        true
                    }
                }

                maybe_tick = async { trigger_stream.as_mut().unwrap().next().await }, if trigger_stream.is_some() => {
                    if maybe_tick.is_none() {
                        trigger_stream = None;
                        false
                    } else {
                        triggered_input = current_input.clone();
                        true
                    }
                }

                _ = async { debounce_sleep.as_mut().unwrap().await }, if debounce_sleep.is_some() => {
                    debounce_sleep = None;
                    if let Some(input) = pending_run_input.take() {
                        let prev_input = result_input.clone();
                        let prev_result = match &result {
                            Some(EffectOutcome::Success(value)) => Some(value.clone()),
                            _ => None,
                        };
                        result_input = Some(input.clone());
                        result_token = invalidation_token;

                        match store.get_effect(cfg.effect_id) {
                            Some(effect_fn) => {
                                let effect_fn = match &cfg.wrap_effect {
                                    Some(wrap) => wrap(effect_fn),
                                    None => effect_fn,
                                };
                                let ctx = EffectContext {
                                    store: store.clone(),
                                    previous_input: prev_input,
                                    previous_result: prev_result,
                                };
                                let input_for_call = input.clone();
                                match std::panic::catch_unwind(AssertUnwindSafe(|| effect_fn(input_for_call, ctx))) {
                                    Ok(stream) => run_stream = Some(guard_run_stream(stream)),
                                    Err(payload) => {
                                        let message = panic_message(&payload);
                                        warn!(%message, "effect function panicked synchronously");
                                        result = Some(EffectOutcome::Error(EffectError::new(input, message.clone())));
                                        result_pending = false;
                                        let _ = store.dispatch(errors, EffectError::new(result_input.clone().unwrap(), message)).await;
                                    }
                                }
                            }
                            None => {
                                warn!("no effect function registered for this effect id; run skipped");
                                result_pending = false;
                            }
                        }
                    }
                    true
                }

                maybe_item = async { run_stream.as_mut().unwrap().next().await }, if run_stream.is_some() => {
                    match maybe_item {
                        Some(RunItem::Value(value)) => {
                            result = Some(EffectOutcome::Success(value.clone()));
                            let event = ResultEvent {
                                input: result_input.clone().expect("run stream active implies result_input is set"),
                                value: Some(value),
                                completed: false,
                            };
                            let _ = store.dispatch(results, event).await;
                            true
                        }
                        Some(RunItem::Panicked(message)) => {
                            run_stream = None;
                            result_pending = false;
                            let input = result_input.clone().expect("run stream active implies result_input is set");
                            warn!(%message, "effect stream panicked while polling for its next item");
                            result = Some(EffectOutcome::Error(EffectError::new(input.clone(), message.clone())));
                            let _ = store.dispatch(errors, EffectError::new(input, message)).await;
                            true
                        }
                        None => {
                            run_stream = None;
                            result_pending = false;
                            let input = result_input.clone().expect("run stream active implies result_input is set");
                            let value = match &result {
                                Some(EffectOutcome::Success(value)) => Some(value.clone()),
                                _ => None,
                            };
                            let event = ResultEvent { input, value, completed: true };
                            let _ = store.dispatch(results, event.clone()).await;
                            let _ = store.dispatch(completed_results, event).await;
                            true
                        }
                    }
                }

                else => break,
            };

            if !decided {
                continue;
            }

            if let Some(current) = current_input.clone() {
                if should_start_run(
                    &cfg,
                    &current,
                    result_input.as_ref(),
                    result_token,
                    invalidation_token,
                    triggered_input.as_ref(),
                ) {
                    result_pending = true;
                    pending_run_input = Some(current);
                    run_stream = None;
                    match cfg.debounce {
                        Some(duration) if duration > Duration::ZERO => {
                            debounce_sleep = Some(Box::pin(tokio::time::sleep(duration)));
                        }
                        _ => {
                            // Re-dispatch into the same decision point inline by
                            // faking an elapsed debounce timer of zero duration.
                            debounce_sleep = Some(Box::pin(tokio::time::sleep(Duration::ZERO)));
                        }
                    }
                }
            }

            trace!(pending = result_pending, "combined state updated");
            yield CombinedEffectResult {
                current_input: current_input.clone(),
                result: result.clone(),
                result_input: result_input.clone(),
                result_pending,
            };
        }
    }
    .boxed()
}
