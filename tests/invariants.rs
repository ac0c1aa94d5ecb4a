//! The testable properties from the behavioral specification: event
//! ordering, lazy effect subscription, single-source enforcement,
//! source-removal reuse, invalidation, switch-cancellation, and lifecycle
//! scope teardown/reset.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use signal_store::effect::EffectSignalsConfig;
use signal_store::{BehaviorId, ConfigError, EffectId, EventId, StateId, Store};

#[derive(Clone, Debug, PartialEq)]
struct SearchInput {
    query: String,
    page: i32,
}

#[derive(Clone, Debug, PartialEq)]
struct SearchResult {
    matches: Vec<String>,
    total: i32,
}

#[tokio::test]
async fn p1_event_dispatch_preserves_program_order() {
    let store = Store::new();
    let ticks = EventId::<i32>::named("p1_ticks");
    let mut stream = store.get_event_stream(ticks);

    for i in 0..20 {
        store.dispatch(ticks, i).await;
    }

    for i in 0..20 {
        assert_eq!(stream.next().await, Some(i));
    }
}

#[tokio::test]
async fn p2_effect_stays_dormant_without_a_combined_subscriber() {
    let store = Store::new();
    let effect_id = EffectId::<SearchInput, SearchResult>::named("p2_search");
    let input_id = BehaviorId::<SearchInput>::named("p2_input");

    let (tx, rx) = mpsc::unbounded_channel();
    store.add_behavior(input_id, UnboundedReceiverStream::new(rx), false).unwrap();

    let invoked = Arc::new(AtomicBool::new(false));
    let invoked_for_effect = invoked.clone();
    store.add_effect(effect_id, move |input: SearchInput, _ctx| {
        invoked_for_effect.store(true, Ordering::SeqCst);
        async_stream::stream! {
            yield SearchResult { matches: vec![input.query.clone()], total: input.page };
        }
        .boxed()
    });

    let config = EffectSignalsConfig::new(effect_id, input_id);
    let signals = store.build_effect_signals(config);

    // Subscribing only to the event-shaped projections must never start
    // the effect; only `combined`/`result`/`pending` count as observing it.
    let _results = store.get_event_stream(signals.results);
    let _errors = store.get_event_stream(signals.errors);
    let _completed = store.get_event_stream(signals.completed_results);

    tx.send(SearchInput { query: "rust".into(), page: 0 }).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!invoked.load(Ordering::SeqCst));
}

#[tokio::test]
async fn p3_a_second_source_is_rejected_for_both_behaviors_and_reducers() {
    let store = Store::new();
    let behavior = BehaviorId::<i32>::named("p3_behavior");

    let (_tx1, rx1) = mpsc::unbounded_channel::<i32>();
    let (_tx2, rx2) = mpsc::unbounded_channel::<i32>();
    store.add_behavior(behavior, UnboundedReceiverStream::new(rx1), false).unwrap();
    let second = store.add_behavior(behavior, UnboundedReceiverStream::new(rx2), false);
    assert_eq!(second, Err(ConfigError::SourceAlreadyAdded));

    let counter = StateId::<i32>::named("p3_counter");
    let tick = EventId::<()>::named("p3_tick");
    store.add_state(counter, 0).unwrap();
    store.add_reducer(counter, tick, |state, ()| state + 1).unwrap();
    let second_reducer = store.add_reducer(counter, tick, |state, ()| state + 1);
    assert_eq!(second_reducer, Err(ConfigError::ReducerAlreadyAdded));
}

#[tokio::test]
async fn p4_removing_sources_frees_the_slot_for_reuse() {
    let store = Store::new();
    let behavior = BehaviorId::<i32>::named("p4_behavior");

    let (_tx1, rx1) = mpsc::unbounded_channel::<i32>();
    store.add_behavior(behavior, UnboundedReceiverStream::new(rx1), false).unwrap();
    assert_eq!(store.number_of_behavior_sources(behavior), 1);

    store.remove_behavior_sources(behavior);
    assert_eq!(store.number_of_behavior_sources(behavior), 0);

    let (_tx2, rx2) = mpsc::unbounded_channel::<i32>();
    store.add_behavior(behavior, UnboundedReceiverStream::new(rx2), false).unwrap();
    assert_eq!(store.number_of_behavior_sources(behavior), 1);
}

#[tokio::test]
async fn p5_invalidate_forces_a_rerun_for_an_unchanged_input() {
    let store = Store::new();
    let effect_id = EffectId::<SearchInput, SearchResult>::named("p5_search");
    let input_id = BehaviorId::<SearchInput>::named("p5_input");
    let invalidate_id = EventId::<()>::named("p5_invalidate");

    let (tx, rx) = mpsc::unbounded_channel();
    store.add_behavior(input_id, UnboundedReceiverStream::new(rx), false).unwrap();

    let invocations = Arc::new(AtomicUsize::new(0));
    let invocations_for_effect = invocations.clone();
    store.add_effect(effect_id, move |input: SearchInput, _ctx| {
        invocations_for_effect.fetch_add(1, Ordering::SeqCst);
        async_stream::stream! {
            yield SearchResult { matches: vec![input.query.clone()], total: input.page };
        }
        .boxed()
    });

    let config = EffectSignalsConfig::new(effect_id, input_id).with_invalidate(invalidate_id);
    let signals = store.build_effect_signals(config);
    let mut combined = store.get_behavior(signals.combined);

    tx.send(SearchInput { query: "rust".into(), page: 0 }).unwrap();
    loop {
        let value = combined.next().await.unwrap();
        if !value.result_pending && value.result.is_some() {
            break;
        }
    }
    assert_eq!(invocations.load(Ordering::SeqCst), 1);

    // Same input, no new value on the input behavior: only `invalidate`
    // distinguishes this from a no-op.
    store.dispatch(invalidate_id, ()).await;

    loop {
        let value = combined.next().await.unwrap();
        if !value.result_pending && value.result.is_some() {
            break;
        }
    }
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn p6_a_new_input_cancels_the_in_flight_run() {
    let store = Store::new();
    let effect_id = EffectId::<i32, i32>::named("p6_effect");
    let input_id = BehaviorId::<i32>::named("p6_input");

    let (tx, rx) = mpsc::unbounded_channel();
    store.add_behavior(input_id, UnboundedReceiverStream::new(rx), false).unwrap();

    store.add_effect(effect_id, |input: i32, _ctx| {
        async_stream::stream! {
            if input == 1 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            yield input * 10;
        }
        .boxed()
    });

    let config = EffectSignalsConfig::new(effect_id, input_id);
    let signals = store.build_effect_signals(config);

    let _combined_keep_alive = store.get_behavior(signals.combined);
    let mut results = store.get_event_stream(signals.results);

    tx.send(1).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    tx.send(2).unwrap();

    let value_event = results.next().await.expect("the surviving run should publish its value");
    assert_eq!(value_event.input, 2);
    assert_eq!(value_event.value, Some(20));
    assert!(!value_event.completed);

    let completed_event = results.next().await.expect("the surviving run should report completion");
    assert_eq!(completed_event.input, 2);
    assert!(completed_event.completed);

    // Input 1's run was cancelled outright: nothing further ever arrives.
    let timed_out = tokio::time::timeout(Duration::from_millis(150), results.next()).await;
    assert!(timed_out.is_err(), "no event from the cancelled run for input 1 should ever arrive");
}

#[tokio::test]
async fn p7_lifecycle_handle_end_and_reset_govern_scoped_sources() {
    let store = Store::new();
    let scoped = BehaviorId::<i32>::named("p7_scoped");

    let handle = store
        .get_lifecycle_handle(move |scope| {
            scope.add_behavior(scoped, futures::stream::pending::<i32>(), false).unwrap();
        })
        .unwrap();
    assert_eq!(store.number_of_behavior_sources(scoped), 1);

    handle.end();
    assert_eq!(store.number_of_behavior_sources(scoped), 0);

    handle.reset();
    assert_eq!(store.number_of_behavior_sources(scoped), 1);
}
