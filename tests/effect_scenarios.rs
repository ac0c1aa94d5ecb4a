//! Effect orchestrator scenarios: a plain delayed run, debounce collapsing
//! rapid inputs, trigger-gated runs, and panic-to-error recovery.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use signal_store::effect::{EffectOutcome, EffectSignalsConfig};
use signal_store::{BehaviorId, EffectId, EventId, Store};

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
async fn s3_a_delayed_effect_eventually_publishes_a_success_result() {
    let store = Store::new();
    let effect_id = EffectId::<SearchInput, SearchResult>::named("s3_search");
    let input_id = BehaviorId::<SearchInput>::named("s3_input");

    let (tx, rx) = mpsc::unbounded_channel();
    store.add_behavior(input_id, UnboundedReceiverStream::new(rx), false).unwrap();

    store.add_effect(effect_id, |input: SearchInput, _ctx| {
        async_stream::stream! {
            tokio::time::sleep(Duration::from_millis(30)).await;
            yield SearchResult {
                matches: vec![format!("{}-1", input.query)],
                total: 1,
            };
        }
        .boxed()
    });

    let config = EffectSignalsConfig::new(effect_id, input_id);
    let signals = store.build_effect_signals(config);
    let mut combined = store.get_behavior(signals.combined);

    tx.send(SearchInput { query: "rust".into(), page: 1 }).unwrap();

    loop {
        let value = combined.next().await.expect("combined never completes mid-test");
        if !value.result_pending && value.current_input.is_some() {
            assert!(matches!(value.result, Some(EffectOutcome::Success(_))));
            break;
        }
    }
}

#[tokio::test]
async fn s4_debounced_effect_runs_once_for_the_latest_input() {
    let store = Store::new();
    let effect_id = EffectId::<SearchInput, SearchResult>::named("s4_search");
    let input_id = BehaviorId::<SearchInput>::named("s4_input");

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

    let config = EffectSignalsConfig::new(effect_id, input_id).effect_debounce_time(Duration::from_millis(50));
    let signals = store.build_effect_signals(config);

    // Holding the subscription open is what keeps the lazy orchestrator
    // running; we don't need to actually read from it.
    let _combined_keep_alive = store.get_behavior(signals.combined);
    let mut completed = store.get_event_stream(signals.completed_results);

    for page in 0..3 {
        tx.send(SearchInput { query: "rust".into(), page }).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let completed_event = completed.next().await.expect("one completed result expected");
    assert_eq!(completed_event.input.page, 2);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn s5_trigger_mode_gates_runs_until_the_trigger_fires() {
    let store = Store::new();
    let effect_id = EffectId::<SearchInput, SearchResult>::named("s5_search");
    let input_id = BehaviorId::<SearchInput>::named("s5_input");
    let trigger_id = EventId::<()>::named("s5_trigger");

    let (tx, rx) = mpsc::unbounded_channel();
    store.add_behavior(input_id, UnboundedReceiverStream::new(rx), false).unwrap();

    store.add_effect(effect_id, |input: SearchInput, _ctx| {
        async_stream::stream! {
            yield SearchResult { matches: vec![input.query.clone()], total: input.page };
        }
        .boxed()
    });

    let config = EffectSignalsConfig::new(effect_id, input_id).with_trigger(trigger_id);
    let signals = store.build_effect_signals(config);
    let mut combined = store.get_behavior(signals.combined);

    let initial = combined.next().await.unwrap();
    assert!(!initial.result_pending);

    for page in 0..3 {
        tx.send(SearchInput { query: "rust".into(), page }).unwrap();
        let value = combined.next().await.unwrap();
        assert!(!value.result_pending, "no run should start before the trigger fires");
    }

    store.dispatch(trigger_id, ()).await;

    loop {
        let value = combined.next().await.unwrap();
        if !value.result_pending && value.result.is_some() {
            assert_eq!(value.result_input.as_ref().map(|input| input.page), Some(2));
            break;
        }
    }
}

#[tokio::test]
async fn s6_a_panicking_effect_reports_an_error_then_recovers_on_the_next_input() {
    let store = Store::new();
    let effect_id = EffectId::<SearchInput, SearchResult>::named("s6_search");
    let input_id = BehaviorId::<SearchInput>::named("s6_input");

    let (tx, rx) = mpsc::unbounded_channel();
    store.add_behavior(input_id, UnboundedReceiverStream::new(rx), false).unwrap();

    store.add_effect(effect_id, |input: SearchInput, _ctx| {
        async_stream::stream! {
            if input.query == "throw" {
                panic!("boom");
            }
            yield SearchResult { matches: vec![input.query.clone()], total: input.page };
        }
        .boxed()
    });

    let config = EffectSignalsConfig::new(effect_id, input_id);
    let signals = store.build_effect_signals(config);

    let mut combined = store.get_behavior(signals.combined);
    let mut errors = store.get_event_stream(signals.errors);

    tx.send(SearchInput { query: "throw".into(), page: 0 }).unwrap();

    let error_event = errors.next().await.expect("the panic should surface as an effect error");
    assert_eq!(error_event.error_input.query, "throw");

    loop {
        let value = combined.next().await.unwrap();
        if !value.result_pending && matches!(value.result, Some(EffectOutcome::Error(_))) {
            break;
        }
    }

    tx.send(SearchInput { query: "ok".into(), page: 1 }).unwrap();

    loop {
        let value = combined.next().await.unwrap();
        if !value.result_pending && matches!(value.result, Some(EffectOutcome::Success(_))) {
            assert_eq!(value.result_input.as_ref().map(|input| input.page), Some(1));
            break;
        }
    }
}
