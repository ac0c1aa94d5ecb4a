//! Store-level scenarios: reducer folding, pre-initialization accumulation,
//! and dispatch ordering when a subscriber reacts by dispatching again.

use futures::StreamExt;
use signal_store::{EventId, StateId, Store};

#[tokio::test]
async fn s1_counter_reducers_fold_in_dispatch_order() {
    let store = Store::new();
    let counter = StateId::<i32>::named("counter");
    let inc = EventId::<i32>::named("inc");
    let dec = EventId::<i32>::named("dec");

    store.add_state(counter, 100).unwrap();
    store.add_reducer(counter, inc, |state, delta| state + delta).unwrap();
    store.add_reducer(counter, dec, |state, delta| state - delta).unwrap();

    let mut values = store.get_state(counter);
    assert_eq!(values.next().await, Some(100));

    store.dispatch(inc, 7).await;
    assert_eq!(values.next().await, Some(107));

    store.dispatch(dec, 5).await;
    assert_eq!(values.next().await, Some(102));

    store.dispatch(dec, 2).await;
    assert_eq!(values.next().await, Some(100));
}

#[tokio::test]
async fn s2_reducer_registered_before_state_accumulates_without_producing() {
    let store = Store::new();
    let counter = StateId::<i32>::named("counter");
    let dec = EventId::<i32>::named("dec");

    // Bind the reducer before the state has an initial value at all.
    store.add_reducer(counter, dec, |state, delta| state - delta).unwrap();

    // Dispatched before `add_state`: accumulated by the reducer binding,
    // but there is nothing to reduce over yet, so no value is produced.
    store.dispatch(dec, 5).await;

    store.add_state(counter, 100).unwrap();

    let mut values = store.get_state(counter);
    assert_eq!(values.next().await, Some(100));

    store.dispatch(dec, 9).await;
    assert_eq!(values.next().await, Some(91));
}

#[tokio::test]
async fn s7_a_reactive_dispatch_lands_after_the_dispatch_that_provoked_it() {
    let store = Store::new();
    let counter = StateId::<i32>::named("counter");
    let plus = EventId::<i32>::named("plus");
    let mult = EventId::<i32>::named("mult");

    store.add_state(counter, 0).unwrap();
    store.add_reducer(counter, plus, |state, delta| state + delta).unwrap();
    store.add_reducer(counter, mult, |state, factor| state * factor).unwrap();

    let mut collected = store.get_state(counter);
    assert_eq!(collected.next().await, Some(0));

    // A watcher reacts to the counter reaching 9 by dispatching its own
    // event; this is what exercises re-entrant dispatch ordering.
    let mut watcher_feed = store.get_state(counter);
    let watcher_store = store.clone();
    tokio::spawn(async move {
        while let Some(value) = watcher_feed.next().await {
            if value == 9 {
                watcher_store.dispatch(plus, 1).await;
            }
        }
    });

    store.dispatch(plus, 3).await;
    assert_eq!(collected.next().await, Some(3));

    store.dispatch(mult, 3).await;
    assert_eq!(collected.next().await, Some(9));

    // Give the watcher task a chance to observe 9 and enqueue its own
    // dispatch before we enqueue the next one ourselves.
    tokio::task::yield_now().await;

    assert_eq!(collected.next().await, Some(10));

    store.dispatch(mult, 2).await;
    assert_eq!(collected.next().await, Some(20));
}
