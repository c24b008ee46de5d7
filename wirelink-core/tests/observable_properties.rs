// Observable property tests
// Terminal idempotence and share() reference counting under arbitrary event orders

use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use wirelink_core::{share, FnObserver, Observable, Subscriber, Subscription, Teardown};

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Next(i32),
    Error(String),
    Complete,
}

fn event_strategy() -> impl Strategy<Value = Event> {
    prop_oneof![
        6 => any::<i32>().prop_map(Event::Next),
        1 => "[a-z]{1,6}".prop_map(Event::Error),
        1 => Just(Event::Complete),
    ]
}

/// What a well-behaved observer must see: everything up to and including the first terminal.
fn expected(events: &[Event]) -> Vec<Event> {
    let mut seen = Vec::new();
    for event in events {
        seen.push(event.clone());
        if !matches!(event, Event::Next(_)) {
            break;
        }
    }
    seen
}

fn recording_observer(log: &Arc<Mutex<Vec<Event>>>) -> FnObserver<i32, String> {
    let (a, b, c) = (log.clone(), log.clone(), log.clone());
    FnObserver::new()
        .on_next(move |v| a.lock().push(Event::Next(v)))
        .on_error(move |e| b.lock().push(Event::Error(e)))
        .on_complete(move || c.lock().push(Event::Complete))
}

proptest! {
    #[test]
    fn prop_nothing_is_delivered_after_a_terminal(
        events in prop::collection::vec(event_strategy(), 0..32)
    ) {
        let script = events.clone();
        let teardowns = Arc::new(AtomicUsize::new(0));
        let counter = teardowns.clone();
        let obs: Observable<i32, String> = Observable::new(move |sub: Subscriber<i32, String>| {
            for event in &script {
                match event {
                    Event::Next(v) => sub.next(*v),
                    Event::Error(e) => sub.error(e.clone()),
                    Event::Complete => sub.complete(),
                }
            }
            let counter = counter.clone();
            Teardown::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        });

        let log = Arc::new(Mutex::new(Vec::new()));
        let subscription = obs.subscribe(recording_observer(&log));
        subscription.unsubscribe();

        prop_assert_eq!(log.lock().clone(), expected(&events));
        prop_assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn prop_share_keeps_one_upstream_until_the_last_unsubscribe(
        subscribers in 1usize..8,
        order in prop::collection::vec(any::<prop::sample::Index>(), 8),
    ) {
        let subscribes = Arc::new(AtomicUsize::new(0));
        let teardowns = Arc::new(AtomicUsize::new(0));
        let (s, t) = (subscribes.clone(), teardowns.clone());
        let source: Observable<i32, String> = Observable::new(move |_sub: Subscriber<i32, String>| {
            s.fetch_add(1, Ordering::SeqCst);
            let t = t.clone();
            Teardown::new(move || {
                t.fetch_add(1, Ordering::SeqCst);
            })
        });
        let shared = source.pipe(share());

        let mut live: Vec<Subscription> = (0..subscribers)
            .map(|_| shared.subscribe(FnObserver::new()))
            .collect();
        prop_assert_eq!(subscribes.load(Ordering::SeqCst), 1);

        let mut picks = order.into_iter();
        while live.len() > 1 {
            let idx = picks.next().map(|i| i.index(live.len())).unwrap_or(0);
            live.remove(idx).unsubscribe();
            prop_assert_eq!(teardowns.load(Ordering::SeqCst), 0);
        }

        live.remove(0).unsubscribe();
        prop_assert_eq!(teardowns.load(Ordering::SeqCst), 1);
        prop_assert_eq!(subscribes.load(Ordering::SeqCst), 1);
    }
}
