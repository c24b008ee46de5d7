//! Stream transformers applied with [`Observable::pipe`].

use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};

use crate::observable::{Observable, Observer, Subscriber, Subscription, Teardown};

struct MapObserver<T, U, E> {
    downstream: Subscriber<U, E>,
    project: Arc<dyn Fn(T) -> U + Send + Sync>,
}

impl<T, U, E> Observer<T, E> for MapObserver<T, U, E> {
    fn next(&self, value: T) {
        self.downstream.next((self.project)(value));
    }

    fn error(&self, err: E) {
        self.downstream.error(err);
    }

    fn complete(&self) {
        self.downstream.complete();
    }
}

/// Transforms every value with `project`. Errors and completion pass through.
pub fn map<T, U, E, F>(project: F) -> impl FnOnce(Observable<T, E>) -> Observable<U, E>
where
    T: 'static,
    U: 'static,
    E: 'static,
    F: Fn(T) -> U + Send + Sync + 'static,
{
    let project: Arc<dyn Fn(T) -> U + Send + Sync> = Arc::new(project);
    move |source: Observable<T, E>| {
        Observable::new(move |downstream: Subscriber<U, E>| {
            source
                .subscribe(MapObserver {
                    downstream,
                    project: Arc::clone(&project),
                })
                .into()
        })
    }
}

type TapNext<T> = Arc<dyn Fn(&T) + Send + Sync>;
type TapError<E> = Arc<dyn Fn(&E) + Send + Sync>;
type TapComplete = Arc<dyn Fn() + Send + Sync>;

/// Side-effect callbacks for [`tap`]. They observe values by reference.
pub struct Tap<T, E> {
    next: Option<TapNext<T>>,
    error: Option<TapError<E>>,
    complete: Option<TapComplete>,
}

impl<T, E> Clone for Tap<T, E> {
    fn clone(&self) -> Self {
        Tap {
            next: self.next.clone(),
            error: self.error.clone(),
            complete: self.complete.clone(),
        }
    }
}

impl<T, E> Tap<T, E> {
    pub fn new() -> Self {
        Tap {
            next: None,
            error: None,
            complete: None,
        }
    }

    pub fn on_next(mut self, f: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.next = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&E) + Send + Sync + 'static) -> Self {
        self.error = Some(Arc::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.complete = Some(Arc::new(f));
        self
    }
}

impl<T, E> Default for Tap<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> fmt::Debug for Tap<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tap")
            .field("next", &self.next.is_some())
            .field("error", &self.error.is_some())
            .field("complete", &self.complete.is_some())
            .finish()
    }
}

struct TapObserver<T, E> {
    downstream: Subscriber<T, E>,
    tap: Tap<T, E>,
}

impl<T, E> Observer<T, E> for TapObserver<T, E> {
    fn next(&self, value: T) {
        if let Some(f) = &self.tap.next {
            f(&value);
        }
        self.downstream.next(value);
    }

    fn error(&self, err: E) {
        if let Some(f) = &self.tap.error {
            f(&err);
        }
        self.downstream.error(err);
    }

    fn complete(&self) {
        if let Some(f) = &self.tap.complete {
            f();
        }
        self.downstream.complete();
    }
}

/// Runs side effects for every event without altering the stream.
pub fn tap<T, E>(tap: Tap<T, E>) -> impl FnOnce(Observable<T, E>) -> Observable<T, E>
where
    T: 'static,
    E: 'static,
{
    move |source: Observable<T, E>| {
        Observable::new(move |downstream: Subscriber<T, E>| {
            source
                .subscribe(TapObserver {
                    downstream,
                    tap: tap.clone(),
                })
                .into()
        })
    }
}

enum Upstream {
    Idle,
    Starting,
    Active(Subscription),
}

struct ShareState<T, E> {
    subscribers: Vec<(u64, Subscriber<T, E>)>,
    next_key: u64,
    generation: u64,
    upstream: Upstream,
}

struct Shared<T, E> {
    source: Observable<T, E>,
    state: Mutex<ShareState<T, E>>,
}

impl<T, E> Shared<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn attach(self: &Arc<Self>, subscriber: Subscriber<T, E>) -> Teardown {
        let (key, start) = {
            let mut state = self.state.lock();
            let key = state.next_key;
            state.next_key += 1;
            state.subscribers.push((key, subscriber));
            let start = if matches!(state.upstream, Upstream::Idle) {
                state.upstream = Upstream::Starting;
                state.generation += 1;
                Some(state.generation)
            } else {
                None
            };
            (key, start)
        };

        if let Some(generation) = start {
            // Subscribing may emit synchronously, so the lock is not held here.
            let upstream = self.source.subscribe(ShareRelay {
                shared: Arc::downgrade(self),
                generation,
            });

            let mut state = self.state.lock();
            let still_starting =
                state.generation == generation && matches!(state.upstream, Upstream::Starting);
            if still_starting && !state.subscribers.is_empty() {
                state.upstream = Upstream::Active(upstream);
            } else {
                if still_starting {
                    state.upstream = Upstream::Idle;
                }
                drop(state);
                upstream.unsubscribe();
            }
        }

        let shared = Arc::downgrade(self);
        Teardown::new(move || {
            if let Some(shared) = shared.upgrade() {
                shared.detach(key);
            }
        })
    }

    fn detach(&self, key: u64) {
        let released = {
            let mut state = self.state.lock();
            state.subscribers.retain(|(k, _)| *k != key);
            if state.subscribers.is_empty() {
                match std::mem::replace(&mut state.upstream, Upstream::Idle) {
                    Upstream::Active(subscription) => Some(subscription),
                    // The starting subscriber notices the empty list once setup returns.
                    Upstream::Starting => {
                        state.upstream = Upstream::Starting;
                        None
                    }
                    Upstream::Idle => None,
                }
            } else {
                None
            }
        };
        if let Some(subscription) = released {
            subscription.unsubscribe();
        }
    }

    fn snapshot(&self, generation: u64) -> Vec<Subscriber<T, E>> {
        let state = self.state.lock();
        if state.generation != generation {
            return Vec::new();
        }
        state.subscribers.iter().map(|(_, s)| s.clone()).collect()
    }

    /// Detaches everyone; a later subscriber restarts the upstream.
    fn drain(&self, generation: u64) -> Vec<Subscriber<T, E>> {
        let mut state = self.state.lock();
        if state.generation != generation {
            return Vec::new();
        }
        state.upstream = Upstream::Idle;
        std::mem::take(&mut state.subscribers)
            .into_iter()
            .map(|(_, s)| s)
            .collect()
    }
}

struct ShareRelay<T, E> {
    shared: Weak<Shared<T, E>>,
    generation: u64,
}

impl<T, E> Observer<T, E> for ShareRelay<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn next(&self, value: T) {
        if let Some(shared) = self.shared.upgrade() {
            for subscriber in shared.snapshot(self.generation) {
                subscriber.next(value.clone());
            }
        }
    }

    fn error(&self, err: E) {
        if let Some(shared) = self.shared.upgrade() {
            for subscriber in shared.drain(self.generation) {
                subscriber.error(err.clone());
            }
        }
    }

    fn complete(&self) {
        if let Some(shared) = self.shared.upgrade() {
            for subscriber in shared.drain(self.generation) {
                subscriber.complete();
            }
        }
    }
}

/// Multicasts one upstream subscription to every downstream subscriber.
///
/// The upstream is subscribed when the first subscriber arrives and torn
/// down when the last one leaves; the next subscriber after that starts a
/// fresh upstream subscription.
pub fn share<T, E>() -> impl FnOnce(Observable<T, E>) -> Observable<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    |source: Observable<T, E>| {
        let shared = Arc::new(Shared {
            source,
            state: Mutex::new(ShareState {
                subscribers: Vec::new(),
                next_key: 0,
                generation: 0,
                upstream: Upstream::Idle,
            }),
        });
        Observable::new(move |subscriber: Subscriber<T, E>| shared.attach(subscriber))
    }
}
