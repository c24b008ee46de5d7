//! Minimal push-based observable with cancellable subscriptions.
//!
//! An [`Observable`] wraps a producer closure that runs synchronously on
//! every [`subscribe`](Observable::subscribe). The producer receives a
//! [`Subscriber`] to emit through and returns a [`Teardown`] that runs when
//! the subscription ends, whether by unsubscribe, error or completion.
//!
//! Guarantees enforced here rather than by producers:
//! - nothing is delivered after `error`, `complete` or `unsubscribe`;
//! - teardown runs at most once;
//! - an unsubscribe issued while the producer is still running is deferred
//!   until the producer returns its teardown, which then runs immediately.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::ClientError;

pub trait Observer<T, E>: Send + Sync {
    fn next(&self, value: T);
    fn error(&self, err: E);
    fn complete(&self);
}

type NextFn<T> = Box<dyn Fn(T) + Send + Sync>;
type ErrorFn<E> = Box<dyn Fn(E) + Send + Sync>;
type CompleteFn = Box<dyn Fn() + Send + Sync>;

/// Observer assembled from optional closures. Missing callbacks are ignored.
pub struct FnObserver<T, E> {
    next: Option<NextFn<T>>,
    error: Option<ErrorFn<E>>,
    complete: Option<CompleteFn>,
}

impl<T, E> FnObserver<T, E> {
    pub fn new() -> Self {
        FnObserver {
            next: None,
            error: None,
            complete: None,
        }
    }

    pub fn on_next(mut self, f: impl Fn(T) + Send + Sync + 'static) -> Self {
        self.next = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(E) + Send + Sync + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.complete = Some(Box::new(f));
        self
    }
}

impl<T, E> Default for FnObserver<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> fmt::Debug for FnObserver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnObserver")
            .field("next", &self.next.is_some())
            .field("error", &self.error.is_some())
            .field("complete", &self.complete.is_some())
            .finish()
    }
}

impl<T, E> Observer<T, E> for FnObserver<T, E> {
    fn next(&self, value: T) {
        if let Some(f) = &self.next {
            f(value);
        }
    }

    fn error(&self, err: E) {
        if let Some(f) = &self.error {
            f(err);
        }
    }

    fn complete(&self) {
        if let Some(f) = &self.complete {
            f();
        }
    }
}

/// Cleanup returned by a producer.
#[derive(Default)]
pub enum Teardown {
    #[default]
    Noop,
    Func(Box<dyn FnOnce() + Send>),
    Subscription(Subscription),
}

impl Teardown {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Teardown::Func(Box::new(f))
    }

    fn run(self) {
        match self {
            Teardown::Noop => {}
            Teardown::Func(f) => f(),
            Teardown::Subscription(subscription) => subscription.unsubscribe(),
        }
    }
}

impl From<Subscription> for Teardown {
    fn from(subscription: Subscription) -> Self {
        Teardown::Subscription(subscription)
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Teardown::Noop => write!(f, "Teardown::Noop"),
            Teardown::Func(_) => write!(f, "Teardown::Func"),
            Teardown::Subscription(sub) => {
                f.debug_tuple("Teardown::Subscription").field(sub).finish()
            }
        }
    }
}

enum TeardownSlot {
    /// Producer still running.
    Setup { unsubscribe_requested: bool },
    Armed(Teardown),
    Released,
}

struct SubscriptionState {
    done: AtomicBool,
    slot: Mutex<TeardownSlot>,
}

impl SubscriptionState {
    fn new() -> Self {
        SubscriptionState {
            done: AtomicBool::new(false),
            slot: Mutex::new(TeardownSlot::Setup {
                unsubscribe_requested: false,
            }),
        }
    }

    fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Returns true if this call moved the subscription into the terminal state.
    fn finish(&self) -> bool {
        !self.done.swap(true, Ordering::AcqRel)
    }

    fn release(&self) {
        let teardown = {
            let mut slot = self.slot.lock();
            match &mut *slot {
                TeardownSlot::Setup {
                    unsubscribe_requested,
                } => {
                    *unsubscribe_requested = true;
                    None
                }
                TeardownSlot::Armed(_) => {
                    match std::mem::replace(&mut *slot, TeardownSlot::Released) {
                        TeardownSlot::Armed(teardown) => Some(teardown),
                        _ => None,
                    }
                }
                TeardownSlot::Released => None,
            }
        };
        // Run outside the lock: teardown may unsubscribe other subscriptions.
        if let Some(teardown) = teardown {
            teardown.run();
        }
    }

    fn arm(&self, teardown: Teardown) {
        let mut slot = self.slot.lock();
        if matches!(
            *slot,
            TeardownSlot::Setup {
                unsubscribe_requested: false
            }
        ) {
            *slot = TeardownSlot::Armed(teardown);
            return;
        }
        *slot = TeardownSlot::Released;
        drop(slot);
        teardown.run();
    }
}

/// Handle returned by [`Observable::subscribe`].
#[derive(Clone)]
pub struct Subscription {
    state: Arc<SubscriptionState>,
}

impl Subscription {
    /// Stops delivery and runs teardown. Idempotent.
    pub fn unsubscribe(&self) {
        self.state.done.store(true, Ordering::Release);
        self.state.release();
    }

    /// True once the subscription was unsubscribed or reached a terminal event.
    pub fn closed(&self) -> bool {
        self.state.is_done()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.closed())
            .finish()
    }
}

/// Emission side of a subscription, handed to the producer.
pub struct Subscriber<T, E> {
    observer: Arc<dyn Observer<T, E>>,
    state: Arc<SubscriptionState>,
}

impl<T, E> Clone for Subscriber<T, E> {
    fn clone(&self) -> Self {
        Subscriber {
            observer: Arc::clone(&self.observer),
            state: Arc::clone(&self.state),
        }
    }
}

impl<T, E> Subscriber<T, E> {
    pub fn next(&self, value: T) {
        if self.state.is_done() {
            return;
        }
        self.observer.next(value);
    }

    pub fn error(&self, err: E) {
        if !self.state.finish() {
            return;
        }
        self.observer.error(err);
        self.state.release();
    }

    pub fn complete(&self) {
        if !self.state.finish() {
            return;
        }
        self.observer.complete();
        self.state.release();
    }

    pub fn closed(&self) -> bool {
        self.state.is_done()
    }
}

impl<T, E> fmt::Debug for Subscriber<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("closed", &self.closed())
            .finish()
    }
}

impl<T, E> Observer<T, E> for Subscriber<T, E> {
    fn next(&self, value: T) {
        Subscriber::next(self, value)
    }

    fn error(&self, err: E) {
        Subscriber::error(self, err)
    }

    fn complete(&self) {
        Subscriber::complete(self)
    }
}

type Producer<T, E> = dyn Fn(Subscriber<T, E>) -> Teardown + Send + Sync;

pub struct Observable<T, E> {
    producer: Arc<Producer<T, E>>,
}

impl<T, E> Clone for Observable<T, E> {
    fn clone(&self) -> Self {
        Observable {
            producer: Arc::clone(&self.producer),
        }
    }
}

impl<T, E> fmt::Debug for Observable<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Observable")
    }
}

impl<T: 'static, E: 'static> Observable<T, E> {
    pub fn new<F>(producer: F) -> Self
    where
        F: Fn(Subscriber<T, E>) -> Teardown + Send + Sync + 'static,
    {
        Observable {
            producer: Arc::new(producer),
        }
    }

    pub fn subscribe<O>(&self, observer: O) -> Subscription
    where
        O: Observer<T, E> + 'static,
    {
        self.subscribe_with(|_| observer)
    }

    /// Subscribes with an observer built from its own subscription handle.
    ///
    /// The handle exists before the producer runs, so the observer may
    /// unsubscribe from inside a synchronous emission.
    pub fn subscribe_with<O, F>(&self, make_observer: F) -> Subscription
    where
        O: Observer<T, E> + 'static,
        F: FnOnce(Subscription) -> O,
    {
        let state = Arc::new(SubscriptionState::new());
        let subscription = Subscription {
            state: Arc::clone(&state),
        };
        let subscriber = Subscriber {
            observer: Arc::new(make_observer(subscription.clone())),
            state: Arc::clone(&state),
        };
        let teardown = (self.producer)(subscriber);
        state.arm(teardown);
        subscription
    }

    /// Applies one operator. Chain calls or use [`pipe!`](crate::pipe) for several.
    pub fn pipe<R>(self, operator: impl FnOnce(Self) -> R) -> R {
        operator(self)
    }

    pub fn empty() -> Self {
        Observable::new(|subscriber: Subscriber<T, E>| {
            subscriber.complete();
            Teardown::Noop
        })
    }

    pub fn never() -> Self {
        Observable::new(|_| Teardown::Noop)
    }
}

impl<T, E> Observable<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: 'static,
{
    /// Emits one value, then completes.
    pub fn of(value: T) -> Self {
        Observable::new(move |subscriber: Subscriber<T, E>| {
            subscriber.next(value.clone());
            subscriber.complete();
            Teardown::Noop
        })
    }
}

impl<T, E> Observable<T, E>
where
    T: 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Fails every subscriber synchronously with `err`.
    pub fn failed(err: E) -> Self {
        Observable::new(move |subscriber: Subscriber<T, E>| {
            subscriber.error(err.clone());
            Teardown::Noop
        })
    }
}

impl<T: 'static> Observable<T, ClientError> {
    pub fn config_error(message: impl Into<String>) -> Self {
        Observable::failed(ClientError::config(message))
    }
}
