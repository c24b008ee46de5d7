//! Bridge from an [`Observable`] to a single awaited value.

use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

use crate::error::ClientError;
use crate::observable::{Observable, Observer, Subscription};

/// Raised when a promisified observable is aborted, or completes without a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("This operation was aborted")]
pub struct ObservableAbortError;

impl From<ObservableAbortError> for ClientError {
    fn from(_: ObservableAbortError) -> Self {
        ClientError::Aborted
    }
}

type Slot<T, E> = Arc<Mutex<Option<oneshot::Sender<Result<T, E>>>>>;

fn settle<T, E>(slot: &Slot<T, E>, outcome: Result<T, E>) -> bool {
    match slot.lock().take() {
        Some(tx) => {
            let _ = tx.send(outcome);
            true
        }
        None => false,
    }
}

struct PromiseObserver<T, E> {
    slot: Slot<T, E>,
    subscription: Subscription,
}

impl<T, E> Observer<T, E> for PromiseObserver<T, E>
where
    T: Send,
    E: From<ObservableAbortError> + Send,
{
    fn next(&self, value: T) {
        if settle(&self.slot, Ok(value)) {
            self.subscription.unsubscribe();
        }
    }

    fn error(&self, err: E) {
        settle(&self.slot, Err(err));
    }

    fn complete(&self) {
        settle(&self.slot, Err(ObservableAbortError.into()));
    }
}

/// Cancels a pending [`ObservablePromise`] from anywhere.
#[derive(Clone)]
pub struct AbortHandle {
    abort: Arc<dyn Fn() + Send + Sync>,
}

impl AbortHandle {
    pub fn abort(&self) {
        (self.abort)()
    }
}

impl fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AbortHandle")
    }
}

/// Future resolved by the first value of an observable.
///
/// Exactly one of resolve or reject happens. Dropping the future aborts it.
pub struct ObservablePromise<T, E> {
    receiver: oneshot::Receiver<Result<T, E>>,
    abort: AbortHandle,
}

impl<T, E> ObservablePromise<T, E> {
    pub fn abort(&self) {
        self.abort.abort();
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }
}

impl<T, E> fmt::Debug for ObservablePromise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservablePromise").finish_non_exhaustive()
    }
}

impl<T, E> Future for ObservablePromise<T, E>
where
    E: From<ObservableAbortError>,
{
    type Output = Result<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ObservableAbortError.into())),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T, E> Drop for ObservablePromise<T, E> {
    fn drop(&mut self) {
        self.abort.abort();
    }
}

/// Subscribes to `observable` and exposes its first value as a future.
///
/// `next` resolves, `error` rejects, `complete` without a value rejects with
/// [`ObservableAbortError`], and [`ObservablePromise::abort`] rejects with the
/// same error and tears the subscription down.
pub fn promisify_observable<T, E>(observable: &Observable<T, E>) -> ObservablePromise<T, E>
where
    T: Send + 'static,
    E: From<ObservableAbortError> + Send + 'static,
{
    let (tx, receiver) = oneshot::channel();
    let slot: Slot<T, E> = Arc::new(Mutex::new(Some(tx)));

    let observer_slot = Arc::clone(&slot);
    let subscription = observable.subscribe_with(move |subscription| PromiseObserver {
        slot: observer_slot,
        subscription,
    });

    let abort = AbortHandle {
        abort: Arc::new(move || {
            settle(&slot, Err(ObservableAbortError.into()));
            subscription.unsubscribe();
        }),
    };

    ObservablePromise { receiver, abort }
}
