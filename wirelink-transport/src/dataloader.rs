//! Group-forming scheduler for independently issued loads.
//!
//! Every [`DataLoader::load`] call made before the scheduled dispatch runs
//! lands in the same dispatch. The dispatch task waits until the pending
//! queue stops growing, so a burst issued from one task is not split even
//! when the dispatch task runs on another worker thread. The dispatch splits the pending items, in
//! arrival order, into the fewest groups the [`BatchLoader`] accepts and
//! issues one fetch per group. Each caller only ever sees its own result.
//!
//! Cancellation bookkeeping: cancelling a load rejects it at once with
//! [`BatchError::Aborted`]. A dispatched batch is cancelled, and its
//! in-flight fetch dropped, only once *every* item in it was cancelled.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use wirelink_core::BatchError;

type Settled<V, E> = Result<V, E>;

/// Delivers a value for one position of a batch before the whole fetch resolves.
pub struct UnitResolver<V> {
    resolve: Arc<dyn Fn(usize, V) + Send + Sync>,
}

impl<V> Clone for UnitResolver<V> {
    fn clone(&self) -> Self {
        UnitResolver {
            resolve: Arc::clone(&self.resolve),
        }
    }
}

impl<V> UnitResolver<V> {
    pub fn resolve(&self, index: usize, value: V) {
        (self.resolve)(index, value)
    }
}

impl<V> fmt::Debug for UnitResolver<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UnitResolver")
    }
}

/// One in-flight fetch for a group of keys.
pub struct BatchFetch<V, E> {
    /// Resolves to values positionally aligned with the keys.
    pub future: BoxFuture<'static, Result<Vec<Option<V>>, E>>,
    /// Invoked when every item of the batch has been cancelled.
    pub on_cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl<V, E> BatchFetch<V, E> {
    pub fn new(future: impl Future<Output = Result<Vec<Option<V>>, E>> + Send + 'static) -> Self {
        BatchFetch {
            future: Box::pin(future),
            on_cancel: None,
        }
    }

    pub fn on_cancel(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_cancel = Some(Box::new(f));
        self
    }
}

impl<V, E> fmt::Debug for BatchFetch<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchFetch")
            .field("on_cancel", &self.on_cancel.is_some())
            .finish_non_exhaustive()
    }
}

pub trait BatchLoader: Send + Sync + 'static {
    type Key: Clone + Send + Sync + 'static;
    type Value: Send + 'static;
    type Error: From<BatchError> + Clone + Send + 'static;

    /// Whether `keys` may be fetched together.
    fn validate(&self, _keys: &[Self::Key]) -> bool {
        true
    }

    fn fetch(
        &self,
        keys: Vec<Self::Key>,
        resolver: UnitResolver<Self::Value>,
    ) -> BatchFetch<Self::Value, Self::Error>;
}

struct BatchItem<K, V, E> {
    key: K,
    sender: Mutex<Option<oneshot::Sender<Settled<V, E>>>>,
    aborted: AtomicBool,
    batch: Mutex<Option<Arc<Batch<K, V, E>>>>,
}

impl<K, V, E> BatchItem<K, V, E> {
    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Delivers the outcome and detaches the item from its batch. No-op once settled.
    fn settle(&self, outcome: Settled<V, E>) -> bool {
        let sender = self.sender.lock().take();
        match sender {
            Some(tx) => {
                self.batch.lock().take();
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }
}

impl<K, V, E: From<BatchError>> BatchItem<K, V, E> {
    fn cancel(&self) {
        if self.aborted.swap(true, Ordering::AcqRel) {
            return;
        }
        let batch = self.batch.lock().clone();
        self.settle(Err(BatchError::Aborted.into()));
        if let Some(batch) = batch {
            if batch.items.iter().all(|item| item.is_aborted()) {
                batch.cancel();
            }
        }
    }
}

struct Batch<K, V, E> {
    items: Vec<Arc<BatchItem<K, V, E>>>,
    token: CancellationToken,
    on_cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    cancelled: AtomicBool,
}

impl<K, V, E> Batch<K, V, E> {
    /// Stores the fetch's cancel hook, or runs it at once if the batch is already cancelled.
    fn set_on_cancel(&self, on_cancel: Option<Box<dyn FnOnce() + Send>>) {
        let Some(f) = on_cancel else {
            return;
        };
        let mut slot = self.on_cancel.lock();
        if self.cancelled.load(Ordering::Acquire) {
            drop(slot);
            f();
        } else {
            *slot = Some(f);
        }
    }

    /// Drops every item's reference back to this batch.
    fn release(&self) {
        for item in &self.items {
            item.batch.lock().take();
        }
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(batch_size = self.items.len(), "every item aborted, cancelling batch");
        self.release();
        self.token.cancel();
        let on_cancel = self.on_cancel.lock().take();
        if let Some(f) = on_cancel {
            f();
        }
    }
}

/// Cancels one load. Clonable so it can live in a teardown closure.
#[derive(Clone)]
pub struct LoadCanceller {
    cancel: Arc<dyn Fn() + Send + Sync>,
}

impl LoadCanceller {
    pub fn cancel(&self) {
        (self.cancel)()
    }
}

impl fmt::Debug for LoadCanceller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LoadCanceller")
    }
}

/// Pending result of one [`DataLoader::load`]. Dropping it cancels the load.
pub struct LoadHandle<V, E> {
    receiver: oneshot::Receiver<Settled<V, E>>,
    canceller: LoadCanceller,
}

impl<V, E> LoadHandle<V, E> {
    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    pub fn canceller(&self) -> LoadCanceller {
        self.canceller.clone()
    }
}

impl<V, E> fmt::Debug for LoadHandle<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadHandle").finish_non_exhaustive()
    }
}

impl<V, E: From<BatchError>> Future for LoadHandle<V, E> {
    type Output = Result<V, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // The loader went away before dispatching.
            Poll::Ready(Err(_)) => Poll::Ready(Err(BatchError::Aborted.into())),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<V, E> Drop for LoadHandle<V, E> {
    fn drop(&mut self) {
        self.canceller.cancel();
    }
}

type Item<L> = BatchItem<
    <L as BatchLoader>::Key,
    <L as BatchLoader>::Value,
    <L as BatchLoader>::Error,
>;

struct PendingQueue<L: BatchLoader> {
    items: Vec<Arc<Item<L>>>,
    scheduled: bool,
    /// Bumped by every `load`.
    generation: u64,
}

/// Consecutive scheduler turns without a new load before the queue counts as settled.
const QUIET_TURNS: usize = 2;
/// Upper bound on settling turns, so a steady stream of loads still dispatches.
const MAX_SETTLE_TURNS: usize = 4096;

struct LoaderInner<L: BatchLoader> {
    loader: L,
    window: Duration,
    pending: Mutex<PendingQueue<L>>,
}

pub struct DataLoader<L: BatchLoader> {
    inner: Arc<LoaderInner<L>>,
}

impl<L: BatchLoader> Clone for DataLoader<L> {
    fn clone(&self) -> Self {
        DataLoader {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: BatchLoader> fmt::Debug for DataLoader<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataLoader")
            .field("window", &self.inner.window)
            .field("pending", &self.pending_len())
            .finish()
    }
}

impl<L: BatchLoader> DataLoader<L> {
    /// Dispatches on the next scheduler tick.
    pub fn new(loader: L) -> Self {
        Self::with_window(loader, Duration::ZERO)
    }

    /// Waits `window` after the first pending load before dispatching.
    pub fn with_window(loader: L, window: Duration) -> Self {
        DataLoader {
            inner: Arc::new(LoaderInner {
                loader,
                window,
                pending: Mutex::new(PendingQueue {
                    items: Vec::new(),
                    scheduled: false,
                    generation: 0,
                }),
            }),
        }
    }

    pub fn loader(&self) -> &L {
        &self.inner.loader
    }

    pub fn pending_len(&self) -> usize {
        self.inner.pending.lock().items.len()
    }

    /// Queues `key` for the next dispatch. Must be called within a tokio runtime.
    pub fn load(&self, key: L::Key) -> LoadHandle<L::Value, L::Error> {
        let (tx, receiver) = oneshot::channel();
        let item = Arc::new(BatchItem {
            key,
            sender: Mutex::new(Some(tx)),
            aborted: AtomicBool::new(false),
            batch: Mutex::new(None),
        });

        let schedule = {
            let mut pending = self.inner.pending.lock();
            pending.items.push(Arc::clone(&item));
            pending.generation = pending.generation.wrapping_add(1);
            !std::mem::replace(&mut pending.scheduled, true)
        };
        if schedule {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                if !inner.window.is_zero() {
                    tokio::time::sleep(inner.window).await;
                }
                inner.wait_until_quiet().await;
                inner.dispatch();
            });
        }

        let weak: Weak<Item<L>> = Arc::downgrade(&item);
        LoadHandle {
            receiver,
            canceller: LoadCanceller {
                cancel: Arc::new(move || {
                    if let Some(item) = weak.upgrade() {
                        item.cancel();
                    }
                }),
            },
        }
    }
}

impl<L: BatchLoader> LoaderInner<L> {
    /// Yields until no load was queued for `QUIET_TURNS` consecutive turns.
    async fn wait_until_quiet(&self) {
        let mut seen = self.pending.lock().generation;
        let mut quiet = 0;
        for _ in 0..MAX_SETTLE_TURNS {
            tokio::task::yield_now().await;
            let generation = self.pending.lock().generation;
            if generation == seen {
                quiet += 1;
                if quiet == QUIET_TURNS {
                    return;
                }
            } else {
                seen = generation;
                quiet = 0;
            }
        }
        trace!("pending queue kept growing, dispatching anyway");
    }

    fn dispatch(&self) {
        let items = {
            let mut pending = self.pending.lock();
            pending.scheduled = false;
            std::mem::take(&mut pending.items)
        };
        trace!(pending = items.len(), "dispatching pending loads");

        for (group, keys) in self.group_items(items) {
            if !group.is_empty() {
                self.start_batch(group, keys);
            }
        }
    }

    /// Greedy, order-preserving split of `items` into groups that pass `validate`.
    fn group_items(&self, items: Vec<Arc<Item<L>>>) -> Vec<(Vec<Arc<Item<L>>>, Vec<L::Key>)> {
        let mut groups: Vec<(Vec<Arc<Item<L>>>, Vec<L::Key>)> = vec![(Vec::new(), Vec::new())];
        let mut items = items.into_iter().peekable();

        while let Some(item) = items.peek() {
            if item.is_aborted() {
                item.settle(Err(BatchError::Aborted.into()));
                items.next();
                continue;
            }

            let (group, keys) = match groups.last_mut() {
                Some(last) => last,
                None => break,
            };
            keys.push(item.key.clone());
            if self.loader.validate(keys) {
                if let Some(item) = items.next() {
                    group.push(item);
                }
                continue;
            }
            keys.pop();

            if group.is_empty() {
                warn!("load rejected: it does not fit in a batch on its own");
                item.settle(Err(BatchError::Invalid.into()));
                items.next();
                continue;
            }
            // Retry the same item against a fresh group.
            groups.push((Vec::new(), Vec::new()));
        }

        groups
    }

    fn start_batch(&self, group: Vec<Arc<Item<L>>>, keys: Vec<L::Key>) {
        let batch = Arc::new(Batch {
            items: group,
            token: CancellationToken::new(),
            on_cancel: Mutex::new(None),
            cancelled: AtomicBool::new(false),
        });
        for item in &batch.items {
            *item.batch.lock() = Some(Arc::clone(&batch));
        }
        // A cancel that raced with grouping found no batch to cancel; check on its behalf.
        if batch.items.iter().all(|item| item.is_aborted()) {
            batch.cancel();
            return;
        }

        let weak = Arc::downgrade(&batch);
        let resolver = UnitResolver {
            resolve: Arc::new(move |index: usize, value: L::Value| {
                if let Some(item) = weak.upgrade().and_then(|b| b.items.get(index).cloned()) {
                    item.settle(Ok(value));
                }
            }),
        };

        debug!(batch_size = keys.len(), "fetching batch");
        let fetch = self.loader.fetch(keys, resolver);
        batch.set_on_cancel(fetch.on_cancel);
        let future = fetch.future;

        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = batch.token.cancelled() => None,
                outcome = future => Some(outcome),
            };

            match outcome {
                None => {
                    for item in &batch.items {
                        item.settle(Err(BatchError::Aborted.into()));
                    }
                }
                Some(Ok(values)) => {
                    let mut values = values.into_iter();
                    for item in &batch.items {
                        match values.next().flatten() {
                            Some(value) => item.settle(Ok(value)),
                            None => item.settle(Err(BatchError::MissingResult.into())),
                        };
                    }
                }
                Some(Err(err)) => {
                    for item in &batch.items {
                        item.settle(Err(err.clone()));
                    }
                }
            }
            batch.release();
        });
    }
}
