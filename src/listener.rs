use crate::error::Cause;
use crate::executor::{Executor, Job};
use crate::DeferredValue;
use defer_heavy::defer_guard;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Uniform callback contract consumed by the [`ListenerQueue`].
/// The queue calls `on_complete` exactly once, after the value completed.
pub(crate) trait Listener<T: Send + Sync + 'static>: Send + Sync {
    fn on_complete(self: Arc<Self>, source: DeferredValue<T>);
}

pub(crate) type ListenerEntry<T> = Arc<dyn Listener<T>>;

/// Listeners that can empty their callback slot before it runs.
pub(crate) trait Retractable: Send + Sync {
    /// Returns true if the callback was still present and will now never run.
    fn retract(&self) -> bool;
}

fn same_entry<T: Send + Sync + 'static>(a: &ListenerEntry<T>, b: &ListenerEntry<T>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

struct QueueState<T: Send + Sync + 'static> {
    entries: VecDeque<ListenerEntry<T>>,
    flushing: bool,
}

/// FIFO of pending listeners belonging to one deferred value.
pub(crate) struct ListenerQueue<T: Send + Sync + 'static> {
    state: Mutex<QueueState<T>>,
}

impl<T: Send + Sync + 'static> Debug for ListenerQueue<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ListenerQueue")
            .field("pending", &state.entries.len())
            .field("flushing", &state.flushing)
            .finish()
    }
}

impl<T: Send + Sync + 'static> ListenerQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                entries: VecDeque::new(),
                flushing: false,
            }),
        }
    }

    pub(crate) fn add(&self, entry: ListenerEntry<T>) {
        self.state.lock().entries.push_back(entry);
    }

    /// Removes the given entries if they have not been drained yet.
    /// Returns false if at least one of them was no longer queued.
    pub(crate) fn remove_all(&self, entries: &[ListenerEntry<T>]) -> bool {
        let mut state = self.state.lock();
        let before = state.entries.len();
        state
            .entries
            .retain(|queued| !entries.iter().any(|entry| same_entry(queued, entry)));
        before - state.entries.len() == entries.len()
    }

    /// Drains the queue, handing every entry the completed value.
    ///
    /// Only one thread drains at a time; a concurrent or re-entrant call returns immediately
    /// and its entries are picked up by the drain that is already running.
    /// Entries are invoked without holding the queue lock.
    ///
    /// # Panics
    /// A panic escaping an entry propagates to the caller, after every entry queued behind it
    /// has been dispatched during unwinding.
    pub(crate) fn flush(&self, completed: &DeferredValue<T>) {
        {
            let mut state = self.state.lock();
            if state.flushing {
                return;
            }
            state.flushing = true;
        }

        let unwinding = defer_guard! {
            self.drain_after_panic(completed);
        };

        while let Some(next) = self.next_or_finish() {
            tracing::trace!("dispatching listener");
            next.on_complete(completed.clone());
        }

        unwinding.cancel();
    }

    /// Pops the next entry. Clears the flushing flag under the same lock once the queue is empty.
    fn next_or_finish(&self) -> Option<ListenerEntry<T>> {
        let mut state = self.state.lock();
        let next = state.entries.pop_front();
        if next.is_none() {
            state.flushing = false;
        }
        next
    }

    /// Keeps dispatching while an entry's panic unwinds so nothing queued behind it is stranded.
    fn drain_after_panic(&self, completed: &DeferredValue<T>) {
        while let Some(next) = self.next_or_finish() {
            let source = completed.clone();
            if panic::catch_unwind(AssertUnwindSafe(move || next.on_complete(source))).is_err() {
                tracing::error!("listener panicked while unwinding another panic");
            }
        }
    }
}

/// Single-shot callback holder. Emptying it turns a late dispatch into a no-op.
pub(crate) struct Slot<F>(Mutex<Option<F>>);

impl<F> Slot<F> {
    pub(crate) fn new(value: F) -> Self {
        Self(Mutex::new(Some(value)))
    }

    pub(crate) fn take(&self) -> Option<F> {
        self.0.lock().take()
    }
}

/// Hands a job to an executor. Listener jobs that are refused are dropped.
fn submit(executor: &dyn Executor, job: Job) {
    if let Err(rejected) = executor.execute(job) {
        tracing::warn!(%rejected, "executor rejected listener, callback dropped");
    }
}

pub(crate) type SuccessCallback<T> = Box<dyn FnOnce(&Arc<T>) + Send>;
pub(crate) type FailureCallback = Box<dyn FnOnce(Cause) + Send>;
pub(crate) type CompletionCallback<T> = Box<dyn FnOnce(&DeferredValue<T>) + Send>;

/// Fires only on success, with the result.
pub(crate) struct OnSuccess<T> {
    executor: Box<dyn Executor>,
    callback: Slot<SuccessCallback<T>>,
}

impl<T> OnSuccess<T> {
    pub(crate) fn new(executor: Box<dyn Executor>, callback: SuccessCallback<T>) -> Self {
        Self {
            executor,
            callback: Slot::new(callback),
        }
    }
}

impl<T: Send + Sync + 'static> Listener<T> for OnSuccess<T> {
    fn on_complete(self: Arc<Self>, source: DeferredValue<T>) {
        let Some(value) = source.succeeded_value() else {
            drop(self.callback.take());
            return;
        };

        let this = self.clone();
        submit(&*self.executor, Box::new(move || {
            let callback = this.callback.take();
            if let Some(callback) = callback {
                callback(&value);
            }
        }));
    }
}

impl<T: Send + Sync + 'static> Retractable for OnSuccess<T> {
    fn retract(&self) -> bool {
        self.callback.take().is_some()
    }
}

/// Fires only on failure, with the cause.
pub(crate) struct OnFailure {
    executor: Box<dyn Executor>,
    callback: Slot<FailureCallback>,
}

impl OnFailure {
    pub(crate) fn new(executor: Box<dyn Executor>, callback: FailureCallback) -> Self {
        Self {
            executor,
            callback: Slot::new(callback),
        }
    }
}

impl<T: Send + Sync + 'static> Listener<T> for OnFailure {
    fn on_complete(self: Arc<Self>, source: DeferredValue<T>) {
        let Some(cause) = source.get_error() else {
            drop(self.callback.take());
            return;
        };

        let this = self.clone();
        submit(&*self.executor, Box::new(move || {
            let callback = this.callback.take();
            if let Some(callback) = callback {
                callback(cause);
            }
        }));
    }
}

impl Retractable for OnFailure {
    fn retract(&self) -> bool {
        self.callback.take().is_some()
    }
}

/// Always fires, with the whole completed value.
pub(crate) struct OnCompletion<T: Send + Sync + 'static> {
    executor: Box<dyn Executor>,
    callback: Slot<CompletionCallback<T>>,
}

impl<T: Send + Sync + 'static> OnCompletion<T> {
    pub(crate) fn new(executor: Box<dyn Executor>, callback: CompletionCallback<T>) -> Self {
        Self {
            executor,
            callback: Slot::new(callback),
        }
    }
}

impl<T: Send + Sync + 'static> Listener<T> for OnCompletion<T> {
    fn on_complete(self: Arc<Self>, source: DeferredValue<T>) {
        let this = self.clone();
        submit(&*self.executor, Box::new(move || {
            let callback = this.callback.take();
            if let Some(callback) = callback {
                callback(&source);
            }
        }));
    }
}

impl<T: Send + Sync + 'static> Retractable for OnCompletion<T> {
    fn retract(&self) -> bool {
        self.callback.take().is_some()
    }
}

trait Registered: Send + Sync {
    fn cancel(&self) -> bool;
}

struct RegisteredListener<T: Send + Sync + 'static, L> {
    source: DeferredValue<T>,
    listener: Arc<L>,
}

impl<T, L> Registered for RegisteredListener<T, L>
where
    T: Send + Sync + 'static,
    L: Listener<T> + Retractable + 'static,
{
    fn cancel(&self) -> bool {
        let retracted = self.listener.retract();
        let entry: ListenerEntry<T> = self.listener.clone();
        if self.source.listeners().remove_all(&[entry]) {
            tracing::debug!("listener removed before dispatch");
        }
        retracted
    }
}

/// Handle returned by listener registration.
pub struct ListenerRegistration {
    inner: Box<dyn Registered>,
}

impl Debug for ListenerRegistration {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("ListenerRegistration")
    }
}

impl ListenerRegistration {
    pub(crate) fn new<T, L>(source: DeferredValue<T>, listener: Arc<L>) -> Self
    where
        T: Send + Sync + 'static,
        L: Listener<T> + Retractable + 'static,
    {
        Self {
            inner: Box::new(RegisteredListener { source, listener }),
        }
    }

    /// Retracts the listener.
    ///
    /// This is best effort: a callback that already started running runs to completion.
    ///
    /// # Returns
    /// true if the callback had not been started yet and now never will be.
    pub fn cancel(&self) -> bool {
        self.inner.cancel()
    }
}
