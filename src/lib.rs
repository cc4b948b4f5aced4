//! Single-assignment deferred values.
//!
//! A [`DeferredValue`] eventually holds either a result or an error. It is completed exactly once
//! through its paired [`CompletionSource`]. Consumers attach listeners before or after completion
//! and derive new deferred values with [`DeferredValue::continue_with`] and
//! [`DeferredValue::continue_with_async`]. Every listener and continuation runs on the
//! [`Executor`] passed at registration.
//!
//! ```rust
//! use deferred_value::{CompletionSource, Inline, Tasks};
//!
//! let source = CompletionSource::<i32>::new();
//! let doubled = source
//!     .deferred_value()
//!     .continue_with(Inline, |value| Ok(value.get_result()? * 2));
//!
//! source.set_result(21).unwrap();
//! assert_eq!(Tasks::wait(&doubled).unwrap(), 42);
//! ```
mod continuation;
mod error;
mod executor;
mod listener;
mod tasks;
mod trampoline;

pub use error::{BoxError, Cause, DeferredError, RejectedExecution, TypedError};
pub use executor::{Executor, Inline, Job, ThreadPerTask};
pub use listener::ListenerRegistration;
pub use tasks::{Tasks, TasksBuilder};

use continuation::{Continuation, FlatteningContinuation};
use listener::{ListenerEntry, ListenerQueue, OnCompletion, OnFailure, OnSuccess};
use parking_lot::Mutex;
use std::error::Error;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::thread;

pub(crate) enum State<T> {
    Pending,
    Succeeded(Arc<T>),
    Failed(Cause),
}

impl<T> State<T> {
    fn name(&self) -> &'static str {
        match self {
            State::Pending => "Pending",
            State::Succeeded(_) => "Succeeded",
            State::Failed(_) => "Failed",
        }
    }
}

struct DeferredInner<T: Send + Sync + 'static> {
    state: Mutex<State<T>>,
    listeners: ListenerQueue<T>,
}

/// Shared handle to a result that is either pending or completed exactly once.
///
/// Cloning is cheap and every clone observes the same state.
pub struct DeferredValue<T: Send + Sync + 'static>(Arc<DeferredInner<T>>);

impl<T: Send + Sync + 'static> Clone for DeferredValue<T> {
    fn clone(&self) -> Self {
        DeferredValue(self.0.clone())
    }
}

impl<T: Send + Sync + 'static> Debug for DeferredValue<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = self.0.state.lock().name();
        f.debug_struct("DeferredValue")
            .field("state", &state)
            .field("listeners", &self.0.listeners)
            .finish()
    }
}

impl<T: Send + Sync + 'static> DeferredValue<T> {
    fn with_state(state: State<T>) -> Self {
        Self(Arc::new(DeferredInner {
            state: Mutex::new(state),
            listeners: ListenerQueue::new(),
        }))
    }

    pub(crate) fn pending() -> Self {
        Self::with_state(State::Pending)
    }

    pub(crate) fn succeeded(value: T) -> Self {
        Self::with_state(State::Succeeded(Arc::new(value)))
    }

    pub(crate) fn failed(cause: Cause) -> Self {
        Self::with_state(State::Failed(cause))
    }

    /// Returns true once the value has been completed, with a result or an error.
    pub fn is_complete(&self) -> bool {
        !matches!(*self.0.state.lock(), State::Pending)
    }

    /// Returns true if the value completed with a result.
    pub fn is_successful(&self) -> bool {
        matches!(*self.0.state.lock(), State::Succeeded(_))
    }

    ///
    /// Returns a copy of the result.
    ///
    /// # Errors
    /// - `DeferredError::NotYetComplete` if the value is still pending.
    /// - `DeferredError::Execution` carrying the stored error if the value failed.
    ///
    pub fn get_result(&self) -> Result<T, DeferredError>
    where
        T: Clone,
    {
        match &*self.0.state.lock() {
            State::Pending => Err(DeferredError::NotYetComplete),
            State::Succeeded(value) => Ok((**value).clone()),
            State::Failed(cause) => Err(DeferredError::Execution(cause.clone())),
        }
    }

    ///
    /// Like [`get_result`](Self::get_result), but a stored error of kind `E` is returned as is.
    ///
    /// # Errors
    /// - `TypedError::Typed` if the value failed with an `E`.
    /// - `TypedError::Untyped` for every failure `get_result` would report.
    ///
    pub fn get_result_as<E>(&self) -> Result<T, TypedError<E>>
    where
        T: Clone,
        E: Error + Clone + 'static,
    {
        if let Some(cause) = self.get_error() {
            if let Some(typed) = (*cause).downcast_ref::<E>() {
                return Err(TypedError::Typed(typed.clone()));
            }
        }

        self.get_result().map_err(TypedError::Untyped)
    }

    /// Returns the stored error. None if the value is pending or succeeded.
    pub fn get_error(&self) -> Option<Cause> {
        match &*self.0.state.lock() {
            State::Failed(cause) => Some(cause.clone()),
            _ => None,
        }
    }

    /// Returns true if both handles refer to the same deferred value.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn succeeded_value(&self) -> Option<Arc<T>> {
        match &*self.0.state.lock() {
            State::Succeeded(value) => Some(value.clone()),
            _ => None,
        }
    }

    pub(crate) fn listeners(&self) -> &ListenerQueue<T> {
        &self.0.listeners
    }

    /// Moves the value out of `Pending`. Returns false, leaving the value untouched, if it was already complete.
    ///
    /// # Triggers Execution
    /// Listeners that use an inline executor run in the current thread before this returns.
    /// When called from a listener that is itself being dispatched on this thread, they run
    /// right after that listener returns instead, so inline chains do not grow the stack.
    pub(crate) fn try_complete(&self, outcome: State<T>) -> bool {
        let successful = matches!(outcome, State::Succeeded(_));
        {
            let mut state = self.0.state.lock();
            if !matches!(*state, State::Pending) {
                return false;
            }
            *state = outcome;
        }

        tracing::trace!(successful, "deferred value completed");
        let completed = self.clone();
        trampoline::run(Box::new(move || completed.0.listeners.flush(&completed)));
        true
    }

    /// Queues the listener and flushes right away if the value is already complete.
    pub(crate) fn add_listener(&self, entry: ListenerEntry<T>) {
        self.0.listeners.add(entry);
        if self.is_complete() {
            self.0.listeners.flush(self);
        }
    }

    ///
    /// Registers a listener that receives the result if the value completes successfully.
    ///
    /// # Order of execution
    /// Listeners of one value are dispatched in registration order.
    ///
    /// # Triggers Execution
    /// If the value is already completed the listener is dispatched before this returns.
    ///
    pub fn add_on_success_listener(
        &self,
        executor: impl Executor + 'static,
        listener: impl FnOnce(&T) + Send + 'static,
    ) -> ListenerRegistration {
        let adapter = Arc::new(OnSuccess::new(
            Box::new(executor),
            Box::new(move |value: &Arc<T>| listener(&**value)),
        ));
        self.add_listener(adapter.clone());
        ListenerRegistration::new(self.clone(), adapter)
    }

    ///
    /// Registers a listener that receives the error if the value completes with one.
    ///
    /// # Order of execution
    /// Listeners of one value are dispatched in registration order.
    ///
    pub fn add_on_failure_listener(
        &self,
        executor: impl Executor + 'static,
        listener: impl FnOnce(Cause) + Send + 'static,
    ) -> ListenerRegistration {
        let adapter = Arc::new(OnFailure::new(Box::new(executor), Box::new(listener)));
        self.add_listener(adapter.clone());
        ListenerRegistration::new(self.clone(), adapter)
    }

    /// Registers a listener that receives the completed value regardless of the outcome.
    pub fn add_on_completion_listener(
        &self,
        executor: impl Executor + 'static,
        listener: impl FnOnce(&DeferredValue<T>) + Send + 'static,
    ) -> ListenerRegistration {
        let adapter = Arc::new(OnCompletion::new(Box::new(executor), Box::new(listener)));
        self.add_listener(adapter.clone());
        ListenerRegistration::new(self.clone(), adapter)
    }

    ///
    /// Creates a child value that completes with the outcome of `continuation` once this value completes.
    ///
    /// The continuation always runs, on success and on failure, and decides itself what to do with the outcome.
    /// Calling `get_result()?` inside the continuation propagates the original cause of a failed parent,
    /// not a nested `DeferredError::Execution`.
    ///
    /// # Panics
    /// A panicking continuation fails the child with `DeferredError::Panicked`. The panic keeps unwinding on the executor.
    ///
    pub fn continue_with<R: Send + Sync + 'static>(
        &self,
        executor: impl Executor + 'static,
        continuation: impl FnOnce(&DeferredValue<T>) -> Result<R, BoxError> + Send + 'static,
    ) -> DeferredValue<R> {
        let target = CompletionSource::new();
        let child = target.deferred_value();
        self.add_listener(Arc::new(Continuation::new(
            Box::new(executor),
            Box::new(continuation),
            target,
        )));
        child
    }

    ///
    /// Creates a child value that completes with the outcome of the deferred value returned by `continuation`.
    ///
    /// The nested value is awaited without blocking and without an additional executor hop.
    /// Returning `None` fails the child with `DeferredError::NullContinuationResult`.
    ///
    pub fn continue_with_async<R, N>(
        &self,
        executor: impl Executor + 'static,
        continuation: impl FnOnce(&DeferredValue<T>) -> Result<N, BoxError> + Send + 'static,
    ) -> DeferredValue<R>
    where
        R: Send + Sync + 'static,
        N: Into<Option<DeferredValue<R>>> + 'static,
    {
        let target = CompletionSource::new();
        let child = target.deferred_value();
        self.add_listener(Arc::new(FlatteningContinuation::new(
            Box::new(executor),
            Box::new(move |source: &DeferredValue<T>| -> Result<Option<DeferredValue<R>>, BoxError> {
                continuation(source).map(Into::into)
            }),
            target,
        )));
        child
    }
}

/// The producer side of a [`DeferredValue`] and the only way to complete it.
///
/// Clones complete the same value; the first completion wins.
pub struct CompletionSource<T: Send + Sync + 'static> {
    value: DeferredValue<T>,
}

impl<T: Send + Sync + 'static> Clone for CompletionSource<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> Debug for CompletionSource<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CompletionSource").field(&self.value).finish()
    }
}

impl<T: Send + Sync + 'static> Default for CompletionSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> CompletionSource<T> {
    pub fn new() -> Self {
        Self {
            value: DeferredValue::pending(),
        }
    }

    /// Returns the paired deferred value. Every call returns a handle to the same value.
    pub fn deferred_value(&self) -> DeferredValue<T> {
        self.value.clone()
    }

    ///
    /// Completes the value with a result.
    ///
    /// # Errors
    /// `DeferredError::AlreadyComplete` if the value was already completed.
    ///
    /// # Triggers Execution
    /// Listeners that use an inline executor run in the current thread before this returns.
    /// Called from inside an inline listener, they run once that listener returns.
    ///
    /// # Panics
    /// A panic escaping an inline listener propagates out of this call after the remaining
    /// listeners were dispatched. The value stays completed.
    ///
    pub fn set_result(&self, value: T) -> Result<(), DeferredError> {
        if self.try_set_result(value) {
            return Ok(());
        }

        Err(DeferredError::AlreadyComplete)
    }

    /// Completes the value with a result. Returns false and does nothing if it was already completed.
    pub fn try_set_result(&self, value: T) -> bool {
        self.value.try_complete(State::Succeeded(Arc::new(value)))
    }

    ///
    /// Completes the value with an error.
    ///
    /// # Errors
    /// `DeferredError::AlreadyComplete` if the value was already completed.
    ///
    pub fn set_error<E: Error + Send + Sync + 'static>(&self, error: E) -> Result<(), DeferredError> {
        self.set_cause(Arc::new(error))
    }

    /// Completes the value with an error. Returns false and does nothing if it was already completed.
    pub fn try_set_error<E: Error + Send + Sync + 'static>(&self, error: E) -> bool {
        self.try_set_cause(Arc::new(error))
    }

    /// Same as [`set_error`](Self::set_error) for a cause that is already shared.
    pub fn set_cause(&self, cause: Cause) -> Result<(), DeferredError> {
        if self.try_set_cause(cause) {
            return Ok(());
        }

        Err(DeferredError::AlreadyComplete)
    }

    /// Same as [`try_set_error`](Self::try_set_error) for a cause that is already shared.
    pub fn try_set_cause(&self, cause: Cause) -> bool {
        self.value.try_complete(State::Failed(cause))
    }

    pub(crate) fn try_set_shared(&self, value: Arc<T>) -> bool {
        self.value.try_complete(State::Succeeded(value))
    }
}

/// Fails the target while unwinding out of a continuation or computation.
pub(crate) fn fail_on_panic<T: Send + Sync + 'static>(target: &CompletionSource<T>) {
    if thread::panicking() {
        _ = target.try_set_error(DeferredError::Panicked);
    }
}
