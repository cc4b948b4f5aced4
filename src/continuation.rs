use crate::error::{unwrap_execution, BoxError, DeferredError};
use crate::executor::{Executor, Inline, Job};
use crate::listener::{Listener, OnFailure, OnSuccess, Slot};
use crate::{fail_on_panic, CompletionSource, DeferredValue};
use defer_heavy::defer;
use std::sync::Arc;

pub(crate) type ContinuationFn<T, R> =
    Box<dyn FnOnce(&DeferredValue<T>) -> Result<R, BoxError> + Send>;

pub(crate) type FlatteningFn<T, R> =
    Box<dyn FnOnce(&DeferredValue<T>) -> Result<Option<DeferredValue<R>>, BoxError> + Send>;

/// Submits a continuation job. A refused job fails the target instead of leaving it pending.
fn submit<R: Send + Sync + 'static>(executor: &dyn Executor, target: &CompletionSource<R>, job: Job) {
    if let Err(rejected) = executor.execute(job) {
        tracing::warn!(%rejected, "executor rejected continuation");
        _ = target.try_set_error(DeferredError::Rejected(rejected));
    }
}

/// Completes the target with whatever the continuation returns.
pub(crate) struct Continuation<T: Send + Sync + 'static, R: Send + Sync + 'static> {
    executor: Box<dyn Executor>,
    pending: Slot<(ContinuationFn<T, R>, CompletionSource<R>)>,
}

impl<T: Send + Sync + 'static, R: Send + Sync + 'static> Continuation<T, R> {
    pub(crate) fn new(
        executor: Box<dyn Executor>,
        continuation: ContinuationFn<T, R>,
        target: CompletionSource<R>,
    ) -> Self {
        Self {
            executor,
            pending: Slot::new((continuation, target)),
        }
    }
}

impl<T: Send + Sync + 'static, R: Send + Sync + 'static> Listener<T> for Continuation<T, R> {
    fn on_complete(self: Arc<Self>, source: DeferredValue<T>) {
        let Some((continuation, target)) = self.pending.take() else {
            return;
        };

        let job_target = target.clone();
        submit(&*self.executor, &target, Box::new(move || {
            defer! {
                fail_on_panic(&job_target);
            }

            match continuation(&source) {
                Ok(value) => {
                    _ = job_target.try_set_result(value);
                }
                Err(error) => {
                    _ = job_target.try_set_cause(unwrap_execution(error));
                }
            }
        }));
    }
}

/// Completes the target once the deferred value returned by the continuation completes.
pub(crate) struct FlatteningContinuation<T: Send + Sync + 'static, R: Send + Sync + 'static> {
    executor: Box<dyn Executor>,
    pending: Slot<(FlatteningFn<T, R>, CompletionSource<R>)>,
}

impl<T: Send + Sync + 'static, R: Send + Sync + 'static> FlatteningContinuation<T, R> {
    pub(crate) fn new(
        executor: Box<dyn Executor>,
        continuation: FlatteningFn<T, R>,
        target: CompletionSource<R>,
    ) -> Self {
        Self {
            executor,
            pending: Slot::new((continuation, target)),
        }
    }
}

/// Forwards the outcome of `nested` into `target` without another executor hop.
fn forward<R: Send + Sync + 'static>(nested: &DeferredValue<R>, target: CompletionSource<R>) {
    let on_failure = target.clone();
    nested.add_listener(Arc::new(OnSuccess::new(
        Box::new(Inline),
        Box::new(move |value: &Arc<R>| {
            _ = target.try_set_shared(value.clone());
        }),
    )));
    nested.add_listener(Arc::new(OnFailure::new(
        Box::new(Inline),
        Box::new(move |cause| {
            _ = on_failure.try_set_cause(cause);
        }),
    )));
}

impl<T: Send + Sync + 'static, R: Send + Sync + 'static> Listener<T> for FlatteningContinuation<T, R> {
    fn on_complete(self: Arc<Self>, source: DeferredValue<T>) {
        let Some((continuation, target)) = self.pending.take() else {
            return;
        };

        let job_target = target.clone();
        submit(&*self.executor, &target, Box::new(move || {
            defer! {
                fail_on_panic(&job_target);
            }

            match continuation(&source) {
                Ok(Some(nested)) => forward(&nested, job_target.clone()),
                Ok(None) => {
                    _ = job_target.try_set_error(DeferredError::NullContinuationResult);
                }
                Err(error) => {
                    _ = job_target.try_set_cause(unwrap_execution(error));
                }
            }
        }));
    }
}
