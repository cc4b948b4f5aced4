use crate::error::{BoxError, Cause, DeferredError};
use crate::executor::{Executor, Inline, Job, ThreadPerTask};
use crate::{fail_on_panic, trampoline, CompletionSource, DeferredValue};
use defer_heavy::defer;
use parking_lot::{Condvar, Mutex};
use std::error::Error;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One-shot gate a waiting thread parks on until the value completes.
struct Latch {
    released: Mutex<bool>,
    cond: Condvar,
}

impl Latch {
    fn new() -> Self {
        Self {
            released: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn release(&self) {
        *self.released.lock() = true;
        self.cond.notify_all();
    }

    fn wait(&self) {
        let mut released = self.released.lock();
        while !*released {
            self.cond.wait(&mut released);
        }
    }

    /// Returns false if the deadline passed before the latch was released.
    fn wait_until(&self, until: Instant) -> bool {
        let mut released = self.released.lock();
        while !*released {
            if self.cond.wait_until(&mut released, until).timed_out() {
                return *released;
            }
        }
        true
    }
}

#[derive(Default)]
struct Tally {
    successes: usize,
    failures: usize,
    first_cause: Option<Cause>,
}

/// Combinators for creating and awaiting deferred values.
///
/// The associated functions take their executor explicitly.
/// An instance carries a configured default executor for [`Tasks::run`].
#[derive(Clone)]
pub struct Tasks {
    executor: Arc<dyn Executor>,
}

impl Debug for Tasks {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("Tasks")
    }
}

impl Tasks {
    pub fn builder() -> TasksBuilder {
        TasksBuilder::default()
    }

    /// The configured default executor. Can be passed to listener and continuation registrations.
    pub fn executor(&self) -> Arc<dyn Executor> {
        self.executor.clone()
    }

    /// Same as [`Tasks::call`] using the configured executor.
    pub fn run<T: Send + Sync + 'static>(
        &self,
        computation: impl FnOnce() -> Result<T, BoxError> + Send + 'static,
    ) -> DeferredValue<T> {
        Self::call(self.executor.clone(), computation)
    }

    /// Returns a value that is already completed with the result.
    pub fn for_result<T: Send + Sync + 'static>(value: T) -> DeferredValue<T> {
        DeferredValue::succeeded(value)
    }

    /// Returns a value that is already completed with the error.
    pub fn for_error<T: Send + Sync + 'static, E: Error + Send + Sync + 'static>(error: E) -> DeferredValue<T> {
        DeferredValue::failed(Arc::new(error))
    }

    ///
    /// Runs `computation` on the executor and completes the returned value with its outcome.
    ///
    /// # Errors
    /// The returned value fails with
    /// - the error returned by the computation,
    /// - `DeferredError::Rejected` if the executor refused the job,
    /// - `DeferredError::Panicked` if the computation panicked.
    ///
    pub fn call<T: Send + Sync + 'static>(
        executor: impl Executor,
        computation: impl FnOnce() -> Result<T, BoxError> + Send + 'static,
    ) -> DeferredValue<T> {
        let source = CompletionSource::new();
        let target = source.clone();
        let job: Job = Box::new(move || {
            defer! {
                fail_on_panic(&target);
            }

            match computation() {
                Ok(value) => {
                    _ = target.try_set_result(value);
                }
                Err(error) => {
                    _ = target.try_set_cause(Cause::from(error));
                }
            }
        });

        if let Err(rejected) = executor.execute(job) {
            tracing::warn!(%rejected, "executor rejected computation");
            _ = source.try_set_error(DeferredError::Rejected(rejected));
        }

        source.deferred_value()
    }

    ///
    /// Blocks the current thread until the value completes.
    ///
    /// # Errors
    /// `DeferredError::Execution` carrying the stored error if the value failed.
    ///
    pub fn wait<T: Clone + Send + Sync + 'static>(deferred: &DeferredValue<T>) -> Result<T, DeferredError> {
        trampoline::run_pending();
        if !deferred.is_complete() {
            let latch = Arc::new(Latch::new());
            let release = latch.clone();
            deferred.add_on_completion_listener(Inline, move |_| release.release());
            latch.wait();
        }

        deferred.get_result()
    }

    ///
    /// Blocks the current thread until the value completes or roughly the given duration has elapsed.
    ///
    /// Giving up does not affect the value or whatever is computing it.
    ///
    /// # Errors
    /// - `DeferredError::Timeout` if the value did not complete in time.
    /// - `DeferredError::Execution` carrying the stored error if the value failed.
    ///
    pub fn wait_timeout<T: Clone + Send + Sync + 'static>(
        deferred: &DeferredValue<T>,
        timeout: Duration,
    ) -> Result<T, DeferredError> {
        trampoline::run_pending();
        if !deferred.is_complete() {
            let latch = Arc::new(Latch::new());
            let release = latch.clone();
            let registration = deferred.add_on_completion_listener(Inline, move |_| release.release());
            if !latch.wait_until(Instant::now() + timeout) {
                registration.cancel();
                return Err(DeferredError::Timeout);
            }
        }

        deferred.get_result()
    }

    ///
    /// Returns a value that completes once every input has completed.
    ///
    /// It does not fail early: even after an input failed it waits for all remaining inputs.
    /// An empty input completes immediately and successfully.
    ///
    /// # Errors
    /// The returned value fails with `DeferredError::Aggregate` holding the number of failed inputs
    /// and the first cause observed, if one or more inputs failed.
    ///
    pub fn when_all<'a, T: Send + Sync + 'static>(
        values: impl IntoIterator<Item = &'a DeferredValue<T>>,
    ) -> DeferredValue<()> {
        let values: Vec<&DeferredValue<T>> = values.into_iter().collect();
        let total = values.len();
        if total == 0 {
            return Self::for_result(());
        }

        let source = CompletionSource::new();
        let tally = Arc::new(Mutex::new(Tally::default()));
        for value in values {
            let tally = tally.clone();
            let source = source.clone();
            value.add_on_completion_listener(Inline, move |completed| {
                // Decided under the tally lock: exactly one firing observes every input settled.
                let settled = {
                    let mut tally = tally.lock();
                    match completed.get_error() {
                        None => tally.successes += 1,
                        Some(cause) => {
                            tally.failures += 1;
                            tally.first_cause.get_or_insert(cause);
                        }
                    }

                    if tally.successes + tally.failures == total {
                        Some((tally.failures, tally.first_cause.take()))
                    } else {
                        None
                    }
                };

                match settled {
                    None => (),
                    Some((_, None)) => {
                        _ = source.try_set_result(());
                    }
                    Some((failed, Some(cause))) => {
                        _ = source.try_set_error(DeferredError::Aggregate { failed, total, cause });
                    }
                }
            });
        }

        source.deferred_value()
    }
}

/// Configuration for a [`Tasks`] instance.
pub struct TasksBuilder {
    executor: Option<Arc<dyn Executor>>,
    thread_name: String,
}

impl Default for TasksBuilder {
    fn default() -> Self {
        Self {
            executor: None,
            thread_name: String::from("deferred-worker"),
        }
    }
}

impl Debug for TasksBuilder {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TasksBuilder")
            .field("executor", &self.executor.is_some())
            .field("thread_name", &self.thread_name)
            .finish()
    }
}

impl TasksBuilder {
    /// Use the given executor instead of spawning a thread per task.
    pub fn executor(mut self, executor: impl Executor + 'static) -> Self {
        self.executor = Some(Arc::new(executor));
        self
    }

    /// Name of the threads spawned when no executor is configured.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn build(self) -> Tasks {
        let executor = match self.executor {
            Some(executor) => executor,
            None => Arc::new(ThreadPerTask::new().name(self.thread_name)),
        };

        Tasks { executor }
    }
}
