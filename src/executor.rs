use crate::error::RejectedExecution;
use std::sync::Arc;
use std::thread;

/// A unit of work handed to an [`Executor`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs somewhere: inline, on a fresh thread, on a pool...
///
/// Every listener and continuation registration names the executor its callback runs on.
/// An executor may refuse a job, in which case the job is dropped without being called.
pub trait Executor: Send + Sync {
    fn execute(&self, job: Job) -> Result<(), RejectedExecution>;
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute(&self, job: Job) -> Result<(), RejectedExecution> {
        (**self).execute(job)
    }
}

impl<E: Executor + ?Sized> Executor for &'static E {
    fn execute(&self, job: Job) -> Result<(), RejectedExecution> {
        (**self).execute(job)
    }
}

/// Runs the job immediately on the calling thread.
///
/// Listeners registered with this executor on a pending value run on whichever thread completes it.
/// On an already completed value they run before the registration call returns.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct Inline;

impl Executor for Inline {
    fn execute(&self, job: Job) -> Result<(), RejectedExecution> {
        job();
        Ok(())
    }
}

/// Spawns a new virgin thread for every job.
impl Executor for () {
    fn execute(&self, job: Job) -> Result<(), RejectedExecution> {
        thread::spawn(job);
        Ok(())
    }
}

/// Spawns a new thread for every job, built from the configured name and stack size.
/// A failure of the OS to spawn the thread is reported as a rejection.
#[derive(Clone, Debug, Default)]
pub struct ThreadPerTask {
    name: Option<String>,
    stack_size: Option<usize>,
}

impl ThreadPerTask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    fn builder(&self) -> thread::Builder {
        let mut builder = thread::Builder::new();
        if let Some(name) = &self.name {
            builder = builder.name(name.clone());
        }
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }
        builder
    }
}

impl Executor for ThreadPerTask {
    fn execute(&self, job: Job) -> Result<(), RejectedExecution> {
        self.builder().spawn(job).map(|_| ()).map_err(RejectedExecution::from)
    }
}
