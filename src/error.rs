use std::error::Error;
use std::sync::Arc;
use thiserror::Error;

/// A failure stored in a completed deferred value.
/// Shared so that every holder of the value observes the same cause.
pub type Cause = Arc<dyn Error + Send + Sync + 'static>;

/// Error type returned by continuations and computations.
/// Anything implementing `std::error::Error` converts into it via `?`.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

#[derive(Debug, Clone, Error)]
pub enum DeferredError {
    /// The result was requested before the value completed.
    #[error("deferred value is not yet complete")]
    NotYetComplete,

    /// A strict completion operation was called on an already completed value.
    #[error("deferred value is already complete")]
    AlreadyComplete,

    /// The value completed with a failure. The original cause is attached.
    #[error("deferred value completed with an error: {0}")]
    Execution(#[source] Cause),

    /// A flattening continuation did not return a nested value to await.
    #[error("continuation returned no deferred value")]
    NullContinuationResult,

    /// A blocking wait gave up before the value completed.
    #[error("timed out waiting for deferred value")]
    Timeout,

    /// One or more inputs of `when_all` failed.
    #[error("{failed} out of {total} deferred values failed")]
    Aggregate {
        failed: usize,
        total: usize,
        #[source]
        cause: Cause,
    },

    /// The executor refused to run a continuation or computation.
    #[error("executor rejected the job: {0}")]
    Rejected(#[source] RejectedExecution),

    /// A continuation or computation panicked.
    #[error("computation panicked")]
    Panicked,
}

/// Result of [`DeferredValue::get_result_as`](crate::DeferredValue::get_result_as).
#[derive(Debug, Error)]
pub enum TypedError<E> {
    /// The stored error was of the requested kind.
    #[error(transparent)]
    Typed(E),
    /// Any other failure, including a stored error of a different kind.
    #[error(transparent)]
    Untyped(DeferredError),
}

impl<E> TypedError<E> {
    pub fn typed(self) -> Option<E> {
        match self {
            TypedError::Typed(e) => Some(e),
            TypedError::Untyped(_) => None,
        }
    }
}

/// An executor refused to accept a job.
#[derive(Debug, Clone, Error)]
#[error("{reason}")]
pub struct RejectedExecution {
    reason: Arc<str>,
}

impl RejectedExecution {
    pub fn new(reason: impl Into<Arc<str>>) -> Self {
        Self { reason: reason.into() }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl From<std::io::Error> for RejectedExecution {
    fn from(value: std::io::Error) -> Self {
        Self::new(value.to_string())
    }
}

/// Maps an error raised by a continuation to the cause stored on its target.
/// `Execution` wrappers produced by `get_result` are peeled off so chains
/// carry the original cause instead of nested wrappers.
pub(crate) fn unwrap_execution(error: BoxError) -> Cause {
    match error.downcast::<DeferredError>() {
        Ok(deferred) => match *deferred {
            DeferredError::Execution(cause) => cause,
            other => Arc::new(other),
        },
        Err(other) => Cause::from(other),
    }
}
