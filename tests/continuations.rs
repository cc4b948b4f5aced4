use deferred_value::{BoxError, CompletionSource, DeferredError, DeferredValue, Executor, Inline, Job, RejectedExecution, Tasks};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("boom: {0}")]
struct Boom(&'static str);

#[test]
fn chain_applies_in_order() {
    let source = CompletionSource::<i32>::new();
    let result = source
        .deferred_value()
        .continue_with(Inline, |v| Ok(v.get_result()? + 1))
        .continue_with(Inline, |v| Ok(v.get_result()? * 10));

    assert!(!result.is_complete());
    source.set_result(4).unwrap();
    assert_eq!(result.get_result().unwrap(), 50);
}

#[test]
fn chain_on_already_completed_value() {
    let result = Tasks::for_result(String::from("abc"))
        .continue_with(Inline, |v| Ok(v.get_result()?.len()));
    assert!(result.is_complete());
    assert_eq!(result.get_result().unwrap(), 3);
}

#[test]
fn failing_continuation_skips_success_path() {
    let source = CompletionSource::<i32>::new();
    let second_ran = Arc::new(AtomicBool::new(false));

    let first = source
        .deferred_value()
        .continue_with(Inline, |_| -> Result<i32, BoxError> { Err(Boom("f").into()) });
    let cl = second_ran.clone();
    let second = first.continue_with(Inline, move |v| {
        let value = v.get_result()?;
        cl.store(true, SeqCst);
        Ok(value + 1)
    });

    source.set_result(1).unwrap();

    assert!(!second_ran.load(SeqCst));
    assert!(!first.is_successful());
    let cause = second.get_error().unwrap();
    assert_eq!(cause.downcast_ref::<Boom>(), Some(&Boom("f")));
}

#[test]
fn source_failure_is_not_double_wrapped() {
    let source = CompletionSource::<i32>::new();
    let result = source
        .deferred_value()
        .continue_with(Inline, |v| Ok(v.get_result()? * 2))
        .continue_with(Inline, |v| Ok(v.get_result()? * 2));

    source.set_error(Boom("root")).unwrap();

    let cause = result.get_error().unwrap();
    assert!(cause.downcast_ref::<DeferredError>().is_none());
    assert_eq!(cause.downcast_ref::<Boom>(), Some(&Boom("root")));
}

#[test]
fn continuation_can_recover_from_failure() {
    let result = Tasks::for_error::<i32, _>(Boom("x")).continue_with(Inline, |v| {
        Ok(match v.get_error() {
            Some(_) => -1,
            None => v.get_result()?,
        })
    });
    assert_eq!(result.get_result().unwrap(), -1);
}

#[test]
fn continuation_runs_on_its_executor() {
    let source = CompletionSource::<i32>::new();
    let result = source
        .deferred_value()
        .continue_with((), |v| Ok((v.get_result()?, thread::current().id())));
    source.set_result(1).unwrap();

    let (value, id) = Tasks::wait_timeout(&result, Duration::from_secs(5)).unwrap();
    assert_eq!(value, 1);
    assert_ne!(id, thread::current().id());
}

#[test]
fn flattening_awaits_nested_value() {
    let source = CompletionSource::<i32>::new();
    let inner = CompletionSource::<String>::new();
    let inner_value = inner.deferred_value();

    let result: DeferredValue<String> = source
        .deferred_value()
        .continue_with_async(Inline, move |v: &DeferredValue<i32>| {
            v.get_result()?;
            Ok(inner_value)
        });

    source.set_result(1).unwrap();
    assert!(!result.is_complete());

    inner.set_result(String::from("nested")).unwrap();
    assert_eq!(result.get_result().unwrap(), "nested");
}

#[test]
fn flattening_keeps_nested_cause() {
    let inner = CompletionSource::<i32>::new();
    let inner_value = inner.deferred_value();

    let result: DeferredValue<i32> = Tasks::for_result(())
        .continue_with_async(Inline, move |_| Ok(inner_value));

    let delayed = inner.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        delayed.set_error(Boom("inner")).unwrap();
    });

    let Err(DeferredError::Execution(cause)) = Tasks::wait_timeout(&result, Duration::from_secs(5)) else {
        panic!("expected the nested failure");
    };
    handle.join().unwrap();

    assert_eq!(cause.downcast_ref::<Boom>(), Some(&Boom("inner")));
    assert!(cause.downcast_ref::<DeferredError>().is_none());
}

#[test]
fn flattening_without_nested_value_fails() {
    let result: DeferredValue<i32> = Tasks::for_result(1)
        .continue_with_async(Inline, |_| Ok(None::<DeferredValue<i32>>));

    let cause = result.get_error().unwrap();
    assert!(matches!(
        cause.downcast_ref::<DeferredError>(),
        Some(DeferredError::NullContinuationResult)
    ));
}

#[test]
fn flattening_chains_compose() {
    let source = CompletionSource::<i32>::new();
    let plus_one: DeferredValue<i32> = source
        .deferred_value()
        .continue_with_async(Inline, |v: &DeferredValue<i32>| Ok(Tasks::for_result(v.get_result()? + 1)));
    let result = plus_one.continue_with(Inline, |v| Ok(v.get_result()? * 3));

    source.set_result(1).unwrap();
    assert_eq!(result.get_result().unwrap(), 6);
}

#[test]
fn panicking_continuation_fails_target() {
    let result = Tasks::for_result(1).continue_with((), |_| -> Result<i32, BoxError> {
        panic!("continuation blew up")
    });

    let Err(DeferredError::Execution(cause)) = Tasks::wait_timeout(&result, Duration::from_secs(5)) else {
        panic!("expected a failure");
    };
    assert!(matches!(cause.downcast_ref::<DeferredError>(), Some(DeferredError::Panicked)));
}

#[test]
fn panicking_inline_continuation_keeps_dispatching() {
    let source = CompletionSource::<i32>::new();
    let value = source.deferred_value();
    let failed = value.continue_with(Inline, |_| -> Result<i32, BoxError> {
        panic!("inline continuation blew up")
    });
    let doubled = value.continue_with(Inline, |v| Ok(v.get_result()? * 2));

    assert!(panic::catch_unwind(AssertUnwindSafe(|| source.set_result(4))).is_err());

    let cause = failed.get_error().unwrap();
    assert!(matches!(cause.downcast_ref::<DeferredError>(), Some(DeferredError::Panicked)));
    assert_eq!(doubled.get_result().unwrap(), 8);
}

struct Refuse;

impl Executor for Refuse {
    fn execute(&self, _job: Job) -> Result<(), RejectedExecution> {
        Err(RejectedExecution::new("shutting down"))
    }
}

#[test]
fn rejected_continuation_fails_target() {
    let result = Tasks::for_result(1).continue_with(Refuse, |v| Ok(v.get_result()?));
    let cause = result.get_error().unwrap();
    match cause.downcast_ref::<DeferredError>() {
        Some(DeferredError::Rejected(rejected)) => assert_eq!(rejected.reason(), "shutting down"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn long_inline_chain() {
    let source = CompletionSource::<u32>::new();
    let mut result = source.deferred_value();
    for _ in 0..100 {
        result = result.continue_with(Inline, |v| Ok(v.get_result()? + 1));
    }

    source.set_result(0).unwrap();
    assert_eq!(result.get_result().unwrap(), 100);
}
