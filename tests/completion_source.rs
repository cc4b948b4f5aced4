use deferred_value::{CompletionSource, DeferredError, Tasks, TypedError};
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::Arc;
use std::thread;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("boom: {0}")]
struct Boom(&'static str);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("other")]
struct Other;

#[test]
fn set_result_twice_is_rejected() {
    let source = CompletionSource::new();
    let value = source.deferred_value();
    assert!(!value.is_complete());

    assert!(source.set_result(1).is_ok());
    assert!(matches!(source.set_result(2), Err(DeferredError::AlreadyComplete)));
    assert!(matches!(source.set_error(Boom("late")), Err(DeferredError::AlreadyComplete)));

    assert!(value.is_complete());
    assert!(value.is_successful());
    assert_eq!(value.get_result().unwrap(), 1);
}

#[test]
fn try_variants_report_late_calls() {
    let source = CompletionSource::new();
    assert!(source.try_set_error(Boom("first")));
    assert!(!source.try_set_result(5));
    assert!(!source.try_set_error(Boom("second")));

    let value = source.deferred_value();
    assert!(value.is_complete());
    assert!(!value.is_successful());
    let cause = value.get_error().unwrap();
    assert_eq!(cause.downcast_ref::<Boom>(), Some(&Boom("first")));
}

#[test]
fn concurrent_strict_completion_has_one_winner() {
    for _ in 0..50 {
        let source = CompletionSource::<usize>::new();
        let winners = Arc::new(AtomicUsize::new(0));
        let losers = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|n| {
                let source = source.clone();
                let winners = winners.clone();
                let losers = losers.clone();
                thread::spawn(move || match source.set_result(n) {
                    Ok(()) => {
                        winners.fetch_add(1, SeqCst);
                    }
                    Err(DeferredError::AlreadyComplete) => {
                        losers.fetch_add(1, SeqCst);
                    }
                    Err(other) => panic!("unexpected error {other}"),
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(winners.load(SeqCst), 1);
        assert_eq!(losers.load(SeqCst), 3);
        assert!(source.deferred_value().get_result().unwrap() < 4);
    }
}

#[test]
fn deferred_value_is_always_the_same() {
    let source = CompletionSource::<()>::new();
    let a = source.deferred_value();
    let b = source.deferred_value();
    assert!(a.ptr_eq(&b));
    assert!(!a.ptr_eq(&CompletionSource::<()>::new().deferred_value()));

    source.set_result(()).unwrap();
    assert!(b.is_complete());
}

#[test]
fn get_result_before_completion() {
    let source = CompletionSource::<i32>::new();
    let value = source.deferred_value();
    assert!(matches!(value.get_result(), Err(DeferredError::NotYetComplete)));
    assert!(value.get_error().is_none());
    assert!(!value.is_successful());
}

#[test]
fn failed_result_keeps_the_cause() {
    let value = Tasks::for_error::<i32, _>(Boom("cause"));
    let Err(DeferredError::Execution(cause)) = value.get_result() else {
        panic!("expected an execution error");
    };
    assert_eq!(cause.downcast_ref::<Boom>(), Some(&Boom("cause")));
    assert_eq!(
        value.get_result().unwrap_err().to_string(),
        "deferred value completed with an error: boom: cause"
    );
}

#[test]
fn get_result_as_extracts_matching_kind() {
    let value = Tasks::for_error::<i32, _>(Boom("typed"));

    match value.get_result_as::<Boom>() {
        Err(TypedError::Typed(boom)) => assert_eq!(boom, Boom("typed")),
        other => panic!("unexpected {other:?}"),
    }

    match value.get_result_as::<Other>() {
        Err(TypedError::Untyped(DeferredError::Execution(cause))) => {
            assert!(cause.downcast_ref::<Boom>().is_some())
        }
        other => panic!("unexpected {other:?}"),
    }

    assert_eq!(value.get_result_as::<Boom>().unwrap_err().typed(), Some(Boom("typed")));
    assert_eq!(value.get_result_as::<Other>().unwrap_err().typed(), None);

    assert_eq!(Tasks::for_result(3).get_result_as::<Boom>().unwrap(), 3);
    assert!(matches!(
        CompletionSource::<i32>::new().deferred_value().get_result_as::<Boom>(),
        Err(TypedError::Untyped(DeferredError::NotYetComplete))
    ));
}
