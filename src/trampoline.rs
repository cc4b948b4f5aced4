use defer_heavy::defer_guard;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};

/// Flush of a freshly completed value, waiting for its turn on this thread.
pub(crate) type PendingFlush = Box<dyn FnOnce()>;

thread_local! {
    // Some while a completion flush is running on this thread. Completions triggered from
    // inside it queue their flush here instead of recursing, which keeps long inline
    // continuation chains at a constant stack depth.
    static PENDING: RefCell<Option<VecDeque<PendingFlush>>> = const { RefCell::new(None) };
}

/// Runs `flush` right away, or queues it behind the flush already running on this thread.
pub(crate) fn run(flush: PendingFlush) {
    let outermost = PENDING.with(|pending| {
        let mut pending = pending.borrow_mut();
        if let Some(queue) = pending.as_mut() {
            queue.push_back(flush);
            return None;
        }

        *pending = Some(VecDeque::new());
        Some(flush)
    });

    let Some(flush) = outermost else {
        return;
    };

    let unwinding = defer_guard! {
        drain_after_panic();
    };

    flush();
    while let Some(next) = next_or_finish() {
        next();
    }

    unwinding.cancel();
}

/// Runs every queued flush on the current stack.
/// Used before blocking so a wait inside a listener cannot starve the values it waits on.
pub(crate) fn run_pending() {
    while let Some(next) = PENDING.with(|pending| pending.borrow_mut().as_mut().and_then(VecDeque::pop_front)) {
        next();
    }
}

/// Pops the next queued flush. Leaves the trampoline once the queue is empty.
fn next_or_finish() -> Option<PendingFlush> {
    PENDING.with(|pending| {
        let mut pending = pending.borrow_mut();
        let next = pending.as_mut().and_then(VecDeque::pop_front);
        if next.is_none() {
            *pending = None;
        }
        next
    })
}

fn drain_after_panic() {
    while let Some(next) = next_or_finish() {
        if panic::catch_unwind(AssertUnwindSafe(next)).is_err() {
            tracing::error!("completion flush panicked while unwinding another panic");
        }
    }
}
