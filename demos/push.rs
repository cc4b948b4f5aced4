use deferred_value::{CompletionSource, DeferredValue, Inline, Tasks};
use std::thread;
use std::time::Duration;

fn main() {
    let source: CompletionSource<i32> = CompletionSource::new();
    {
        // The source is reference counted so it can be sent to any thread.
        let source = source.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(1));

            // 'Push' the value and run every inline listener right here.
            if let Err(e) = source.set_result(12345) {
                eprintln!("{e}");
            }
        });
    }

    let first: DeferredValue<i32> = source.deferred_value();
    first.add_on_success_listener(Inline, |value| println!("listener saw {value}"));
    first.add_on_failure_listener(Inline, |cause| eprintln!("listener saw failure {cause}"));

    let second: DeferredValue<String> =
        first.continue_with(Inline, |intermediate| Ok(format!("The result is {}", intermediate.get_result()?)));

    match Tasks::wait(&second) {
        Ok(message) => println!("{message}"),
        Err(e) => eprintln!("failed: {e}"),
    }
}
