use deferred_value::{Inline, Tasks};
use std::thread;
use std::time::Duration;

fn main() {
    let tasks = Tasks::builder().thread_name("basic-worker").build();

    let message = tasks
        .run(|| {
            // Executed on a thread spawned by the configured executor.
            // Pass your own executor to the builder to run it elsewhere.
            thread::sleep(Duration::from_secs(1));
            Ok(12345)
        })
        .continue_with(Inline, |intermediate| {
            // Inline: executed by whichever thread completed the value above.
            Ok(format!("The result is {}", intermediate.get_result()?))
        });

    match Tasks::wait(&message) {
        Ok(message) => println!("{message}"),
        Err(e) => eprintln!("failed: {e}"),
    }
}
