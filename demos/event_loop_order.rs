//! Synchronous code, then microtasks, then timers.
//!
//! Prints:
//!
//! ```text
//! [0ms] start
//! [0ms] end
//! [0ms] microtask
//! [0ms] promise reaction
//! [0ms] zero ms timeout
//! [5000ms] five second timeout
//! ```

use async_event_loop::{EventLoop, Value};

fn say(lp: &EventLoop, message: &str) {
    println!("[{}] {message}", lp.now());
}

fn main() {
    let lp = EventLoop::new();

    let result = lp.run(|lp| {
        say(lp, "start");

        lp.set_timeout(5000, |lp| {
            say(lp, "five second timeout");
            Ok(())
        })
        .map_err(|err| Value::error(err.to_string()))?;

        lp.set_timeout(0, |lp| {
            say(lp, "zero ms timeout");
            Ok(())
        })
        .map_err(|err| Value::error(err.to_string()))?;

        lp.queue_microtask(|lp| {
            say(lp, "microtask");
            Ok(())
        });

        lp.resolve(()).then(|lp, value| {
            say(lp, "promise reaction");
            Ok(value)
        });

        say(lp, "end");
        Ok(())
    });

    if let Err(err) = result {
        eprintln!("event loop failed: {err}");
    }
}
