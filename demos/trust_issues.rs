//! A timer's delay is only a lower bound.
//!
//! The main block schedules a 2 second timer and then keeps the call stack busy for 4 seconds.
//! The timer becomes eligible halfway through but only runs once the block returns.
//!
//! Runs on the virtual clock by default. Pass `--real` to wait on the system clock instead.

use std::rc::Rc;

use async_event_loop::{EventLoop, SystemClock, Value};

fn main() {
    let lp = if std::env::args().any(|arg| arg == "--real") {
        EventLoop::builder().clock(Rc::new(SystemClock::new())).build()
    } else {
        EventLoop::new()
    };

    let result = lp.run(|lp| {
        println!("[{}] blocking start", lp.now());

        lp.set_timeout(2000, |lp| {
            println!("[{}] callback scheduled for 2000ms", lp.now());
            Ok(())
        })
        .map_err(|err| Value::error(err.to_string()))?;

        lp.block_for(4000);
        println!("[{}] blocking end", lp.now());
        Ok(())
    });

    if let Err(err) = result {
        eprintln!("event loop failed: {err}");
    }
}
