//! The four combinators and an async function, on three simulated network calls.

use async_event_loop::{EventLoop, Promise, Value};

/// A call that settles after `ms`, successfully unless `fail` is set.
fn call(lp: &EventLoop, name: &'static str, ms: i64, fail: bool) -> Value {
    let promise = lp.new_promise(move |lp, resolver| {
        lp.set_timeout(ms, move |_| {
            if fail {
                resolver.reject(Value::error(format!("{name} failed")));
            } else {
                resolver.resolve(format!("{name} success"));
            }
            Ok(())
        })
        .map_err(|err| Value::error(err.to_string()))?;
        Ok(())
    });
    promise.into()
}

fn report(name: &'static str, p: &Promise) {
    p.then_or(
        move |lp, value| {
            println!("[{}] {name} fulfilled: {value}", lp.now());
            Ok(Value::Undefined)
        },
        move |lp, reason| {
            println!("[{}] {name} rejected: {reason}", lp.now());
            Ok(Value::Undefined)
        },
    );
}

fn calls(lp: &EventLoop, fail_second: bool) -> Vec<Value> {
    vec![
        call(lp, "p1", 3000, false),
        call(lp, "p2", 1000, fail_second),
        call(lp, "p3", 2000, false),
    ]
}

fn main() {
    let lp = EventLoop::new();

    report("all", &lp.all(calls(&lp, false)));
    report("all with a failure", &lp.all(calls(&lp, true)));
    report("allSettled", &lp.all_settled(calls(&lp, true)));
    report("race", &lp.race(calls(&lp, true)));
    report("any", &lp.any(calls(&lp, true)));
    report(
        "any, all failing",
        &lp.any(vec![call(&lp, "p1", 500, true), call(&lp, "p2", 700, true)]),
    );

    let handle = lp.clone();
    let order = lp.spawn(async move {
        let cart = handle.delay(1000, "cart").await?;
        let order = handle.delay(1000, format!("order for {cart}")).await?;
        let payment = handle.delay(500, format!("payment for {order}")).await?;
        Ok::<_, Value>(payment)
    });
    report("async checkout", &order);

    if let Err(err) = lp.run_until_idle() {
        eprintln!("event loop failed: {err}");
    }
}
