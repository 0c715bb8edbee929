use std::cell::RefCell;
use std::rc::Rc;

use async_event_loop::{Error, EventLoop, Step, Value};

type Log = Rc<RefCell<Vec<String>>>;

fn log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

fn recurse(lp: &EventLoop, log: Log, left: u32) {
    lp.queue_microtask(move |lp| {
        log.borrow_mut().push(format!("micro {left}"));
        if left > 1 {
            recurse(lp, log, left - 1);
        }
        Ok(())
    });
}

#[test]
fn recursive_microtasks_finish_before_timer() {
    let lp = EventLoop::new();
    let log = log();

    let l = log.clone();
    lp.set_timeout(0, move |_| {
        l.borrow_mut().push("timer".into());
        Ok(())
    })
    .unwrap();
    recurse(&lp, log.clone(), 10);

    assert_eq!(lp.tick().unwrap(), Step::Microtasks(10));
    assert_eq!(log.borrow().len(), 10);

    lp.run_until_idle().unwrap();
    let log = log.borrow();
    assert_eq!(log.len(), 11);
    assert_eq!(log[0], "micro 10");
    assert_eq!(log[9], "micro 1");
    assert_eq!(log[10], "timer");
}

#[test]
fn fifo_order() {
    let lp = EventLoop::new();
    let log = log();

    for i in 0..5 {
        let log = log.clone();
        lp.queue_microtask(move |_| {
            log.borrow_mut().push(i.to_string());
            Ok(())
        });
    }
    assert_eq!(lp.pending_microtasks(), 5);

    lp.run_until_idle().unwrap();
    assert_eq!(*log.borrow(), ["0", "1", "2", "3", "4"]);
}

#[test]
fn microtasks_queued_by_a_timer_run_before_the_next_timer() {
    let lp = EventLoop::new();
    let log = log();

    let l = log.clone();
    lp.set_timeout(0, move |lp| {
        l.borrow_mut().push("timer 1".into());
        let l = l.clone();
        lp.queue_microtask(move |_| {
            l.borrow_mut().push("micro".into());
            Ok(())
        });
        Ok(())
    })
    .unwrap();
    let l = log.clone();
    lp.set_timeout(0, move |_| {
        l.borrow_mut().push("timer 2".into());
        Ok(())
    })
    .unwrap();

    lp.run_until_idle().unwrap();
    assert_eq!(*log.borrow(), ["timer 1", "micro", "timer 2"]);
}

#[test]
fn promise_reactions_beat_plain_timers() {
    let lp = EventLoop::new();
    let log = log();

    lp.run(|lp| {
        let l = log.clone();
        lp.set_timeout(0, move |_| {
            l.borrow_mut().push("setTimeout".into());
            Ok(())
        })
        .map_err(|err| Value::error(err.to_string()))?;

        let l = log.clone();
        lp.resolve(Value::Undefined).then(move |_, value| {
            l.borrow_mut().push("promise".into());
            Ok(value)
        });

        log.borrow_mut().push("sync".into());
        Ok(())
    })
    .unwrap();

    assert_eq!(*log.borrow(), ["sync", "promise", "setTimeout"]);
}

#[test]
fn starvation_is_the_default() {
    let lp = EventLoop::new();
    let log = log();

    let l = log.clone();
    lp.set_timeout(0, move |_| {
        l.borrow_mut().push("timer".into());
        Ok(())
    })
    .unwrap();
    recurse(&lp, log.clone(), 50_000);

    assert_eq!(lp.tick().unwrap(), Step::Microtasks(50_000));
    assert!(!log.borrow().iter().any(|entry| entry == "timer"));
}

#[test]
fn microtask_limit_stops_a_runaway_drain() {
    let lp = EventLoop::builder().microtask_limit(100).build();

    fn forever(lp: &EventLoop) {
        lp.queue_microtask(|lp| {
            forever(lp);
            Ok(())
        });
    }
    forever(&lp);

    let err = lp.tick().unwrap_err();
    assert!(matches!(err, Error::MicrotaskLimit { limit: 100 }));
    assert_eq!(lp.pending_microtasks(), 1);
}

#[test]
fn reentrant_tick_is_refused() {
    let lp = EventLoop::new();
    let seen = Rc::new(RefCell::new(None));

    let s = seen.clone();
    lp.queue_microtask(move |lp| {
        let nested = lp.tick().map(|_| ()).map_err(|err| err.to_string());
        *s.borrow_mut() = Some((lp.is_busy(), nested));
        Ok(())
    });
    lp.run_until_idle().unwrap();

    let (busy, nested) = seen.borrow_mut().take().unwrap();
    assert!(busy);
    assert_eq!(nested, Err(Error::Reentrant.to_string()));
    assert!(!lp.is_busy());
}

#[test]
fn execute_inside_a_task_is_refused() {
    let lp = EventLoop::new();
    let mut nested = None;

    lp.execute(|lp| {
        nested = Some((
            matches!(lp.execute(|_| Ok(())), Err(Error::Reentrant)),
            matches!(lp.run_until_idle(), Err(Error::Reentrant)),
        ));
        Ok(())
    })
    .unwrap();

    assert_eq!(nested, Some((true, true)));
    assert!(!lp.is_busy());
}
