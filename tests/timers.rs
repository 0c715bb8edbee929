use std::cell::RefCell;
use std::rc::Rc;

use async_event_loop::{Error, EventLoop, Step, Timestamp, VirtualClock};

type Log = Rc<RefCell<Vec<String>>>;

fn log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

fn timer(lp: &EventLoop, log: &Log, name: &'static str, delay_ms: i64) {
    let log = log.clone();
    lp.set_timeout(delay_ms, move |lp| {
        log.borrow_mut().push(format!("{name}@{}", lp.now().as_millis()));
        Ok(())
    })
    .unwrap();
}

#[test]
fn earliest_first_ties_in_schedule_order() {
    let lp = EventLoop::new();
    let log = log();

    timer(&lp, &log, "A", 10);
    timer(&lp, &log, "B", 5);
    timer(&lp, &log, "C", 5);
    lp.run_until_idle().unwrap();

    assert_eq!(*log.borrow(), ["B@5", "C@5", "A@10"]);
}

#[test]
fn random_delays_run_sorted() {
    let lp = EventLoop::new();
    let log = log();

    let mut expected = Vec::new();
    for i in 0..200 {
        let delay = fastrand::i64(0..50);
        expected.push((delay, i));

        let log = log.clone();
        lp.set_timeout(delay, move |_| {
            log.borrow_mut().push(format!("{delay}:{i}"));
            Ok(())
        })
        .unwrap();
    }
    lp.run_until_idle().unwrap();

    expected.sort();
    let expected: Vec<String> = expected.iter().map(|(d, i)| format!("{d}:{i}")).collect();
    assert_eq!(*log.borrow(), expected);
}

#[test]
fn zero_delay_is_never_synchronous() {
    let lp = EventLoop::new();
    let log = log();

    lp.execute(|lp| {
        timer(lp, &log, "timeout", 0);
        log.borrow_mut().push("sync".into());
        Ok(())
    })
    .unwrap();
    assert_eq!(*log.borrow(), ["sync"]);

    assert!(matches!(lp.tick().unwrap(), Step::Timer(_)));
    assert_eq!(*log.borrow(), ["sync", "timeout@0"]);
}

#[test]
fn one_timer_per_tick() {
    let lp = EventLoop::new();
    let log = log();

    timer(&lp, &log, "a", 0);
    timer(&lp, &log, "b", 0);

    assert!(matches!(lp.tick().unwrap(), Step::Timer(_)));
    assert_eq!(log.borrow().len(), 1);
    assert!(matches!(lp.tick().unwrap(), Step::Timer(_)));
    assert_eq!(log.borrow().len(), 2);
    assert_eq!(lp.tick().unwrap(), Step::Idle);
}

#[test]
fn idle_wait_jumps_to_next_deadline() {
    let clock = Rc::new(VirtualClock::new(Timestamp::from_millis(100)));
    let lp = EventLoop::builder().clock(clock.clone()).build();
    let log = log();

    timer(&lp, &log, "late", 250);

    assert_eq!(lp.tick().unwrap(), Step::Waited(Timestamp::from_millis(350)));
    assert!(log.borrow().is_empty());
    assert!(matches!(lp.tick().unwrap(), Step::Timer(_)));
    assert_eq!(*log.borrow(), ["late@350"]);
}

#[test]
fn delay_is_a_lower_bound() {
    let clock = Rc::new(VirtualClock::new(Timestamp::ZERO));
    let lp = EventLoop::builder().clock(clock.clone()).build();
    let log = log();

    timer(&lp, &log, "t", 10);
    clock.advance(40);
    lp.run_until_idle().unwrap();

    assert_eq!(*log.borrow(), ["t@40"]);
}

#[test]
fn blocking_task_holds_back_elapsed_timers() {
    let lp = EventLoop::new();
    let log = log();

    lp.run(|lp| {
        timer(lp, &log, "timeout", 2000);
        lp.block_for(4000);
        log.borrow_mut().push(format!("main done@{}", lp.now().as_millis()));
        Ok(())
    })
    .unwrap();

    assert_eq!(*log.borrow(), ["main done@4000", "timeout@4000"]);
}

#[test]
fn cancel_before_eligible() {
    let lp = EventLoop::new();
    let log = log();

    let keep = log.clone();
    lp.set_timeout(5, move |_| {
        keep.borrow_mut().push("kept".into());
        Ok(())
    })
    .unwrap();
    let dropped = log.clone();
    let id = lp
        .set_timeout(5, move |_| {
            dropped.borrow_mut().push("cancelled".into());
            Ok(())
        })
        .unwrap();

    assert_eq!(lp.pending_timers(), 2);
    assert!(lp.clear_timeout(id));
    assert_eq!(lp.pending_timers(), 1);
    assert!(!lp.clear_timeout(id));

    lp.run_until_idle().unwrap();
    assert_eq!(*log.borrow(), ["kept"]);
}

#[test]
fn cancel_after_run_is_a_no_op() {
    let lp = EventLoop::new();
    let id = lp.set_timeout(0, |_| Ok(())).unwrap();
    lp.run_until_idle().unwrap();

    assert!(!lp.clear_timeout(id));
    assert!(!lp.clear_timeout(id));
    assert!(lp.is_idle());
}

#[test]
fn cancel_from_another_timer() {
    let lp = EventLoop::new();
    let log = log();

    let victim_log = log.clone();
    let victim = lp
        .set_timeout(10, move |_| {
            victim_log.borrow_mut().push("victim".into());
            Ok(())
        })
        .unwrap();
    lp.set_timeout(5, move |lp| {
        assert!(lp.clear_timeout(victim));
        Ok(())
    })
    .unwrap();

    lp.run_until_idle().unwrap();
    assert!(log.borrow().is_empty());
    assert_eq!(lp.now().as_millis(), 5);
}

#[test]
fn negative_delay() {
    let lp = EventLoop::new();
    let err = lp.set_timeout(-1, |_| Ok(())).unwrap_err();

    assert!(matches!(err, Error::NegativeDelay { delay_ms: -1 }));
    assert_eq!(lp.pending_timers(), 0);
}

#[test]
fn loops_are_independent() {
    let a = EventLoop::new();
    let b = EventLoop::new();
    let log = log();

    timer(&a, &log, "a", 10);
    timer(&b, &log, "b", 20);

    b.run_until_idle().unwrap();
    assert_eq!(*log.borrow(), ["b@20"]);
    assert_eq!(a.now().as_millis(), 0);
    assert_eq!(a.pending_timers(), 1);

    a.run_until_idle().unwrap();
    assert_eq!(*log.borrow(), ["b@20", "a@10"]);
}
